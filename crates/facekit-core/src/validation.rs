//! Request validation: thresholds and caller-supplied face geometry.
//!
//! Every check collects all of its problems instead of stopping at the
//! first one, keyed by the request field they belong to.

use crate::detector::DetectorKind;
use crate::types::DetectedFace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const FIELD_FACES: &str = "faces";
pub const FIELD_THRESHOLD: &str = "threshold";

/// Field name → list of messages; fields iterate in alphabetical order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// One message on one field.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, messages)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {}", messages.join(", "))?;
        }
        Ok(())
    }
}

/// The threshold a detection request runs with.
///
/// Values outside `[0, 1]` are rejected. `0`, `1` and `None` select the
/// detector kind's default.
pub fn resolve_threshold(kind: DetectorKind, requested: Option<f32>) -> Result<f32, ValidationErrors> {
    match requested {
        Some(t) if t.is_nan() || !(0.0..=1.0).contains(&t) => Err(ValidationErrors::single(
            FIELD_THRESHOLD,
            "Threshold must be between 0 and 1",
        )),
        Some(t) if t > 0.0 && t < 1.0 => Ok(t),
        _ => Ok(kind.default_threshold()),
    }
}

/// Check caller geometry before any recognition runs.
pub fn validate_face_records(faces: &[DetectedFace]) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if faces.is_empty() {
        errors.add(FIELD_FACES, "Face list must not be empty");
    }
    for (i, face) in faces.iter().enumerate() {
        for problem in face_problems(face) {
            errors.add(FIELD_FACES, format!("face {i}: {problem}"));
        }
    }
    errors.into_result(())
}

fn face_problems(face: &DetectedFace) -> Vec<&'static str> {
    let mut problems = Vec::new();
    let b = &face.bbox;

    if ![b.x, b.y, b.w, b.h].iter().all(|v| v.is_finite()) {
        problems.push("bbox values must be finite numbers");
    } else {
        if b.w <= 0.0 {
            problems.push("bbox width must be positive");
        }
        if b.h <= 0.0 {
            problems.push("bbox height must be positive");
        }
    }

    match &face.landmarks {
        None => problems.push("landmarks are required"),
        Some(lm) if !lm.flatten().iter().all(|v| v.is_finite()) => {
            problems.push("landmark coordinates must be finite numbers")
        }
        Some(_) => {}
    }

    if !face.confidence.is_finite() || !(0.0..=1.0).contains(&face.confidence) {
        problems.push("confidence must be between 0 and 1");
    }
    problems
}

/// Parse the JSON text form of a face list and validate it.
pub fn parse_face_records(text: Option<&str>) -> Result<Vec<DetectedFace>, ValidationErrors> {
    let text = match text {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Err(ValidationErrors::single(FIELD_FACES, "Face list is required")),
    };

    let items = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(_) => return Err(ValidationErrors::single(FIELD_FACES, "Face list must be a JSON array")),
        Err(e) => return Err(ValidationErrors::single(FIELD_FACES, format!("Invalid JSON: {e}"))),
    };

    let mut errors = ValidationErrors::new();
    let mut faces = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<DetectedFace>(item) {
            Ok(face) => faces.push(face),
            Err(e) => errors.add(FIELD_FACES, format!("face {i}: {e}")),
        }
    }
    let faces = errors.into_result(faces)?;

    validate_face_records(&faces)?;
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Landmarks};

    fn good_face() -> DetectedFace {
        DetectedFace::new(
            BoundingBox { x: 1.0, y: 2.0, w: 30.0, h: 40.0 },
            Some(Landmarks::from_points([[5.0, 6.0], [20.0, 6.0], [12.0, 15.0], [7.0, 25.0], [18.0, 25.0]])),
            0.75,
        )
    }

    #[test]
    fn test_resolve_threshold_in_range() {
        assert_eq!(resolve_threshold(DetectorKind::YuNet, Some(0.6)).unwrap(), 0.6);
    }

    #[test]
    fn test_resolve_threshold_defaults() {
        for requested in [None, Some(0.0), Some(1.0)] {
            assert_eq!(resolve_threshold(DetectorKind::YuNet, requested).unwrap(), 0.8);
            assert_eq!(resolve_threshold(DetectorKind::RetinaFace, requested).unwrap(), 0.5);
        }
    }

    #[test]
    fn test_resolve_threshold_rejects_out_of_range() {
        for bad in [-0.1, 1.5, f32::NAN] {
            let errors = resolve_threshold(DetectorKind::YuNet, Some(bad)).unwrap_err();
            assert_eq!(errors.fields().collect::<Vec<_>>(), vec![FIELD_THRESHOLD]);
        }
    }

    #[test]
    fn test_validate_accepts_good_faces() {
        assert!(validate_face_records(&[good_face(), good_face()]).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_list() {
        let errors = validate_face_records(&[]).unwrap_err();
        assert_eq!(errors.get(FIELD_FACES).unwrap(), ["Face list must not be empty"]);
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut bad = good_face();
        bad.bbox.w = 0.0;
        bad.bbox.h = -3.0;
        bad.landmarks = None;
        bad.confidence = 1.5;

        let errors = validate_face_records(&[good_face(), bad]).unwrap_err();
        let messages = errors.get(FIELD_FACES).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| m.starts_with("face 1: ")));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut bad = good_face();
        bad.bbox.x = f32::INFINITY;
        if let Some(lm) = bad.landmarks.as_mut() {
            lm.nose[0] = f32::NAN;
        }
        let messages = validate_face_records(&[bad]).unwrap_err().get(FIELD_FACES).unwrap().to_vec();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_parse_missing_and_malformed() {
        let missing = parse_face_records(None).unwrap_err();
        assert_eq!(missing.get(FIELD_FACES).unwrap(), ["Face list is required"]);

        let malformed = parse_face_records(Some("[{")).unwrap_err();
        assert!(malformed.get(FIELD_FACES).unwrap()[0].starts_with("Invalid JSON"));

        let object = parse_face_records(Some("{\"bbox\": {}}")).unwrap_err();
        assert_eq!(object.get(FIELD_FACES).unwrap(), ["Face list must be a JSON array"]);

        let empty = parse_face_records(Some("[]")).unwrap_err();
        assert_eq!(empty.get(FIELD_FACES).unwrap(), ["Face list must not be empty"]);
    }

    #[test]
    fn test_parse_reports_bad_entries_by_index() {
        let text = format!(
            "[{}, {{\"bbox\": {{\"x\": 1}}}}, 7]",
            serde_json::to_string(&good_face()).unwrap()
        );
        let errors = parse_face_records(Some(&text)).unwrap_err();
        let messages = errors.get(FIELD_FACES).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("face 1: "));
        assert!(messages[1].starts_with("face 2: "));
    }

    #[test]
    fn test_parse_roundtrip_is_exact() {
        let faces = vec![good_face()];
        let text = serde_json::to_string(&faces).unwrap();
        assert_eq!(parse_face_records(Some(&text)).unwrap(), faces);
    }

    #[test]
    fn test_errors_serialize_as_map() {
        let mut errors = ValidationErrors::single("image_1", "Invalid image");
        errors.add("threshold", "bad");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["image_1"][0], "Invalid image");
        assert_eq!(errors.to_string(), "image_1: Invalid image; threshold: bad");
    }

    #[test]
    fn test_fields_are_alphabetical_not_insertion_order() {
        let mut errors = ValidationErrors::single(FIELD_THRESHOLD, "bad");
        errors.add(FIELD_FACES, "empty");
        errors.add("image", "missing");
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["faces", "image", "threshold"]);
        assert_eq!(errors.to_string(), "faces: empty; image: missing; threshold: bad");
    }
}
