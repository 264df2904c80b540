use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 2D point `[x, y]` in image pixel coordinates.
pub type Point = [f32; 2];

/// Axis-aligned face rectangle: top-left corner plus width/height, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Build a box from `(x1, y1)`-`(x2, y2)` corners.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            w: x2 - x1,
            h: y2 - y1,
        }
    }

    /// `[x1, y1, x2, y2]`.
    pub fn corners(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.w, self.y + self.h]
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// True when both sides are strictly positive.
    pub fn is_valid(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let [ax1, ay1, ax2, ay2] = self.corners();
        let [bx1, by1, bx2, by2] = other.corners();

        let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let inter_area = inter_w * inter_h;
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Five-point facial landmarks.
///
/// The point order `left_eye, right_eye, nose, left_mouth, right_mouth` is
/// shared by every detector and recognizer; alignment depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose: Point,
    pub left_mouth: Point,
    pub right_mouth: Point,
}

impl Landmarks {
    pub fn from_points(points: [Point; 5]) -> Self {
        let [left_eye, right_eye, nose, left_mouth, right_mouth] = points;
        Self {
            left_eye,
            right_eye,
            nose,
            left_mouth,
            right_mouth,
        }
    }

    pub fn points(&self) -> [Point; 5] {
        [
            self.left_eye,
            self.right_eye,
            self.nose,
            self.left_mouth,
            self.right_mouth,
        ]
    }

    /// Flatten to `[lx, ly, rx, ry, nx, ny, lmx, lmy, rmx, rmy]`.
    pub fn flatten(&self) -> [f32; 10] {
        let mut out = [0.0f32; 10];
        for (i, [x, y]) in self.points().into_iter().enumerate() {
            out[i * 2] = x;
            out[i * 2 + 1] = y;
        }
        out
    }
}

/// A face located in an image: box, optional landmarks, detector confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub landmarks: Option<Landmarks>,
    pub confidence: f32,
}

impl DetectedFace {
    pub fn new(bbox: BoundingBox, landmarks: Option<Landmarks>, confidence: f32) -> Self {
        Self {
            bbox,
            landmarks,
            confidence,
        }
    }
}

/// Face embedding vector (128-dim for SFace, 512-dim for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_version: &str) -> Self {
        Self {
            values,
            model_version: Some(model_version.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Not clamped.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.values, &other.values)
    }
}

/// `dot(a, b) / (|a| * |b|)`; 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// An unrecognized detector, recognizer, or pipeline name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {what} '{name}', expected one of: {expected}")]
pub struct NameError {
    pub what: &'static str,
    pub name: String,
    pub expected: String,
}

impl NameError {
    pub(crate) fn new(what: &'static str, name: &str, expected: &[&str]) -> Self {
        Self {
            what,
            name: name.to_string(),
            expected: expected
                .iter()
                .map(|n| format!("'{n}'"))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}
