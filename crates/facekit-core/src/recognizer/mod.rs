//! Face recognizer contract and its ONNX-backed variants.
//!
//! A recognizer aligns a detected face to the canonical 112×112 crop and
//! turns it into a flat embedding. Embeddings are compared with cosine
//! similarity.

pub mod arcface;
pub mod sface;

use crate::types::{cosine_similarity, DetectedFace, Embedding, Landmarks, NameError};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use arcface::ArcFaceRecognizer;
pub use sface::SFaceRecognizer;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}, download it and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks, the detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("expected {expected}-dim embedding, got {got}")]
    EmbeddingShape { expected: usize, got: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The closed set of recognizer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerKind {
    SFace,
    ArcFace,
}

impl RecognizerKind {
    pub const ALL: [RecognizerKind; 2] = [RecognizerKind::SFace, RecognizerKind::ArcFace];

    pub fn name(self) -> &'static str {
        match self {
            RecognizerKind::SFace => "sface",
            RecognizerKind::ArcFace => "arcface",
        }
    }

    /// Length of every embedding this kind produces.
    pub fn embedding_dim(self) -> usize {
        match self {
            RecognizerKind::SFace => sface::SFACE_EMBEDDING_DIM,
            RecognizerKind::ArcFace => arcface::ARCFACE_EMBEDDING_DIM,
        }
    }

    /// Whether the kind aligns on the five landmarks before embedding.
    pub fn requires_landmarks(self) -> bool {
        match self {
            RecognizerKind::SFace | RecognizerKind::ArcFace => true,
        }
    }
}

impl fmt::Display for RecognizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecognizerKind {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecognizerKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| NameError::new("recognizer", s, &["sface", "arcface"]))
    }
}

/// A face recognition model.
pub trait FaceRecognizer: Send + Sync {
    fn kind(&self) -> RecognizerKind;

    /// Embed `face` as found in `image`. The result is always flat, with
    /// `kind().embedding_dim()` values.
    fn infer(&self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, RecognizerError>;

    /// Cosine similarity of two embeddings. Symmetric, not clamped.
    fn similarity(&self, a: &Embedding, b: &Embedding) -> f32 {
        cosine_similarity(&a.values, &b.values)
    }

    /// Embed a face from each image and compare them.
    fn match_faces(
        &self,
        image_a: &RgbImage,
        face_a: &DetectedFace,
        image_b: &RgbImage,
        face_b: &DetectedFace,
    ) -> Result<f32, RecognizerError> {
        let a = self.infer(image_a, face_a)?;
        let b = self.infer(image_b, face_b)?;
        Ok(self.similarity(&a, &b))
    }
}

/// The five points alignment needs; a face without them cannot be embedded.
pub(crate) fn alignment_landmarks(face: &DetectedFace) -> Result<&Landmarks, RecognizerError> {
    face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)
}

/// Pack an aligned 112×112 RGB crop into an NCHW tensor, mapping each
/// channel value through `normalize`.
pub(crate) fn crop_to_tensor(crop: &RgbImage, normalize: impl Fn(u8) -> f32) -> Array4<f32> {
    let (width, height) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = normalize(pixel[c]);
        }
    }
    tensor
}

/// Fail when a model's flattened output is not `expected` long.
pub(crate) fn check_dim(values: &[f32], expected: usize) -> Result<(), RecognizerError> {
    if values.len() != expected {
        return Err(RecognizerError::EmbeddingShape {
            expected,
            got: values.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use image::Rgb;

    /// Embeds a face as the mean colour of its box plus its confidence.
    struct MeanColour;

    impl FaceRecognizer for MeanColour {
        fn kind(&self) -> RecognizerKind {
            RecognizerKind::SFace
        }

        fn infer(&self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, RecognizerError> {
            alignment_landmarks(face)?;
            let p = image.get_pixel(face.bbox.x as u32, face.bbox.y as u32);
            Ok(Embedding::new(
                vec![p[0] as f32, p[1] as f32, p[2] as f32, face.confidence],
                "mean",
            ))
        }
    }

    fn face() -> DetectedFace {
        DetectedFace::new(
            BoundingBox { x: 1.0, y: 1.0, w: 4.0, h: 4.0 },
            Some(Landmarks::from_points([[2.0, 2.0]; 5])),
            0.5,
        )
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in RecognizerKind::ALL {
            assert_eq!(kind.name().parse::<RecognizerKind>().unwrap(), kind);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{kind}\""));
        }
        let err = "facenet".parse::<RecognizerKind>().unwrap_err();
        assert_eq!(err.what, "recognizer");
    }

    #[test]
    fn test_embedding_dims() {
        assert_eq!(RecognizerKind::SFace.embedding_dim(), 128);
        assert_eq!(RecognizerKind::ArcFace.embedding_dim(), 512);
    }

    #[test]
    fn test_match_faces_identical_is_one() {
        let image = RgbImage::from_pixel(8, 8, Rgb([10, 200, 30]));
        let score = MeanColour.match_faces(&image, &face(), &image, &face()).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_alignment_landmarks() {
        let with = face();
        assert_eq!(alignment_landmarks(&with).unwrap(), with.landmarks.as_ref().unwrap());

        let without = DetectedFace { landmarks: None, ..face() };
        assert!(matches!(alignment_landmarks(&without), Err(RecognizerError::NoLandmarks)));

        let image = RgbImage::new(8, 8);
        assert!(matches!(MeanColour.match_faces(&image, &face(), &image, &without), Err(RecognizerError::NoLandmarks)));
    }

    #[test]
    fn test_match_faces_symmetric() {
        let a = RgbImage::from_pixel(8, 8, Rgb([10, 200, 30]));
        let b = RgbImage::from_pixel(8, 8, Rgb([90, 20, 140]));
        let ab = MeanColour.match_faces(&a, &face(), &b, &face()).unwrap();
        let ba = MeanColour.match_faces(&b, &face(), &a, &face()).unwrap();
        assert_eq!(ab, ba);
        assert!(ab < 1.0);
    }

    #[test]
    fn test_match_faces_propagates_missing_landmarks() {
        let image = RgbImage::new(8, 8);
        let mut bare = face();
        bare.landmarks = None;
        let err = MeanColour.match_faces(&image, &face(), &image, &bare).unwrap_err();
        assert!(matches!(err, RecognizerError::NoLandmarks));
    }

    #[test]
    fn test_crop_to_tensor_layout() {
        let mut crop = RgbImage::new(3, 2);
        crop.put_pixel(2, 1, Rgb([1, 2, 3]));
        let tensor = crop_to_tensor(&crop, |v| v as f32 * 10.0);
        assert_eq!(tensor.shape(), &[1, 3, 2, 3]);
        assert_eq!(tensor[[0, 0, 1, 2]], 10.0);
        assert_eq!(tensor[[0, 1, 1, 2]], 20.0);
        assert_eq!(tensor[[0, 2, 1, 2]], 30.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_check_dim() {
        assert!(check_dim(&[0.0; 128], 128).is_ok());
        let err = check_dim(&[0.0; 127], 128).unwrap_err();
        assert!(matches!(err, RecognizerError::EmbeddingShape { expected: 128, got: 127 }));
    }
}
