//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from aligned face crops,
//! using the insightface w600k_r50 ArcFace model.

use super::{alignment_landmarks, check_dim, crop_to_tensor, FaceRecognizer, RecognizerError, RecognizerKind};
use crate::alignment;
use crate::types::{DetectedFace, Embedding};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

// w600k_r50 input constants
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, not 128
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// ArcFace-based face recognizer.
pub struct ArcFaceRecognizer {
    session: Mutex<Session>,
}

impl ArcFaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl FaceRecognizer for ArcFaceRecognizer {
    fn kind(&self) -> RecognizerKind {
        RecognizerKind::ArcFace
    }

    fn infer(&self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, RecognizerError> {
        let landmarks = alignment_landmarks(face)?;

        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let mut session = self
            .session
            .lock()
            .map_err(|_| RecognizerError::InferenceFailed("ArcFace session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;
        check_dim(raw, ARCFACE_EMBEDDING_DIM)?;

        Ok(Embedding::new(raw.to_vec(), ARCFACE_MODEL_VERSION))
    }
}

/// Preprocess a 112x112 RGB aligned crop into a normalized NCHW tensor.
fn preprocess(aligned: &RgbImage) -> ndarray::Array4<f32> {
    crop_to_tensor(aligned, |v| (v as f32 - ARCFACE_MEAN) / ARCFACE_STD)
}
