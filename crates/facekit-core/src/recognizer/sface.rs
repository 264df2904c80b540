//! SFace face recognizer (`face_recognition_sface_2021dec`) via ONNX Runtime.
//!
//! Produces 128-dimensional embeddings. The model takes the aligned crop as
//! raw 0-255 BGR values and emits a `[1, 128]` tensor.

use super::{alignment_landmarks, check_dim, FaceRecognizer, RecognizerError, RecognizerKind};
use crate::alignment;
use crate::types::{DetectedFace, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

pub const SFACE_EMBEDDING_DIM: usize = 128;
pub const SFACE_MODEL_VERSION: &str = "sface_2021dec";

pub struct SFaceRecognizer {
    session: Mutex<Session>,
}

impl SFaceRecognizer {
    /// Load the SFace ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded SFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl FaceRecognizer for SFaceRecognizer {
    fn kind(&self) -> RecognizerKind {
        RecognizerKind::SFace
    }

    fn infer(&self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, RecognizerError> {
        let landmarks = alignment_landmarks(face)?;

        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let mut session = self
            .session
            .lock()
            .map_err(|_| RecognizerError::InferenceFailed("SFace session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;
        let values = unwrap_batch(&shape[..], raw)?;

        Ok(Embedding::new(values, SFACE_MODEL_VERSION))
    }
}

/// Raw 0-255 BGR NCHW tensor, no normalization.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let (width, height) = aligned.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[2] as f32;
        tensor[[0, 1, y, x]] = pixel[1] as f32;
        tensor[[0, 2, y, x]] = pixel[0] as f32;
    }
    tensor
}

/// Flatten the `[1, 128]` model output into a plain vector.
fn unwrap_batch(shape: &[i64], raw: &[f32]) -> Result<Vec<f32>, RecognizerError> {
    match shape {
        [1, _] | [_] => {}
        other => {
            return Err(RecognizerError::InferenceFailed(format!(
                "unexpected SFace output shape {other:?}"
            )))
        }
    }
    check_dim(raw, SFACE_EMBEDDING_DIM)?;
    Ok(raw.to_vec())
}
