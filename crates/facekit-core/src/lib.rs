//! facekit-core — face detection and recognition pipelines.
//!
//! Detectors (YuNet, RetinaFace) and recognizers (SFace, ArcFace) run via
//! ONNX Runtime on the CPU and are composed by [`FaceService`] into
//! detect, embed and verify flows.

pub mod alignment;
pub mod detector;
pub mod pipeline;
pub mod recognizer;
pub mod registry;
pub mod types;
pub mod validation;
pub mod visualize;

use std::path::PathBuf;

pub use detector::{ConfiguredDetector, DetectorError, DetectorKind, FaceDetector};
pub use pipeline::{FaceService, Outcome, Pipeline, PipelineError, SelectionError};
pub use recognizer::{FaceRecognizer, RecognizerError, RecognizerKind};
pub use registry::{ModelPaths, ModelRegistry};
pub use types::{BoundingBox, DetectedFace, Embedding, Landmarks, NameError};
pub use validation::ValidationErrors;

pub const YUNET_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RETINAFACE_MODEL_FILE: &str = "det_10g.onnx";
pub const SFACE_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Directory searched for model files when none is configured.
///
/// `FACEKIT_MODEL_DIR` if set, otherwise `$XDG_DATA_HOME/facekit/models`
/// (falling back to `~/.local/share`).
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACEKIT_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facekit")
        .join("models")
}
