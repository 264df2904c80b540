//! Face detector contract and its ONNX-backed variants.
//!
//! Every detector converts its model's native output into [`DetectedFace`]
//! values with landmarks in the fixed order left eye, right eye, nose, left
//! mouth corner, right mouth corner. Detector instances are immutable and
//! shared; the confidence threshold travels with each call.

pub mod multiscale;
mod nms;
pub mod retinaface;
pub mod yunet;

use crate::types::{DetectedFace, NameError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use multiscale::{rescale, scaled_dimensions, DEFAULT_SCALE_FACTOR};
pub use retinaface::RetinaFaceDetector;
pub use yunet::YuNetDetector;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}, download it and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{0} detector does not support single-face multiscale search")]
    MultiscaleUnsupported(DetectorKind),
    #[error("scale factor must be a finite value greater than 1, got {0}")]
    InvalidScaleFactor(f64),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The closed set of detector variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    YuNet,
    RetinaFace,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 2] = [DetectorKind::YuNet, DetectorKind::RetinaFace];

    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::YuNet => "yunet",
            DetectorKind::RetinaFace => "retinaface",
        }
    }

    /// Confidence threshold used when a request does not supply one.
    pub fn default_threshold(self) -> f32 {
        match self {
            DetectorKind::YuNet => yunet::YUNET_DEFAULT_THRESHOLD,
            DetectorKind::RetinaFace => retinaface::RETINAFACE_DEFAULT_THRESHOLD,
        }
    }

    /// Whether this kind can run the single-face multiscale search.
    pub fn supports_multiscale(self) -> bool {
        matches!(self, DetectorKind::YuNet)
    }

    /// Whether detections carry the five alignment landmarks.
    pub fn provides_landmarks(self) -> bool {
        match self {
            DetectorKind::YuNet | DetectorKind::RetinaFace => true,
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorKind {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectorKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| NameError::new("detector", s, &["yunet", "retinaface"]))
    }
}

/// A face detection model.
///
/// Implementations must be safe to share across threads; `detect` must not
/// depend on state left behind by earlier calls.
pub trait FaceDetector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Detect faces scoring at least `threshold`, in the model's output order.
    ///
    /// Finding no face is `Ok(vec![])`, never an error.
    fn detect(&self, image: &RgbImage, threshold: f32) -> Result<Vec<DetectedFace>, DetectorError>;

    fn supports_multiscale(&self) -> bool {
        self.kind().supports_multiscale()
    }
}

/// A request-scoped view of a shared detector with its own threshold.
///
/// `set_confidence_threshold` affects only this value, so concurrent
/// requests never observe each other's configuration.
#[derive(Clone, Copy)]
pub struct ConfiguredDetector<'a> {
    detector: &'a dyn FaceDetector,
    threshold: f32,
}

impl<'a> ConfiguredDetector<'a> {
    /// Use the detector kind's default threshold.
    pub fn new(detector: &'a dyn FaceDetector) -> Self {
        Self {
            threshold: detector.kind().default_threshold(),
            detector,
        }
    }

    pub fn with_threshold(detector: &'a dyn FaceDetector, threshold: f32) -> Self {
        Self { detector, threshold }
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.threshold
    }

    pub fn kind(&self) -> DetectorKind {
        self.detector.kind()
    }

    pub fn supports_multiscale(&self) -> bool {
        self.detector.supports_multiscale()
    }

    pub fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        self.detector.detect(image, self.threshold)
    }

    /// Find the largest scale (≤ 1) at which exactly one face is detected.
    ///
    /// Returns the face in the rescaled image's coordinates together with
    /// the scale, or `None` when no scale yields exactly one face. Calling
    /// this on a detector without multiscale support is an error.
    pub fn detect_single_multiscale(
        &self,
        image: &RgbImage,
        scale_factor: f64,
    ) -> Result<Option<(DetectedFace, f64)>, DetectorError> {
        if !self.supports_multiscale() {
            return Err(DetectorError::MultiscaleUnsupported(self.kind()));
        }
        multiscale::search(image, scale_factor, |scaled| self.detect(scaled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports one face per call when the threshold is at most 0.6.
    struct ThresholdProbe {
        kind: DetectorKind,
        calls: AtomicU32,
    }

    impl FaceDetector for ThresholdProbe {
        fn kind(&self) -> DetectorKind {
            self.kind
        }

        fn detect(&self, _image: &RgbImage, threshold: f32) -> Result<Vec<DetectedFace>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if threshold <= 0.6 {
                let bbox = BoundingBox { x: 1.0, y: 1.0, w: 8.0, h: 8.0 };
                Ok(vec![DetectedFace::new(bbox, None, 0.6)])
            } else {
                Ok(vec![])
            }
        }
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in DetectorKind::ALL {
            assert_eq!(kind.name().parse::<DetectorKind>().unwrap(), kind);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", kind.name()));
        }
        assert!("mtcnn".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn test_default_thresholds() {
        assert_eq!(DetectorKind::YuNet.default_threshold(), 0.8);
        assert_eq!(DetectorKind::RetinaFace.default_threshold(), 0.5);
    }

    #[test]
    fn test_multiscale_capability() {
        assert!(DetectorKind::YuNet.supports_multiscale());
        assert!(!DetectorKind::RetinaFace.supports_multiscale());
    }

    #[test]
    fn test_configured_threshold_is_request_scoped() {
        let probe = ThresholdProbe { kind: DetectorKind::YuNet, calls: AtomicU32::new(0) };
        let image = RgbImage::new(32, 32);

        let strict = ConfiguredDetector::new(&probe);
        let mut loose = ConfiguredDetector::new(&probe);
        loose.set_confidence_threshold(0.5);

        assert_eq!(strict.confidence_threshold(), 0.8);
        assert!(strict.detect(&image).unwrap().is_empty());
        assert_eq!(loose.detect(&image).unwrap().len(), 1);
        // The other handle is unaffected.
        assert!(strict.detect(&image).unwrap().is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_multiscale_unsupported_fails_loudly() {
        let probe = ThresholdProbe { kind: DetectorKind::RetinaFace, calls: AtomicU32::new(0) };
        let image = RgbImage::new(32, 32);
        let configured = ConfiguredDetector::new(&probe);

        let err = configured
            .detect_single_multiscale(&image, DEFAULT_SCALE_FACTOR)
            .unwrap_err();
        assert!(matches!(err, DetectorError::MultiscaleUnsupported(DetectorKind::RetinaFace)));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0, "no detection may run");
    }
}
