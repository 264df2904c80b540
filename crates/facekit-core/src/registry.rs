//! Process-wide model registry.
//!
//! Built once at startup and shared behind `Arc`; lookups are by kind.

use crate::detector::{DetectorKind, FaceDetector, RetinaFaceDetector, YuNetDetector};
use crate::pipeline::PipelineError;
use crate::recognizer::{ArcFaceRecognizer, FaceRecognizer, RecognizerKind, SFaceRecognizer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Where each model file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub yunet: PathBuf,
    pub retinaface: PathBuf,
    pub sface: PathBuf,
    pub arcface: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            yunet: dir.join(crate::YUNET_MODEL_FILE),
            retinaface: dir.join(crate::RETINAFACE_MODEL_FILE),
            sface: dir.join(crate::SFACE_MODEL_FILE),
            arcface: dir.join(crate::ARCFACE_MODEL_FILE),
        }
    }
}

#[derive(Default)]
pub struct ModelRegistry {
    detectors: HashMap<DetectorKind, Arc<dyn FaceDetector>>,
    recognizers: HashMap<RecognizerKind, Arc<dyn FaceRecognizer>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `detector` under its own kind, replacing any previous one.
    pub fn with_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detectors.insert(detector.kind(), detector);
        self
    }

    /// Register `recognizer` under its own kind, replacing any previous one.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn FaceRecognizer>) -> Self {
        self.recognizers.insert(recognizer.kind(), recognizer);
        self
    }

    /// Load every model whose file exists.
    ///
    /// A missing file leaves that kind unregistered (requests needing it get
    /// `ModelUnavailable`); any other load failure is fatal.
    pub fn load(paths: &ModelPaths, intra_threads: usize) -> Result<Self, PipelineError> {
        let mut registry = Self::new();

        if paths.yunet.exists() {
            registry = registry.with_detector(Arc::new(YuNetDetector::load(&paths.yunet, intra_threads)?));
        } else {
            tracing::warn!(path = %paths.yunet.display(), "YuNet model missing; detector disabled");
        }
        if paths.retinaface.exists() {
            registry = registry.with_detector(Arc::new(RetinaFaceDetector::load(&paths.retinaface, intra_threads)?));
        } else {
            tracing::warn!(path = %paths.retinaface.display(), "RetinaFace model missing; detector disabled");
        }
        if paths.sface.exists() {
            registry = registry.with_recognizer(Arc::new(SFaceRecognizer::load(&paths.sface, intra_threads)?));
        } else {
            tracing::warn!(path = %paths.sface.display(), "SFace model missing; recognizer disabled");
        }
        if paths.arcface.exists() {
            registry = registry.with_recognizer(Arc::new(ArcFaceRecognizer::load(&paths.arcface, intra_threads)?));
        } else {
            tracing::warn!(path = %paths.arcface.display(), "ArcFace model missing; recognizer disabled");
        }

        tracing::info!(
            detectors = ?registry.detector_kinds(),
            recognizers = ?registry.recognizer_kinds(),
            "model registry ready"
        );
        Ok(registry)
    }

    pub fn detector(&self, kind: DetectorKind) -> Result<&dyn FaceDetector, PipelineError> {
        self.detectors
            .get(&kind)
            .map(|d| &**d)
            .ok_or_else(|| PipelineError::ModelUnavailable(kind.name()))
    }

    pub fn recognizer(&self, kind: RecognizerKind) -> Result<&dyn FaceRecognizer, PipelineError> {
        self.recognizers
            .get(&kind)
            .map(|r| &**r)
            .ok_or_else(|| PipelineError::ModelUnavailable(kind.name()))
    }

    /// Registered detector kinds in declaration order.
    pub fn detector_kinds(&self) -> Vec<DetectorKind> {
        DetectorKind::ALL.into_iter().filter(|k| self.detectors.contains_key(k)).collect()
    }

    pub fn recognizer_kinds(&self) -> Vec<RecognizerKind> {
        RecognizerKind::ALL.into_iter().filter(|k| self.recognizers.contains_key(k)).collect()
    }
}
