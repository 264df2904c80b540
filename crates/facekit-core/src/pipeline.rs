//! Pipeline orchestration: detect-only, detect-and-embed, embed-given-geometry
//! and two-image verification.
//!
//! Request-level problems (bad input, no usable face) come back as
//! [`Outcome::Invalid`]. Model and inference failures are [`PipelineError`].

use crate::detector::{rescale, ConfiguredDetector, DetectorError, DetectorKind, DEFAULT_SCALE_FACTOR};
use crate::recognizer::{FaceRecognizer, RecognizerError, RecognizerKind};
use crate::registry::ModelRegistry;
use crate::types::{DetectedFace, NameError};
use crate::validation::{resolve_threshold, validate_face_records, ValidationErrors};
use image::RgbImage;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub const FIELD_IMAGE: &str = "image";
pub const FIELD_IMAGE_1: &str = "image_1";
pub const FIELD_IMAGE_2: &str = "image_2";

const MSG_NO_SINGLE_FACE: &str = "No face or multiple faces found";
const MSG_NO_FACE: &str = "No face detected";
const MSG_INVALID_IMAGE: &str = "Invalid image";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0} model is not loaded")]
    ModelUnavailable(&'static str),
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Why a detector/recognizer pair cannot form a pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error(transparent)]
    UnknownName(#[from] NameError),
    #[error("{detector} detector provides no landmarks but {recognizer} aligns on them")]
    MissingLandmarks {
        detector: DetectorKind,
        recognizer: RecognizerKind,
    },
}

/// A supported detector + recognizer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pipeline {
    detector: DetectorKind,
    recognizer: RecognizerKind,
}

impl Pipeline {
    pub const YUNET_SFACE: Pipeline = Pipeline {
        detector: DetectorKind::YuNet,
        recognizer: RecognizerKind::SFace,
    };
    pub const RETINAFACE_ARCFACE: Pipeline = Pipeline {
        detector: DetectorKind::RetinaFace,
        recognizer: RecognizerKind::ArcFace,
    };
    pub const ALL: [Pipeline; 2] = [Pipeline::YUNET_SFACE, Pipeline::RETINAFACE_ARCFACE];

    pub fn new(detector: DetectorKind, recognizer: RecognizerKind) -> Result<Self, SelectionError> {
        if recognizer.requires_landmarks() && !detector.provides_landmarks() {
            return Err(SelectionError::MissingLandmarks { detector, recognizer });
        }
        let pipeline = Pipeline { detector, recognizer };
        if !Self::ALL.contains(&pipeline) {
            return Err(NameError::new("pipeline", &pipeline.to_string(), &Self::names()).into());
        }
        Ok(pipeline)
    }

    pub fn detector(&self) -> DetectorKind {
        self.detector
    }

    pub fn recognizer(&self) -> RecognizerKind {
        self.recognizer
    }

    fn names() -> [&'static str; 2] {
        ["yunet+sface", "retinaface+arcface"]
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::YUNET_SFACE
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.detector, self.recognizer)
    }
}

impl FromStr for Pipeline {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || NameError::new("pipeline", s, &Self::names());
        let (det, rec) = s.split_once('+').ok_or_else(unknown)?;
        let detector = det.parse::<DetectorKind>().map_err(|_| unknown())?;
        let recognizer = rec.parse::<RecognizerKind>().map_err(|_| unknown())?;
        Pipeline::new(detector, recognizer)
    }
}

/// Result of a flow that can be rejected for request-level reasons.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome<T> {
    Ok(T),
    Invalid {
        errors: ValidationErrors,
        /// Dimensions of the rejected image, when the flow got far enough to know them.
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<ImageSize>,
    },
}

impl<T> Outcome<T> {
    pub fn invalid(field: &str, message: &str) -> Self {
        Outcome::Invalid {
            errors: ValidationErrors::single(field, message),
            meta: None,
        }
    }

    fn invalid_image(field: &str, message: &str, image: &RgbImage) -> Self {
        Outcome::Invalid {
            errors: ValidationErrors::single(field, message),
            meta: Some(ImageSize::of(image)),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            Outcome::Invalid { .. } => None,
        }
    }

    pub fn errors(&self) -> Option<&ValidationErrors> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Invalid { errors, .. } => Some(errors),
        }
    }

    pub fn meta(&self) -> Option<&ImageSize> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Invalid { meta, .. } => meta.as_ref(),
        }
    }
}

impl<T> From<ValidationErrors> for Outcome<T> {
    fn from(errors: ValidationErrors) -> Self {
        Outcome::Invalid { errors, meta: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageSize {
    pub image_width: u32,
    pub image_height: u32,
}

impl ImageSize {
    pub fn of(image: &RgbImage) -> Self {
        Self {
            image_width: image.width(),
            image_height: image.height(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMeta {
    pub image_width: u32,
    pub image_height: u32,
    pub face_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectResult {
    pub faces: Vec<DetectedFace>,
    pub meta: ImageMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleMeta {
    pub image_width: u32,
    pub image_height: u32,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectSingleResult {
    pub face: DetectedFace,
    pub meta: ScaleMeta,
}

/// A face record with its embedding attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedFace {
    #[serde(flatten)]
    pub face: DetectedFace,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedMeta {
    pub face_count: usize,
    /// Embedding length, 0 when no face was embedded.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedAllResult {
    pub faces: Vec<EmbeddedFace>,
    pub meta: EmbedMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedSingleResult {
    pub face: EmbeddedFace,
    pub meta: EmbedMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizeMeta {
    pub image_width: u32,
    pub image_height: u32,
    pub face_count: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFacesResult {
    pub faces: Vec<EmbeddedFace>,
    pub meta: RecognizeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyEmbeddings {
    pub image_1: Vec<f32>,
    pub image_2: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyMeta {
    pub model_detection: DetectorKind,
    pub model_recognition: RecognizerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyResult {
    pub similarity: f32,
    pub embedding: VerifyEmbeddings,
    pub meta: VerifyMeta,
}

/// Orchestrates detectors and recognizers from a shared registry.
///
/// Holds no per-request state; one instance serves concurrent callers.
#[derive(Clone)]
pub struct FaceService {
    registry: Arc<ModelRegistry>,
    scale_factor: f64,
}

impl FaceService {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            scale_factor: DEFAULT_SCALE_FACTOR,
        }
    }

    /// Divisor for the multiscale search; must be finite and greater than 1.
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    /// Detect every face in `image` with the given detector.
    pub fn detect(
        &self,
        image: &RgbImage,
        kind: DetectorKind,
        threshold: Option<f32>,
    ) -> Result<Outcome<DetectResult>, PipelineError> {
        let threshold = match resolve_threshold(kind, threshold) {
            Ok(t) => t,
            Err(errors) => return Ok(errors.into()),
        };
        let detector = ConfiguredDetector::with_threshold(self.registry.detector(kind)?, threshold);

        let faces = detector.detect(image)?;
        tracing::debug!(detector = %kind, threshold, faces = faces.len(), "detect");

        Ok(Outcome::Ok(DetectResult {
            meta: ImageMeta {
                image_width: image.width(),
                image_height: image.height(),
                face_count: faces.len(),
            },
            faces,
        }))
    }

    /// Multiscale search for exactly one face with the YuNet detector.
    pub fn detect_single(
        &self,
        image: &RgbImage,
        threshold: Option<f32>,
    ) -> Result<Outcome<DetectSingleResult>, PipelineError> {
        let kind = DetectorKind::YuNet;
        let threshold = match resolve_threshold(kind, threshold) {
            Ok(t) => t,
            Err(errors) => return Ok(errors.into()),
        };
        let detector = ConfiguredDetector::with_threshold(self.registry.detector(kind)?, threshold);

        let Some((face, scale)) = detector.detect_single_multiscale(image, self.scale_factor)? else {
            tracing::debug!(threshold, "detect_single: no usable face");
            return Ok(Outcome::invalid_image(FIELD_IMAGE, MSG_NO_FACE, image));
        };

        Ok(Outcome::Ok(DetectSingleResult {
            face,
            meta: ScaleMeta {
                image_width: image.width(),
                image_height: image.height(),
                scale,
            },
        }))
    }

    /// Detect every face and embed each one. No faces is a success.
    pub fn embed_all(&self, image: &RgbImage, pipeline: Pipeline) -> Result<Outcome<EmbedAllResult>, PipelineError> {
        let detector = ConfiguredDetector::new(self.registry.detector(pipeline.detector())?);
        let recognizer = self.registry.recognizer(pipeline.recognizer())?;

        let faces = detector.detect(image)?;
        let faces = embed_each(recognizer, image, faces)?;
        tracing::debug!(%pipeline, faces = faces.len(), "embed_all");

        Ok(Outcome::Ok(EmbedAllResult {
            meta: embed_meta(&faces),
            faces,
        }))
    }

    /// Resolve exactly one face and embed it.
    pub fn embed_single(
        &self,
        image: &RgbImage,
        pipeline: Pipeline,
    ) -> Result<Outcome<EmbedSingleResult>, PipelineError> {
        let detector = ConfiguredDetector::new(self.registry.detector(pipeline.detector())?);
        let recognizer = self.registry.recognizer(pipeline.recognizer())?;

        let Some((face, source)) = self.resolve_single(&detector, image)? else {
            return Ok(Outcome::invalid(FIELD_IMAGE, MSG_NO_SINGLE_FACE));
        };

        let embedding = recognizer.infer(&source, &face)?;
        let face = EmbeddedFace {
            face,
            embedding: embedding.values,
        };
        tracing::debug!(%pipeline, size = face.embedding.len(), "embed_single");

        Ok(Outcome::Ok(EmbedSingleResult {
            meta: EmbedMeta {
                face_count: 1,
                size: face.embedding.len(),
            },
            face,
        }))
    }

    /// Embed caller-supplied faces without running a detector.
    pub fn embed_faces(
        &self,
        image: &RgbImage,
        kind: RecognizerKind,
        faces: &[DetectedFace],
    ) -> Result<Outcome<EmbedFacesResult>, PipelineError> {
        if let Err(errors) = validate_face_records(faces) {
            return Ok(errors.into());
        }
        let recognizer = self.registry.recognizer(kind)?;

        let faces = embed_each(recognizer, image, faces.to_vec())?;
        tracing::debug!(recognizer = %kind, faces = faces.len(), "embed_faces");

        Ok(Outcome::Ok(EmbedFacesResult {
            meta: RecognizeMeta {
                image_width: image.width(),
                image_height: image.height(),
                face_count: faces.len(),
                size: faces.first().map_or(0, |f| f.embedding.len()),
            },
            faces,
        }))
    }

    /// Compare the single face of `image_1` with the single face of `image_2`.
    ///
    /// Both images are resolved before anything is embedded; the first one
    /// without exactly one face is reported and nothing is embedded.
    pub fn verify(
        &self,
        image_1: &RgbImage,
        image_2: &RgbImage,
        pipeline: Pipeline,
    ) -> Result<Outcome<VerifyResult>, PipelineError> {
        let detector = ConfiguredDetector::new(self.registry.detector(pipeline.detector())?);
        let recognizer = self.registry.recognizer(pipeline.recognizer())?;

        let Some((face_1, source_1)) = self.resolve_single(&detector, image_1)? else {
            tracing::debug!(%pipeline, "verify: image_1 rejected");
            return Ok(Outcome::invalid(FIELD_IMAGE_1, MSG_INVALID_IMAGE));
        };
        let Some((face_2, source_2)) = self.resolve_single(&detector, image_2)? else {
            tracing::debug!(%pipeline, "verify: image_2 rejected");
            return Ok(Outcome::invalid(FIELD_IMAGE_2, MSG_INVALID_IMAGE));
        };

        let embedding_1 = recognizer.infer(&source_1, &face_1)?;
        let embedding_2 = recognizer.infer(&source_2, &face_2)?;
        let similarity = recognizer.similarity(&embedding_1, &embedding_2);
        tracing::debug!(%pipeline, similarity, "verify");

        Ok(Outcome::Ok(VerifyResult {
            similarity,
            embedding: VerifyEmbeddings {
                image_1: embedding_1.values,
                image_2: embedding_2.values,
            },
            meta: VerifyMeta {
                model_detection: pipeline.detector(),
                model_recognition: pipeline.recognizer(),
            },
        }))
    }

    /// Find exactly one face, returning it with the image its coordinates
    /// refer to (rescaled when the multiscale search was used).
    fn resolve_single<'i>(
        &self,
        detector: &ConfiguredDetector<'_>,
        image: &'i RgbImage,
    ) -> Result<Option<(DetectedFace, Cow<'i, RgbImage>)>, PipelineError> {
        if detector.supports_multiscale() {
            let found = detector.detect_single_multiscale(image, self.scale_factor)?;
            return Ok(found.map(|(face, scale)| {
                let source = if scale == 1.0 {
                    Cow::Borrowed(image)
                } else {
                    Cow::Owned(rescale(image, scale))
                };
                (face, source)
            }));
        }

        let mut faces = detector.detect(image)?;
        if faces.len() != 1 {
            tracing::debug!(detector = %detector.kind(), faces = faces.len(), "expected exactly one face");
            return Ok(None);
        }
        Ok(faces.pop().map(|face| (face, Cow::Borrowed(image))))
    }
}

fn embed_each(
    recognizer: &dyn FaceRecognizer,
    image: &RgbImage,
    faces: Vec<DetectedFace>,
) -> Result<Vec<EmbeddedFace>, RecognizerError> {
    faces
        .into_iter()
        .map(|face| {
            let embedding = recognizer.infer(image, &face)?;
            Ok(EmbeddedFace {
                face,
                embedding: embedding.values,
            })
        })
        .collect()
}

fn embed_meta(faces: &[EmbeddedFace]) -> EmbedMeta {
    EmbedMeta {
        face_count: faces.len(),
        size: faces.first().map_or(0, |f| f.embedding.len()),
    }
}
