//! Deterministic in-process detectors and recognizers for driving the
//! orchestrator without model files.

#![allow(dead_code)]

use facekit_core::detector::DetectorError;
use facekit_core::recognizer::RecognizerError;
use facekit_core::{
    BoundingBox, DetectedFace, DetectorKind, Embedding, FaceDetector, FaceRecognizer, FaceService, Landmarks,
    ModelRegistry, RecognizerKind,
};
use image::{Rgb, RgbImage};
use std::sync::{Arc, Mutex};

type Script = Box<dyn Fn(&RgbImage) -> Vec<f32> + Send + Sync>;

/// Returns one face per confidence produced by its script, keeping those
/// at or above the requested threshold. Records every call.
pub struct ScriptedDetector {
    kind: DetectorKind,
    script: Script,
    calls: Mutex<Vec<DetectCall>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectCall {
    pub width: u32,
    pub height: u32,
    pub threshold: f32,
}

impl ScriptedDetector {
    pub fn new(kind: DetectorKind, script: impl Fn(&RgbImage) -> Vec<f32> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always reports `n` faces with confidence 0.95.
    pub fn fixed(kind: DetectorKind, n: usize) -> Arc<Self> {
        Self::new(kind, move |_| vec![0.95; n])
    }

    pub fn calls(&self) -> Vec<DetectCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl FaceDetector for ScriptedDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&self, image: &RgbImage, threshold: f32) -> Result<Vec<DetectedFace>, DetectorError> {
        self.calls.lock().unwrap().push(DetectCall {
            width: image.width(),
            height: image.height(),
            threshold,
        });
        Ok((self.script)(image)
            .into_iter()
            .enumerate()
            .filter(|(_, conf)| *conf >= threshold)
            .map(|(i, conf)| face_at(2.0 + i as f32 * 12.0, 2.0, conf))
            .collect())
    }
}

pub fn face_at(x: f32, y: f32, confidence: f32) -> DetectedFace {
    DetectedFace::new(
        BoundingBox { x, y, w: 10.0, h: 10.0 },
        Some(Landmarks::from_points([
            [x + 3.0, y + 3.5],
            [x + 7.0, y + 3.5],
            [x + 5.0, y + 5.5],
            [x + 3.5, y + 7.5],
            [x + 6.5, y + 7.5],
        ])),
        confidence,
    )
}

/// Embeds a face as a function of the image's mean colour.
///
/// Identical images give identical embeddings; the length matches the kind.
pub struct ColourRecognizer {
    kind: RecognizerKind,
    calls: Mutex<Vec<(u32, u32)>>,
}

impl ColourRecognizer {
    pub fn new(kind: RecognizerKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Dimensions of every image passed to `infer`.
    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FaceRecognizer for ColourRecognizer {
    fn kind(&self) -> RecognizerKind {
        self.kind
    }

    fn infer(&self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, RecognizerError> {
        face.landmarks.ok_or(RecognizerError::NoLandmarks)?;
        self.calls.lock().unwrap().push(image.dimensions());

        let mut mean = [0.0f32; 3];
        for pixel in image.pixels() {
            for c in 0..3 {
                mean[c] += pixel[c] as f32;
            }
        }
        let n = (image.width() * image.height()).max(1) as f32;
        let values = (0..self.kind.embedding_dim())
            .map(|i| mean[i % 3] / n + 1.0 + (i % 7) as f32)
            .collect();
        Ok(Embedding::new(values, "colour"))
    }
}

pub fn service(detector: Arc<ScriptedDetector>, recognizer: Arc<ColourRecognizer>) -> FaceService {
    let registry = ModelRegistry::new().with_detector(detector).with_recognizer(recognizer);
    FaceService::new(Arc::new(registry))
}

pub fn solid(width: u32, height: u32, colour: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(colour))
}
