//! RetinaFace detector (insightface `det_10g`, SCRFD architecture) via ONNX Runtime.
//!
//! 3-stride anchor-based distance decoding with two anchors per cell,
//! followed by NMS.

use super::nms::nms;
use super::{DetectorError, DetectorKind, FaceDetector};
use crate::types::{BoundingBox, DetectedFace, Landmarks, Point};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

// det_10g preprocessing and decoding constants
const RETINAFACE_INPUT_SIZE: usize = 640;
const RETINAFACE_MEAN: f32 = 127.5;
const RETINAFACE_STD: f32 = 128.0;
const RETINAFACE_NMS_THRESHOLD: f32 = 0.4;
const RETINAFACE_STRIDES: [usize; 3] = [8, 16, 32];
const RETINAFACE_ANCHORS_PER_CELL: usize = 2;
pub const RETINAFACE_DEFAULT_THRESHOLD: f32 = 0.5;

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// RetinaFace-based face detector. Does not support multiscale search.
pub struct RetinaFaceDetector {
    session: Mutex<Session>,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl RetinaFaceDetector {
    /// Load the `det_10g` ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded RetinaFace model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "RetinaFace model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "RetinaFace output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            stride_indices,
        })
    }
}

impl FaceDetector for RetinaFaceDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::RetinaFace
    }

    /// Detections sorted by confidence, in `image` pixel coordinates.
    fn detect(&self, image: &RgbImage, threshold: f32) -> Result<Vec<DetectedFace>, DetectorError> {
        let (input, det_scale) = preprocess(image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("RetinaFace session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in RETINAFACE_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, det_scale, threshold)?);
        }

        let faces = nms(candidates, RETINAFACE_NMS_THRESHOLD, usize::MAX);
        tracing::debug!(faces = faces.len(), threshold, "RetinaFace detect");
        Ok(faces)
    }
}

/// Resize into the 640×640 canvas keeping aspect ratio, anchored top-left.
///
/// Returns the NCHW RGB tensor and the factor mapping original pixels to
/// canvas pixels. Padding stays at pixel value 0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let size = RETINAFACE_INPUT_SIZE;
    let (width, height) = image.dimensions();
    let im_ratio = height as f32 / width.max(1) as f32;

    let (new_w, new_h) = if im_ratio > 1.0 {
        (((size as f32 / im_ratio) as u32).max(1), size as u32)
    } else {
        (size as u32, ((size as f32 * im_ratio) as u32).max(1))
    };
    let det_scale = new_h as f32 / height.max(1) as f32;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_value = (0.0 - RETINAFACE_MEAN) / RETINAFACE_STD;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), pad_value);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - RETINAFACE_MEAN) / RETINAFACE_STD;
        }
    }

    (tensor, det_scale)
}

/// Discover output tensor ordering by name.
///
/// Exports may name tensors "score_8", "bbox_16", "kps_32", ... or use
/// generic numeric names. Falls back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0usize, 0usize, 0usize); 3];
    for (slot, &stride) in named.iter_mut().zip(RETINAFACE_STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => *slot = (s, b, k),
            _ => {
                tracing::info!(
                    ?names,
                    "RetinaFace: output names not recognized, using positional mapping"
                );
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

/// Decode detections for a single stride level into original image pixels.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    det_scale: f32,
    threshold: f32,
) -> Result<Vec<DetectedFace>, DetectorError> {
    let grid_w = RETINAFACE_INPUT_SIZE / stride;
    let grid_h = RETINAFACE_INPUT_SIZE / stride;
    let num_anchors = grid_h * grid_w * RETINAFACE_ANCHORS_PER_CELL;

    if scores.len() < num_anchors || bboxes.len() < num_anchors * 4 || kps.len() < num_anchors * 10 {
        return Err(DetectorError::InferenceFailed(format!(
            "RetinaFace stride {stride}: expected {num_anchors} anchors, got scores={} bboxes={} kps={}",
            scores.len(),
            bboxes.len() / 4,
            kps.len() / 10
        )));
    }

    let s = stride as f32;
    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores[idx];
        if score < threshold {
            continue;
        }

        let cell = idx / RETINAFACE_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * s;
        let anchor_y = (cell / grid_w) as f32 * s;

        // bbox distances: [left, top, right, bottom] in stride units
        let d = &bboxes[idx * 4..idx * 4 + 4];
        let bbox = BoundingBox::from_corners(
            (anchor_x - d[0] * s) / det_scale,
            (anchor_y - d[1] * s) / det_scale,
            (anchor_x + d[2] * s) / det_scale,
            (anchor_y + d[3] * s) / det_scale,
        );
        if !bbox.is_valid() {
            continue;
        }

        let k = &kps[idx * 10..idx * 10 + 10];
        let points: [Point; 5] = std::array::from_fn(|i| {
            [
                (anchor_x + k[i * 2] * s) / det_scale,
                (anchor_y + k[i * 2 + 1] * s) / det_scale,
            ]
        });

        detections.push(DetectedFace::new(bbox, Some(Landmarks::from_points(points)), score));
    }

    Ok(detections)
}
