//! YuNet face detector (`face_detection_yunet_2023mar`) via ONNX Runtime.
//!
//! Runs at the image's own resolution padded up to a multiple of 32. Each
//! of the three stride levels emits class, objectness, box and keypoint
//! tensors with one prior per grid cell.

use super::nms::nms;
use super::{DetectorError, DetectorKind, FaceDetector};
use crate::types::{BoundingBox, DetectedFace, Landmarks, Point};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

const YUNET_STRIDES: [usize; 3] = [8, 16, 32];
const YUNET_PAD_MULTIPLE: u32 = 32;
const YUNET_NMS_THRESHOLD: f32 = 0.3;
const YUNET_TOP_K: usize = 5000;
pub const YUNET_DEFAULT_THRESHOLD: f32 = 0.8;

/// Output tensor indices for one stride: (cls, obj, bbox, kps).
type LevelOutputIndices = (usize, usize, usize, usize);

/// Raw tensors of one stride level.
struct LevelOutputs<'a> {
    cls: &'a [f32],
    obj: &'a [f32],
    bbox: &'a [f32],
    kps: &'a [f32],
}

/// YuNet-based face detector. Supports multiscale search.
pub struct YuNetDetector {
    session: Mutex<Session>,
    level_indices: [LevelOutputIndices; 3],
}

impl YuNetDetector {
    /// Load the YuNet ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = %model_path.display(), outputs = ?output_names, "loaded YuNet model");

        if output_names.len() < 12 {
            return Err(DetectorError::InferenceFailed(format!(
                "YuNet model requires 12 outputs (3 strides × cls/obj/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let level_indices = discover_output_indices(&output_names);
        tracing::debug!(?level_indices, "YuNet output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            level_indices,
        })
    }
}

impl FaceDetector for YuNetDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::YuNet
    }

    fn detect(&self, image: &RgbImage, threshold: f32) -> Result<Vec<DetectedFace>, DetectorError> {
        let (pad_w, pad_h) = padded_size(image.width(), image.height());
        let input = preprocess(image, pad_w, pad_h);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("YuNet session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let extract = |idx: usize, what: &'static str, stride: usize| {
            outputs[idx]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
        };

        let mut candidates = Vec::new();
        for (pos, &stride) in YUNET_STRIDES.iter().enumerate() {
            let (cls_idx, obj_idx, bbox_idx, kps_idx) = self.level_indices[pos];
            let level = LevelOutputs {
                cls: extract(cls_idx, "cls", stride)?,
                obj: extract(obj_idx, "obj", stride)?,
                bbox: extract(bbox_idx, "bbox", stride)?,
                kps: extract(kps_idx, "kps", stride)?,
            };
            candidates.extend(decode_level(&level, stride, pad_w as usize, pad_h as usize, threshold)?);
        }

        let faces = nms(candidates, YUNET_NMS_THRESHOLD, YUNET_TOP_K);
        tracing::debug!(faces = faces.len(), threshold, width = image.width(), height = image.height(), "YuNet detect");
        Ok(faces)
    }
}

/// Round each side up to the next multiple of 32.
fn padded_size(width: u32, height: u32) -> (u32, u32) {
    let round_up = |v: u32| v.max(1).div_ceil(YUNET_PAD_MULTIPLE) * YUNET_PAD_MULTIPLE;
    (round_up(width), round_up(height))
}

/// Build the NCHW input: BGR channel order, raw 0-255 values, zero padding
/// on the right and bottom.
fn preprocess(image: &RgbImage, pad_w: u32, pad_h: u32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, pad_h as usize, pad_w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[2] as f32;
        tensor[[0, 1, y, x]] = pixel[1] as f32;
        tensor[[0, 2, y, x]] = pixel[0] as f32;
    }
    tensor
}

/// Map "cls_8", "obj_8", "bbox_8", "kps_8", ... to stride slots, falling
/// back to the positional export order [cls × 3, obj × 3, bbox × 3, kps × 3].
fn discover_output_indices(names: &[String]) -> [LevelOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));

    let mut named = [(0usize, 0usize, 0usize, 0usize); 3];
    for (slot, &stride) in named.iter_mut().zip(YUNET_STRIDES.iter()) {
        match (
            find("cls", stride),
            find("obj", stride),
            find("bbox", stride),
            find("kps", stride),
        ) {
            (Some(c), Some(o), Some(b), Some(k)) => *slot = (c, o, b, k),
            _ => {
                tracing::info!(?names, "YuNet: output names not recognized, using positional mapping");
                return [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)];
            }
        }
    }
    named
}

/// Decode one stride level. Coordinates are in input (= image) pixels since
/// padding only extends the right and bottom edges.
fn decode_level(
    level: &LevelOutputs<'_>,
    stride: usize,
    pad_w: usize,
    pad_h: usize,
    threshold: f32,
) -> Result<Vec<DetectedFace>, DetectorError> {
    let cols = pad_w / stride;
    let rows = pad_h / stride;
    let priors = cols * rows;

    if level.cls.len() < priors
        || level.obj.len() < priors
        || level.bbox.len() < priors * 4
        || level.kps.len() < priors * 10
    {
        return Err(DetectorError::InferenceFailed(format!(
            "YuNet stride {stride}: expected {priors} priors, got cls={} obj={} bbox={} kps={}",
            level.cls.len(),
            level.obj.len(),
            level.bbox.len() / 4,
            level.kps.len() / 10
        )));
    }

    let s = stride as f32;
    let mut faces = Vec::new();
    for idx in 0..priors {
        let cls = level.cls[idx].clamp(0.0, 1.0);
        let obj = level.obj[idx].clamp(0.0, 1.0);
        let score = (cls * obj).sqrt();
        if score < threshold {
            continue;
        }

        let col = (idx % cols) as f32;
        let row = (idx / cols) as f32;

        let b = &level.bbox[idx * 4..idx * 4 + 4];
        let cx = (col + b[0]) * s;
        let cy = (row + b[1]) * s;
        let w = b[2].exp() * s;
        let h = b[3].exp() * s;
        let bbox = BoundingBox { x: cx - w / 2.0, y: cy - h / 2.0, w, h };
        if !bbox.is_valid() {
            continue;
        }

        let k = &level.kps[idx * 10..idx * 10 + 10];
        let points: [Point; 5] = std::array::from_fn(|i| [(col + k[i * 2]) * s, (row + k[i * 2 + 1]) * s]);

        faces.push(DetectedFace::new(bbox, Some(Landmarks::from_points(points)), score));
    }

    Ok(faces)
}
