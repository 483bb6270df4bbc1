//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three feature strides followed by greedy
//! non-maximum suppression. Input images are RGB of any size; they are
//! resized into the top-left corner of a square 640×640 canvas.

use crate::types::{FaceBox, FaceDescriptor, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image is empty")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor positions for one stride: (score, bbox, kps).
type LevelOutputs = (usize, usize, usize);

/// Raw network outputs for a single stride level.
struct Level<'a> {
    stride: usize,
    scores: &'a [f32],
    boxes: &'a [f32],
    kps: &'a [f32],
}

pub struct ScrfdDetector {
    session: Session,
    levels: [LevelOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }

        let levels = map_outputs(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?levels, "loaded SCRFD model");

        Ok(Self { session, levels })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let (input, scale) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(self.levels.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let level = Level {
                stride,
                scores: extract(score_idx, "scores")?,
                boxes: extract(bbox_idx, "boxes")?,
                kps: extract(kps_idx, "landmarks")?,
            };
            decode_level(&level, scale, SCRFD_SCORE_THRESHOLD, &mut candidates);
        }

        let faces = suppress_overlaps(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection done");
        Ok(faces)
    }
}

/// Resize into the top-left of the square input canvas and normalise to NCHW.
///
/// Returns the tensor and the scale factor from image to canvas coordinates.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let size = SCRFD_INPUT_SIZE;
    let scale = (size as f32 / image.width() as f32).min(size as f32 / image.height() as f32);
    let new_w = ((image.width() as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((image.height() as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Padding stays at 0.0, which is the normalised value of SCRFD_MEAN.
    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, scale)
}

/// Map output tensors to stride levels by name ("score_8", "bbox_16", ...).
///
/// Exports with generic numeric names fall back to the standard order:
/// scores for strides 8/16/32, then boxes, then landmarks.
fn map_outputs(names: &[String]) -> [LevelOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<LevelOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((position("score", s)?, position("bbox", s)?, position("kps", s)?)))
        .collect();

    match named.as_deref() {
        Some(&[l8, l16, l32]) => [l8, l16, l32],
        _ => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Decode every anchor above `threshold` for one stride, in image coordinates.
fn decode_level(level: &Level<'_>, scale: f32, threshold: f32, out: &mut Vec<FaceDescriptor>) {
    let grid = SCRFD_INPUT_SIZE as usize / level.stride;
    let stride = level.stride as f32;
    let to_image = |v: f32| v / scale;

    for (anchor, &score) in level.scores.iter().enumerate().take(grid * grid * SCRFD_ANCHORS_PER_CELL) {
        if score < threshold {
            continue;
        }
        let (Some(b), Some(k)) = (
            level.boxes.get(anchor * 4..anchor * 4 + 4),
            level.kps.get(anchor * 10..anchor * 10 + 10),
        ) else {
            continue;
        };

        let cell = anchor / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * stride;
        let cy = (cell / grid) as f32 * stride;

        let bbox = FaceBox::from_corners(
            to_image(cx - b[0] * stride),
            to_image(cy - b[1] * stride),
            to_image(cx + b[2] * stride),
            to_image(cy + b[3] * stride),
        );

        let mut landmarks: Landmarks = [(0.0, 0.0); 5];
        for (i, point) in landmarks.iter_mut().enumerate() {
            *point = (
                to_image(cx + k[i * 2] * stride),
                to_image(cy + k[i * 2 + 1] * stride),
            );
        }

        out.push(FaceDescriptor {
            bbox,
            score,
            landmarks,
            embedding: None,
        });
    }
}

/// Greedy NMS: keep the best-scoring face, drop anything overlapping it too much.
fn suppress_overlaps(mut faces: Vec<FaceDescriptor>, iou_threshold: f32) -> Vec<FaceDescriptor> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<FaceDescriptor> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| k.bbox.iou(&face.bbox) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}
