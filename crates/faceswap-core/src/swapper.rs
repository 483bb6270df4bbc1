//! inswapper_128 face swapper via ONNX Runtime.
//!
//! The model takes a 128×128 aligned target crop plus a source "latent"
//! (the ArcFace embedding projected through the model's `emap` matrix) and
//! returns the crop re-rendered with the source identity. The crop is then
//! blended back into the full target image.
//!
//! ONNX Runtime does not expose graph initializers, so the 512×512 `emap`
//! matrix is read from a sidecar file of raw little-endian `f32` values in
//! row-major order.

use crate::alignment::{self, Similarity};
use crate::encoder::ARCFACE_EMBEDDING_DIM;
use crate::types::{l2_norm, Embedding, FaceDescriptor};
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: u32 = 128;
/// Width in crop pixels of the blend ramp at the crop border.
const PASTE_FEATHER: f32 = 12.0;

#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("emap file {path}: {reason}")]
    BadEmap { path: String, reason: String },
    #[error("source embedding has {0} values, expected 512")]
    EmbeddingSize(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct InSwapper {
    session: Session,
    emap: Array2<f32>,
}

impl InSwapper {
    pub fn load(model_path: &Path, emap_path: &Path) -> Result<Self, SwapperError> {
        if !model_path.exists() {
            return Err(SwapperError::ModelNotFound(model_path.display().to_string()));
        }
        let emap = load_emap(emap_path)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            emap = %emap_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded inswapper model"
        );

        Ok(Self { session, emap })
    }

    /// Render `source` onto `target_face` and return the composited image.
    pub fn swap(
        &mut self,
        target: &RgbImage,
        target_face: &FaceDescriptor,
        source: &Embedding,
    ) -> Result<RgbImage, SwapperError> {
        let latent = project_latent(source, &self.emap)?;

        let (crop, to_crop) = alignment::align_face(target, &target_face.landmarks, INSWAPPER_INPUT_SIZE);
        let crop_tensor = crop_to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![
            "target" => TensorRef::from_array_view(crop_tensor.view())?,
            "source" => TensorRef::from_array_view(latent.view())?
        ])?;
        let (_, rendered) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapperError::InferenceFailed(format!("swapped crop: {e}")))?;

        let swapped = tensor_to_crop(rendered, INSWAPPER_INPUT_SIZE)?;
        Ok(composite(target, &swapped, &to_crop))
    }
}

fn load_emap(path: &Path) -> Result<Array2<f32>, SwapperError> {
    let bad = |reason: String| SwapperError::BadEmap {
        path: path.display().to_string(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| bad(e.to_string()))?;
    let expected = ARCFACE_EMBEDDING_DIM * ARCFACE_EMBEDDING_DIM * 4;
    if bytes.len() != expected {
        return Err(bad(format!("expected {expected} bytes, found {}", bytes.len())));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Array2::from_shape_vec((ARCFACE_EMBEDDING_DIM, ARCFACE_EMBEDDING_DIM), values)
        .map_err(|e| bad(e.to_string()))
}

/// `latent = normalize(embedding · emap)`, shaped (1, 512).
fn project_latent(source: &Embedding, emap: &Array2<f32>) -> Result<Array2<f32>, SwapperError> {
    if source.values.len() != emap.nrows() {
        return Err(SwapperError::EmbeddingSize(source.values.len()));
    }
    let row = Array2::from_shape_vec((1, source.values.len()), source.values.clone())
        .map_err(|e| SwapperError::InferenceFailed(e.to_string()))?;
    let mut latent = row.dot(emap);
    let norm = l2_norm(latent.as_slice().unwrap_or(&[]));
    if norm > 0.0 {
        latent.mapv_inplace(|v| v / norm);
    }
    Ok(latent)
}

/// RGB crop → NCHW tensor in [0, 1].
fn crop_to_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Planar [0, 1] model output → RGB crop.
fn tensor_to_crop(data: &[f32], size: u32) -> Result<RgbImage, SwapperError> {
    let plane = (size * size) as usize;
    if data.len() < plane * 3 {
        return Err(SwapperError::InferenceFailed(format!(
            "expected {} output values, got {}",
            plane * 3,
            data.len()
        )));
    }
    Ok(RgbImage::from_fn(size, size, |x, y| {
        let i = (y * size + x) as usize;
        let channel = |c: usize| (data[c * plane + i] * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb([channel(0), channel(1), channel(2)])
    }))
}

fn composite(target: &RgbImage, swapped: &RgbImage, to_crop: &Similarity) -> RgbImage {
    let mut out = target.clone();
    alignment::paste_back(&mut out, swapped, to_crop, PASTE_FEATHER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_emap() -> Array2<f32> {
        Array2::eye(ARCFACE_EMBEDDING_DIM)
    }

    #[test]
    fn latent_is_unit_length() {
        let mut values = vec![0.0f32; ARCFACE_EMBEDDING_DIM];
        values[0] = 3.0;
        values[1] = 4.0;
        let source = Embedding { values, model_version: None };
        let latent = project_latent(&source, &(identity_emap() * 2.0)).unwrap();
        assert_eq!(latent.shape(), &[1, ARCFACE_EMBEDDING_DIM]);
        assert!((latent[[0, 0]] - 0.6).abs() < 1e-5);
        assert!((latent[[0, 1]] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn wrong_embedding_size_is_rejected() {
        let source = Embedding { values: vec![1.0; 10], model_version: None };
        let err = project_latent(&source, &identity_emap()).unwrap_err();
        assert!(matches!(err, SwapperError::EmbeddingSize(10)));
    }

    #[test]
    fn crop_tensor_round_trip() {
        let crop = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 200]));
        let tensor = crop_to_tensor(&crop);
        let data: Vec<f32> = tensor.iter().copied().collect();
        let back = tensor_to_crop(&data, 8).unwrap();
        assert_eq!(back, crop);
    }

    #[test]
    fn short_output_is_an_error() {
        assert!(tensor_to_crop(&[0.0; 10], 8).is_err());
    }

    #[test]
    fn emap_with_wrong_length_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.emap");
        std::fs::write(&path, [0u8; 16]).unwrap();

        let err = load_emap(&path).unwrap_err();
        assert!(matches!(err, SwapperError::BadEmap { .. }));
    }
}
