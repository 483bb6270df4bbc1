//! ArcFace identity encoder via ONNX Runtime.
//!
//! Produces the 512-dimensional embedding inswapper uses as its source
//! identity. Faces are aligned to the canonical 112×112 crop first.

use crate::alignment;
use crate::types::{Embedding, Landmarks};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed the face located by `landmarks` in `image`.
    pub fn embed(&mut self, image: &RgbImage, landmarks: &Landmarks) -> Result<Embedding, EncoderError> {
        let (crop, _) = alignment::align_face(image, landmarks, ARCFACE_INPUT_SIZE);
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::from_raw(raw.to_vec(), Some(ARCFACE_MODEL_VERSION.to_string())))
    }
}

/// Aligned RGB crop → NCHW tensor with symmetric [-1, 1] normalisation.
fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}
