//! faceswap-core — face detection, identity encoding and face swapping.
//!
//! SCRFD finds faces, ArcFace encodes the source identity and inswapper
//! renders it onto each target face, all on ONNX Runtime (CPU). The request
//! path only sees the [`FaceTransform`] trait.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod swapper;
pub mod transform;
pub mod types;

pub use transform::{draw_faces, FaceTransform, OnnxFaceTransform, TransformError};
pub use types::{Embedding, FaceBox, FaceDescriptor, Landmarks};

use std::path::{Path, PathBuf};

/// Locations of the model files a [`OnnxFaceTransform`] needs.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub encoder: PathBuf,
    pub swapper: PathBuf,
    /// Raw little-endian f32 512×512 matrix paired with the swapper.
    pub emap: PathBuf,
}

impl ModelPaths {
    /// Standard InsightFace file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join("det_10g.onnx"),
            encoder: dir.join("w600k_r50.onnx"),
            swapper: dir.join("inswapper_128.onnx"),
            emap: dir.join("inswapper_128.emap"),
        }
    }
}

/// `~/.insightface/models`, or `/tmp/.insightface/models` without `$HOME`.
pub fn default_model_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".insightface").join("models")
}
