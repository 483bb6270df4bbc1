//! The face transform capability consumed by the request path.

use crate::detector::{DetectorError, ScrfdDetector};
use crate::encoder::{ArcFaceEncoder, EncoderError};
use crate::swapper::{InSwapper, SwapperError};
use crate::types::FaceDescriptor;
use crate::ModelPaths;
use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder: {0}")]
    Encoder(#[from] EncoderError),
    #[error("swapper: {0}")]
    Swapper(#[from] SwapperError),
    #[error("source face has no identity embedding")]
    MissingEmbedding,
    #[error("{0}")]
    Backend(String),
}

/// Detect faces and swap one onto another.
///
/// Implementations hold inference sessions and are driven from a single
/// thread at a time, hence `&mut self` and `Send` without `Sync`.
pub trait FaceTransform: Send {
    /// Faces in `image`, best first. An empty list means no face was found.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, TransformError>;

    /// Return `target` with `source_face`'s identity rendered over `target_face`.
    fn swap(
        &mut self,
        target: &RgbImage,
        target_face: &FaceDescriptor,
        source_face: &FaceDescriptor,
    ) -> Result<RgbImage, TransformError>;
}

/// SCRFD + ArcFace + inswapper, all on ONNX Runtime (CPU).
pub struct OnnxFaceTransform {
    detector: ScrfdDetector,
    encoder: ArcFaceEncoder,
    swapper: InSwapper,
}

impl OnnxFaceTransform {
    /// Load all three models; fails fast if any file is missing.
    pub fn load(paths: &ModelPaths) -> Result<Self, TransformError> {
        Ok(Self {
            detector: ScrfdDetector::load(&paths.detector)?,
            encoder: ArcFaceEncoder::load(&paths.encoder)?,
            swapper: InSwapper::load(&paths.swapper, &paths.emap)?,
        })
    }
}

impl FaceTransform for OnnxFaceTransform {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceDescriptor>, TransformError> {
        let mut faces = self.detector.detect(image)?;
        for face in &mut faces {
            face.embedding = Some(self.encoder.embed(image, &face.landmarks)?);
        }
        Ok(faces)
    }

    fn swap(
        &mut self,
        target: &RgbImage,
        target_face: &FaceDescriptor,
        source_face: &FaceDescriptor,
    ) -> Result<RgbImage, TransformError> {
        let identity = source_face
            .embedding
            .as_ref()
            .ok_or(TransformError::MissingEmbedding)?;
        Ok(self.swapper.swap(target, target_face, identity)?)
    }
}

/// Copy of `image` with each face box outlined and its landmarks marked.
pub fn draw_faces(image: &RgbImage, faces: &[FaceDescriptor]) -> RgbImage {
    const BOX: Rgb<u8> = Rgb([0, 255, 0]);
    const MARK: Rgb<u8> = Rgb([255, 0, 0]);

    let mut out = image.clone();
    let (w, h) = out.dimensions();
    if w == 0 || h == 0 {
        return out;
    }
    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(h - 1);

    for face in faces {
        let b = face.bbox;
        let (x0, x1) = (clamp_x(b.x), clamp_x(b.x + b.width));
        let (y0, y1) = (clamp_y(b.y), clamp_y(b.y + b.height));
        for x in x0..=x1 {
            out.put_pixel(x, y0, BOX);
            out.put_pixel(x, y1, BOX);
        }
        for y in y0..=y1 {
            out.put_pixel(x0, y, BOX);
            out.put_pixel(x1, y, BOX);
        }
        for &(lx, ly) in &face.landmarks {
            let (cx, cy) = (clamp_x(lx), clamp_y(ly));
            for y in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                for x in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                    out.put_pixel(x, y, MARK);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceBox;

    #[test]
    fn draw_faces_outlines_box() {
        let image = RgbImage::new(50, 50);
        let face = FaceDescriptor {
            bbox: FaceBox { x: 10.0, y: 10.0, width: 20.0, height: 20.0 },
            score: 0.9,
            landmarks: [(20.0, 20.0); 5],
            embedding: None,
        };
        let out = draw_faces(&image, &[face]);
        assert_eq!(out.get_pixel(10, 15).0, [0, 255, 0]);
        assert_eq!(out.get_pixel(30, 30).0, [0, 255, 0]);
        assert_eq!(out.get_pixel(20, 20).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(5, 5).0, [0, 0, 0]);
        // Input is untouched
        assert_eq!(image.get_pixel(10, 15).0, [0, 0, 0]);
    }

    #[test]
    fn draw_faces_clamps_out_of_bounds_boxes() {
        let image = RgbImage::new(20, 20);
        let face = FaceDescriptor {
            bbox: FaceBox { x: -5.0, y: 15.0, width: 40.0, height: 40.0 },
            score: 0.5,
            landmarks: [(100.0, -3.0); 5],
            embedding: None,
        };
        let out = draw_faces(&image, &[face]);
        assert_eq!(out.get_pixel(0, 19).0, [0, 255, 0]);
    }

    #[test]
    fn missing_models_fail_fast() {
        let paths = ModelPaths::in_dir(std::path::Path::new("/nonexistent/models"));
        let err = OnnxFaceTransform::load(&paths).err().expect("load must fail");
        assert!(matches!(err, TransformError::Detector(DetectorError::ModelNotFound(_))));
    }
}
