use serde::{Deserialize, Serialize};

/// Five facial landmarks in image coordinates:
/// [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Axis-aligned face rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    /// Build a box from its two corners.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection-over-union with another box, 0.0 when the union is empty.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - overlap;
        if union > 0.0 {
            overlap / union
        } else {
            0.0
        }
    }
}

/// L2-normalised identity embedding (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Normalise raw model output to unit length. A zero vector is kept as-is.
    pub fn from_raw(raw: Vec<f32>, model_version: Option<String>) -> Self {
        let norm = l2_norm(&raw);
        let values = if norm > 0.0 {
            raw.into_iter().map(|v| v / norm).collect()
        } else {
            raw
        };
        Self {
            values,
            model_version,
        }
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }
}

pub(crate) fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// A face found by the detector.
///
/// Outside the model backend this is opaque: the request path only counts
/// descriptors and hands them back to [`crate::FaceTransform::swap`].
#[derive(Debug, Clone)]
pub struct FaceDescriptor {
    pub bbox: FaceBox,
    /// Detector confidence in [0, 1].
    pub score: f32,
    pub landmarks: Landmarks,
    /// Identity embedding, filled in by backends that need one for swapping.
    pub embedding: Option<Embedding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f32, y: f32, w: f32, h: f32) -> FaceBox {
        FaceBox { x, y, width: w, height: h }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = rect(10.0, 10.0, 50.0, 50.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(30.0, 30.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(5.0, 0.0, 10.0, 10.0);
        // 50 shared over 150 total
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn from_corners_clamps_inverted_boxes() {
        let b = FaceBox::from_corners(10.0, 10.0, 5.0, 20.0);
        assert_eq!(b.width, 0.0);
        assert_eq!(b.height, 10.0);
    }

    #[test]
    fn embedding_is_unit_length() {
        let e = Embedding::from_raw(vec![3.0, 4.0], None);
        assert!((e.norm() - 1.0).abs() < 1e-6);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn zero_embedding_stays_zero() {
        let e = Embedding::from_raw(vec![0.0, 0.0, 0.0], None);
        assert_eq!(e.values, vec![0.0, 0.0, 0.0]);
    }
}
