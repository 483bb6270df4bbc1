//! Face alignment via a 4-DOF similarity transform.
//!
//! Faces are warped into the canonical crops the ArcFace encoder (112×112)
//! and the inswapper model (128×128) were trained on, then the swapped crop
//! is blended back into the original image.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// InsightFace reference landmarks for a 112×112 crop.
const ARCFACE_REFERENCE: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Reference landmarks scaled for a square crop of `size` pixels.
///
/// Sizes that are multiples of 112 scale the reference directly; other sizes
/// (128 for inswapper) treat it as a 128 grid with an 8px horizontal shift.
pub fn reference_landmarks(size: u32) -> Landmarks {
    let (ratio, shift_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    ARCFACE_REFERENCE.map(|(x, y)| (x * ratio + shift_x, y * ratio))
}

/// Similarity transform `p' = R·p + t` with `R = [[a, -b], [b, a]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst` (closed form on centred points).
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &Landmarks| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut denom = 0.0f32;
        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        for ((sx, sy), (dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            denom += sx * sx + sy * sy;
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
        }

        if denom < 1e-12 {
            // Degenerate landmarks: translate only.
            return Self {
                a: 1.0,
                b: 0.0,
                tx: mdx - msx,
                ty: mdy - msy,
            };
        }

        let a = num_a / denom;
        let b = num_b / denom;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, `None` when the scale collapses to zero.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        Some(Self {
            a: self.a / det,
            b: -self.b / det,
            tx: -(self.a * self.tx + self.b * self.ty) / det,
            ty: -(self.a * self.ty - self.b * self.tx) / det,
        })
    }

    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

/// Bilinear RGB sample; `None` outside the image.
fn sample(image: &RgbImage, x: f32, y: f32) -> Option<[f32; 3]> {
    let (w, h) = image.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let mut out = [0.0f32; 3];
    let corners = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x1, y0, fx * (1.0 - fy)),
        (x0, y1, (1.0 - fx) * fy),
        (x1, y1, fx * fy),
    ];
    for (cx, cy, weight) in corners {
        let Rgb(px) = image.get_pixel(cx, cy);
        for c in 0..3 {
            out[c] += px[c] as f32 * weight;
        }
    }
    Some(out)
}

/// Warp `image` into a `size`×`size` crop, where `to_crop` maps image
/// coordinates to crop coordinates. Pixels sourced from outside are black.
pub fn warp_to_crop(image: &RgbImage, to_crop: &Similarity, size: u32) -> RgbImage {
    let mut crop = RgbImage::new(size, size);
    if image.width() == 0 || image.height() == 0 {
        return crop;
    }
    let Some(from_crop) = to_crop.inverse() else {
        return crop;
    };

    for (ox, oy, pixel) in crop.enumerate_pixels_mut() {
        let (sx, sy) = from_crop.apply(ox as f32, oy as f32);
        if let Some(rgb) = sample(image, sx, sy) {
            *pixel = Rgb(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8));
        }
    }
    crop
}

/// Blend a (swapped) crop back into `target`.
///
/// `to_crop` is the same transform used to cut the crop out. The blend weight
/// ramps linearly from 0 at the crop border to 1 at `feather` pixels inside it,
/// so the seam fades instead of showing a hard square.
pub fn paste_back(target: &mut RgbImage, crop: &RgbImage, to_crop: &Similarity, feather: f32) {
    let Some(from_crop) = to_crop.inverse() else {
        return;
    };
    let size = crop.width().min(crop.height());
    if size == 0 || target.width() == 0 || target.height() == 0 {
        return;
    }
    let edge = (size - 1) as f32;

    // Target-space bounds of the crop square.
    let corners = [(0.0, 0.0), (edge, 0.0), (0.0, edge), (edge, edge)]
        .map(|(x, y)| from_crop.apply(x, y));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as u32)
        .min(target.width() - 1);
    let max_y = (corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as u32)
        .min(target.height() - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let (u, v) = to_crop.apply(x as f32, y as f32);
            let border = u.min(v).min(edge - u).min(edge - v);
            if border < 0.0 {
                continue;
            }
            let weight = if feather > 0.0 {
                (border / feather).clamp(0.0, 1.0)
            } else {
                1.0
            };
            if weight <= 0.0 {
                continue;
            }
            let Some(swapped) = sample(crop, u, v) else {
                continue;
            };
            let original = target.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = swapped[c] * weight + original.0[c] as f32 * (1.0 - weight);
                original.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Cut the canonical `size`×`size` crop for a face with the given landmarks.
pub fn align_face(image: &RgbImage, landmarks: &Landmarks, size: u32) -> (RgbImage, Similarity) {
    let to_crop = Similarity::estimate(landmarks, &reference_landmarks(size));
    (warp_to_crop(image, &to_crop, size), to_crop)
}
