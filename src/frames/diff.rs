//! Visual difference metric between two images.
//!
//! Both images are reduced to a fixed-size luma thumbnail; the metric is the
//! fraction of thumbnail pixels whose luma moved by more than a noise
//! tolerance. The result is in `0.0..=1.0` and independent of resolution.

use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};

/// Thumbnail width used for comparisons
pub const THUMB_WIDTH: u32 = 64;

/// Thumbnail height used for comparisons
pub const THUMB_HEIGHT: u32 = 36;

/// Luma delta below which a pixel counts as unchanged (compression noise)
pub const DEFAULT_NOISE_TOLERANCE: u8 = 12;

/// Rectangle in image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with an image of the given size; `None` if nothing is left.
    pub fn clip(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Region::new(self.x, self.y, w, h))
    }
}

/// Downsampled luma fingerprint of an image
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    luma: Vec<u8>,
}

impl Thumbnail {
    pub fn from_image(img: &RgbImage) -> Self {
        let small = imageops::resize(img, THUMB_WIDTH, THUMB_HEIGHT, imageops::FilterType::Triangle);
        let luma = small
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
            })
            .collect();
        Self { luma }
    }

    /// Thumbnail of one region of the image (the whole image if the region
    /// falls outside it).
    pub fn from_region(img: &RgbImage, region: Region) -> Self {
        match region.clip(img.width(), img.height()) {
            Some(r) => {
                let cropped = imageops::crop_imm(img, r.x, r.y, r.width, r.height).to_image();
                Self::from_image(&cropped)
            }
            None => Self::from_image(img),
        }
    }

    /// Fraction of pixels that differ by more than `tolerance`
    pub fn difference(&self, other: &Thumbnail, tolerance: u8) -> f32 {
        let changed = self
            .luma
            .iter()
            .zip(other.luma.iter())
            .filter(|(a, b)| a.abs_diff(**b) > tolerance)
            .count();
        changed as f32 / self.luma.len().max(1) as f32
    }
}

/// Difference ratio between two full images using the default tolerance
pub fn difference_ratio(a: &RgbImage, b: &RgbImage) -> f32 {
    Thumbnail::from_image(a).difference(&Thumbnail::from_image(b), DEFAULT_NOISE_TOLERANCE)
}
