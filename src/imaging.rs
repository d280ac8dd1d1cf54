//! Small image helpers shared by frames, screenshots and the model client.

use image::{ImageBuffer, RgbImage, imageops};
use std::io::Cursor;

use crate::error::ReplayResult;

/// Encode an RGB image as PNG bytes
pub fn encode_png(img: &RgbImage) -> ReplayResult<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

/// Decode PNG (or any format `image` recognizes) into RGB
pub fn decode_rgb(data: &[u8]) -> ReplayResult<RgbImage> {
    Ok(image::load_from_memory(data)?.to_rgb8())
}

/// Target size for an image no wider than `max_width`, aspect ratio preserved.
pub fn fitted_size(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if max_width == 0 || width <= max_width {
        return (width, height);
    }
    let scale = max_width as f64 / width as f64;
    let scaled_height = ((height as f64) * scale).round().max(1.0) as u32;
    (max_width, scaled_height)
}

/// Downscale `img` so that it is at most `max_width` wide.
pub fn fit_width(img: &RgbImage, max_width: u32) -> RgbImage {
    let (w, h) = fitted_size(img.width(), img.height(), max_width);
    if (w, h) == img.dimensions() {
        return img.clone();
    }
    imageops::resize(img, w, h, imageops::FilterType::Triangle)
}

/// Build an RGB image from a raw row-major buffer, if the length matches.
pub fn from_raw_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<RgbImage> {
    ImageBuffer::from_raw(width, height, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fitted_size() {
        assert_eq!(fitted_size(1280, 800, 1280), (1280, 800));
        assert_eq!(fitted_size(2560, 1600, 1280), (1280, 800));
        assert_eq!(fitted_size(3840, 2160, 1280), (1280, 720));
        assert_eq!(fitted_size(640, 480, 0), (640, 480));
    }

    #[test]
    fn test_png_roundtrip_keeps_pixels() {
        let mut img = RgbImage::new(4, 3);
        img.put_pixel(2, 1, image::Rgb([10, 20, 30]));
        let png = encode_png(&img).unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
        let back = decode_rgb(&png).unwrap();
        assert_eq!(back.dimensions(), (4, 3));
        assert_eq!(back.get_pixel(2, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_fit_width_downscales() {
        let img = RgbImage::new(200, 100);
        let fitted = fit_width(&img, 50);
        assert_eq!(fitted.dimensions(), (50, 25));
    }
}
