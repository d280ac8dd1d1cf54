use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{Rgb, RgbImage};

use crate::error::ReplayResult;
use crate::imaging;

/// Glyph cell size of the built-in font
pub const GLYPH_SIZE: u32 = 8;

/// A drawable RGB surface backing [`MockDesktop`](super::MockDesktop)
///
/// - `fill()` - Fill the whole surface
/// - `draw_rect()` - Filled rectangle, clipped to the surface
/// - `draw_text()` - Text in font8x8 glyphs
/// - `get_pixel()` / `set_pixel()` - Direct pixel access
#[derive(Debug, Clone, PartialEq)]
pub struct Framebuffer {
    image: RgbImage,
}

impl Framebuffer {
    /// Black surface of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(color)),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_png_bytes(data: &[u8]) -> ReplayResult<Self> {
        Ok(Self::from_image(imaging::decode_rgb(data)?))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn fill(&mut self, color: [u8; 3]) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgb(color);
        }
    }

    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        let x_end = x.saturating_add(w).min(self.width());
        let y_end = y.saturating_add(h).min(self.height());
        for py in y..y_end {
            for px in x..x_end {
                self.image.put_pixel(px, py, Rgb(color));
            }
        }
    }

    /// Draw text starting at `(x, y)`; no wrapping, clipped at the right edge.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x >= self.width() {
                break;
            }
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += GLYPH_SIZE;
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            for bit in 0..GLYPH_SIZE {
                // LSB is the leftmost pixel
                let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                self.set_pixel(x + bit, py, color);
            }
        }
    }

    /// Pixel color; black outside the surface
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width() || y >= self.height() {
            return [0, 0, 0];
        }
        self.image.get_pixel(x, y).0
    }

    /// Set one pixel; ignored outside the surface
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x < self.width() && y < self.height() {
            self.image.put_pixel(x, y, Rgb(color));
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn to_png(&self) -> ReplayResult<Vec<u8>> {
        imaging::encode_png(&self.image)
    }
}
