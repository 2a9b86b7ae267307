//! Resources referenced by render-tree nodes and the provider interface
//! used by layout to create them.
//!
//! Images are stored as premultiplied RGBA8 so both the GPU path and the
//! software fallback can consume them without conversion.

use crate::math::{RectF, Size};
use anyhow::Result as AnyResult;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique image identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    fn next() -> Self {
        Self(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Alpha layout of pixel data handed to `ResourceProvider::create_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaFormat {
    Premultiplied,
    Unpremultiplied,
}

/// Raw RGBA8 pixel data for image creation.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub size: Size,
    pub alpha_format: AlphaFormat,
    pub pixels: Vec<u8>,
}

/// Decoded image ready for rasterization.
#[derive(Debug)]
pub struct Image {
    id: ImageId,
    size: Size,
    pixels: Vec<u8>,
}

impl Image {
    /// Wrap premultiplied RGBA8 pixels. The caller guarantees
    /// `pixels.len() == width * height * 4`.
    #[must_use]
    pub fn from_premultiplied(size: Size, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len() as u64, size.area() * 4);
        Self {
            id: ImageId::next(),
            size,
            pixels,
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> ImageId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    /// Premultiplied RGBA8 rows, top to bottom.
    #[inline]
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// A font at a fixed pixel size.
///
/// Glyphs use a fixed cell of 5x7 pixels plus one column of spacing and
/// one row of descent, scaled to the requested size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Font {
    size: f32,
}

impl Font {
    /// Rows per em of the glyph cell (7 rows of glyph plus 1 of descent).
    pub const UNITS_PER_EM: f32 = 8.0;

    #[inline]
    #[must_use]
    pub fn new(size: f32) -> Self {
        Self {
            size: size.max(1.0),
        }
    }

    #[inline]
    #[must_use]
    pub const fn size(self) -> f32 {
        self.size
    }

    /// Size of one glyph-cell unit in pixels.
    #[inline]
    #[must_use]
    pub fn unit(self) -> f32 {
        self.size / Self::UNITS_PER_EM
    }

    #[inline]
    #[must_use]
    pub fn advance(self) -> f32 {
        self.unit() * 6.0
    }

    #[inline]
    #[must_use]
    pub fn ascent(self) -> f32 {
        self.unit() * 7.0
    }

    #[inline]
    #[must_use]
    pub fn descent(self) -> f32 {
        self.unit()
    }
}

/// A shaped run of text. Coordinates are relative to the baseline origin.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphBuffer {
    text: String,
    font: Font,
    bounds: RectF,
}

impl GlyphBuffer {
    #[must_use]
    pub fn new(text: &str, font: Font) -> Self {
        let glyphs = text.chars().count() as f32;
        let bounds = RectF::new(
            0.0,
            -font.ascent(),
            glyphs * font.advance(),
            font.ascent() + font.descent(),
        );
        Self {
            text: text.to_owned(),
            font,
            bounds,
        }
    }

    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    #[must_use]
    pub const fn font(&self) -> Font {
        self.font
    }

    #[inline]
    #[must_use]
    pub const fn bounds(&self) -> RectF {
        self.bounds
    }
}

/// Factory for rasterizer-compatible resources, implemented by the
/// rasterizer backend and handed to layout.
pub trait ResourceProvider: Send + Sync {
    /// Create an image from RGBA8 pixels.
    ///
    /// # Errors
    /// Returns an error if the pixel buffer does not match the size.
    fn create_image(&self, data: ImageData) -> AnyResult<Arc<Image>>;

    /// Create a font at the given pixel size.
    fn create_font(&self, size: f32) -> Font;

    /// Lay out `text` with `font`.
    fn create_glyph_buffer(&self, text: &str, font: Font) -> Arc<GlyphBuffer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyph_buffer_bounds_follow_font_metrics() {
        let font = Font::new(16.0);
        let glyphs = GlyphBuffer::new("ABC", font);
        assert_eq!(glyphs.bounds(), RectF::new(0.0, -14.0, 36.0, 16.0));
    }

    #[test]
    fn image_ids_are_unique() {
        let first = Image::from_premultiplied(Size::new(1, 1), vec![0; 4]);
        let second = Image::from_premultiplied(Size::new(1, 1), vec![0; 4]);
        assert_ne!(first.id(), second.id());
    }
}
