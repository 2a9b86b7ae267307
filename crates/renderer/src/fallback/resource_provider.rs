//! Resource creation for trees rendered by this crate.

use anyhow::{Result as AnyResult, ensure};
use render_tree::{AlphaFormat, Font, GlyphBuffer, Image, ImageData, ResourceProvider};
use std::sync::Arc;

/// Creates images, fonts and glyph buffers usable by both the hardware
/// path and the software fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareResourceProvider;

impl SoftwareResourceProvider {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn premultiply(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        let alpha = u16::from(pixel[3]);
        for channel in &mut pixel[..3] {
            *channel = ((u16::from(*channel) * alpha + 127) / 255) as u8;
        }
    }
}

impl ResourceProvider for SoftwareResourceProvider {
    fn create_image(&self, data: ImageData) -> AnyResult<Arc<Image>> {
        let expected = data.size.area() * 4;
        ensure!(
            data.pixels.len() as u64 == expected,
            "image of {}x{} needs {expected} bytes, got {}",
            data.size.width,
            data.size.height,
            data.pixels.len()
        );
        let mut pixels = data.pixels;
        if data.alpha_format == AlphaFormat::Unpremultiplied {
            premultiply(&mut pixels);
        }
        Ok(Arc::new(Image::from_premultiplied(data.size, pixels)))
    }

    fn create_font(&self, size: f32) -> Font {
        Font::new(size)
    }

    fn create_glyph_buffer(&self, text: &str, font: Font) -> Arc<GlyphBuffer> {
        Arc::new(GlyphBuffer::new(text, font))
    }
}
