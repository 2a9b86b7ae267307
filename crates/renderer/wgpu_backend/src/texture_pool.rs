//! Reuse of framebuffer textures.
//!
//! Offscreen targets are created and deleted as atlases and composition
//! targets come and go. Deleted framebuffer textures are parked here and
//! handed back when a framebuffer of the same size and format is requested.

use render_tree::Size;
use wgpu::{
    Device, Extent3d, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
};

/// Textures kept at most, oldest dropped first.
const MAX_POOLED_TEXTURES: usize = 8;

#[derive(Debug, Default)]
pub struct TexturePool {
    available: Vec<(Size, Texture)>,
    reused: u64,
}

/// A texture usable as a framebuffer attachment, sampled and copied.
pub fn create_framebuffer_texture(device: &Device, size: Size, format: TextureFormat) -> Texture {
    device.create_texture(&TextureDescriptor {
        label: Some("framebuffer-texture"),
        size: Extent3d {
            width: size.width.max(1),
            height: size.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage: TextureUsages::RENDER_ATTACHMENT
            | TextureUsages::TEXTURE_BINDING
            | TextureUsages::COPY_DST
            | TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A parked texture of exactly `size` and `format`, if any.
    pub fn take(&mut self, size: Size, format: TextureFormat) -> Option<Texture> {
        let pos = self
            .available
            .iter()
            .position(|(pooled_size, texture)| *pooled_size == size && texture.format() == format)?;
        self.reused += 1;
        let (_, texture) = self.available.remove(pos);
        Some(texture)
    }

    /// Park a texture for reuse.
    pub fn return_texture(&mut self, texture: Texture, size: Size) {
        if self.available.len() >= MAX_POOLED_TEXTURES {
            self.available.remove(0);
        }
        self.available.push((size, texture));
    }

    pub fn clear(&mut self) {
        self.available.clear();
    }

    #[inline]
    pub const fn reused(&self) -> u64 {
        self.reused
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}
