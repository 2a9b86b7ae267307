//! GPU textures for render-tree images.
//!
//! Each image is uploaded once and its texture reused for as long as the
//! image keeps being drawn. Textures not drawn during the previous frame
//! are deleted at the next `update`.

use crate::backend::{GpuDevice, TextureId};
use render_tree::{Image, ImageId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct CachedTexture {
    texture: TextureId,
    last_used_frame: u64,
}

#[derive(Debug, Default)]
pub struct ImageTextureCache {
    textures: HashMap<ImageId, CachedTexture>,
    frame: u64,
    uploads: u64,
}

impl ImageTextureCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new frame, deleting textures unused in the previous one.
    pub fn update(&mut self, gpu: &mut dyn GpuDevice) {
        let finished_frame = self.frame;
        self.frame += 1;
        self.textures.retain(|id, cached| {
            let keep = cached.last_used_frame >= finished_frame;
            if !keep {
                log::trace!(target: "renderer", "releasing texture for image {}", id.get());
                gpu.delete_texture(cached.texture);
            }
            keep
        });
    }

    /// Texture holding `image`, uploading it on first use.
    pub fn get_or_upload(&mut self, gpu: &mut dyn GpuDevice, image: &Image) -> TextureId {
        let frame = self.frame;
        let uploads = &mut self.uploads;
        let cached = self.textures.entry(image.id()).or_insert_with(|| {
            *uploads += 1;
            CachedTexture {
                texture: gpu.create_texture(image.size(), Some(image.pixels())),
                last_used_frame: frame,
            }
        });
        cached.last_used_frame = frame;
        cached.texture
    }

    /// Number of image uploads since creation.
    #[inline]
    #[must_use]
    pub const fn uploads(&self) -> u64 {
        self.uploads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Delete every texture. The context must be current.
    pub fn destroy(&mut self, gpu: &mut dyn GpuDevice) {
        for (_, cached) in self.textures.drain() {
            gpu.delete_texture(cached.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuDevice;
    use render_tree::Size;

    #[test]
    fn images_upload_once_and_age_out() {
        let mut gpu = CpuDevice::new();
        gpu.make_current(None);
        let image = Image::from_premultiplied(Size::new(1, 1), vec![255, 0, 0, 255]);
        let mut cache = ImageTextureCache::new();

        cache.update(&mut gpu);
        let texture = cache.get_or_upload(&mut gpu, &image);
        assert_eq!(cache.get_or_upload(&mut gpu, &image), texture);
        assert_eq!(cache.uploads(), 1);
        assert_eq!(gpu.texture_pixel(texture, 0, 0), Some([255, 0, 0, 255]));

        // Survives the frame after its last use, then goes.
        cache.update(&mut gpu);
        assert_eq!(cache.len(), 1);
        cache.update(&mut gpu);
        assert!(cache.is_empty());
        assert_eq!(gpu.texture_count(), 0);
    }
}
