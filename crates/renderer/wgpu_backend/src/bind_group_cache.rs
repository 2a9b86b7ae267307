//! Bind group cache for textured draws.
//!
//! One bind group per texture, built the first time the texture is sampled
//! and dropped when the texture is deleted.

use renderer::TextureId;
use std::collections::HashMap;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindingResource, Device,
    Sampler, TextureView,
};

#[derive(Default)]
pub struct BindGroupCache {
    groups: HashMap<TextureId, BindGroup>,
    hits: usize,
    misses: usize,
}

impl BindGroupCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the bind group for `texture` unless it is cached.
    pub fn ensure(
        &mut self,
        device: &Device,
        layout: &BindGroupLayout,
        sampler: &Sampler,
        texture: TextureId,
        view: &TextureView,
    ) {
        if self.groups.contains_key(&texture) {
            self.hits += 1;
            return;
        }
        self.misses += 1;
        let group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("texture-bind-group"),
            layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(sampler),
                },
            ],
        });
        self.groups.insert(texture, group);
    }

    pub fn get(&self, texture: TextureId) -> Option<&BindGroup> {
        self.groups.get(&texture)
    }

    /// Forget the bind group of a deleted texture.
    pub fn invalidate(&mut self, texture: TextureId) {
        self.groups.remove(&texture);
    }

    #[inline]
    pub const fn hits(&self) -> usize {
        self.hits
    }

    #[inline]
    pub const fn misses(&self) -> usize {
        self.misses
    }

    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f32 / total as f32) * 100.0
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
