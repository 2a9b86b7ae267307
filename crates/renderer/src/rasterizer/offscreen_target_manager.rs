//! Cache of offscreen render targets shared by the hardware and fallback
//! rasterizers.
//!
//! Fallback-rasterized subtrees are packed into atlases: framebuffers the
//! size of the output target, each mirrored by a CPU `Canvas`. Entries are
//! keyed by node identity plus how the node is placed in its target, so a
//! subtree drawn again with the same placement reuses its pixels.
//!
//! When every atlas is full, the least recently used atlas holding nothing
//! from the current frame is emptied and reused. If all atlases are in use
//! this frame the request gets an uncached scratch target instead, released
//! at the next `update`.
//!
//! The manager also pools framebuffers used for hardware opacity groups.

use crate::backend::{FramebufferId, GpuDevice, TextureId};
use crate::fallback::Canvas;
use crate::rasterizer::shelf_allocator::ShelfAllocator;
use anyhow::{Result as AnyResult, anyhow};
use core::mem;
use render_tree::{Matrix3F, NodeId, Rect, Size};
use std::collections::{BTreeMap, HashMap};

/// Identity of a cached fallback rasterization.
///
/// `placement` holds the bits of the affine transform from node space to
/// target-rect space. Integer translations of the whole subtree therefore
/// keep the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffscreenTargetKey {
    pub node: NodeId,
    pub size: Size,
    placement: [u32; 6],
}

impl OffscreenTargetKey {
    #[must_use]
    pub fn new(node: NodeId, size: Size, placement: &Matrix3F) -> Self {
        let mut bits = [0u32; 6];
        for (index, bit) in bits.iter_mut().enumerate() {
            // Normalise -0.0 so equal placements hash equally.
            let value = placement.get(index / 3, index % 3) + 0.0;
            *bit = value.to_bits();
        }
        Self {
            node,
            size,
            placement: bits,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtlasId(u32);

/// A region of an atlas framebuffer holding one rasterized subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffscreenTarget {
    pub atlas: AtlasId,
    pub framebuffer: FramebufferId,
    pub texture: TextureId,
    pub framebuffer_size: Size,
    pub target_rect: Rect,
}

impl OffscreenTarget {
    /// Maps the unit square onto `target_rect` in texture coordinates:
    /// `[vw/fw, 0, tx/fw; 0, vh/fh, ty/fh; 0, 0, 1]`.
    #[must_use]
    pub fn texcoord_transform(&self) -> Matrix3F {
        let framebuffer_width = self.framebuffer_size.width.max(1) as f32;
        let framebuffer_height = self.framebuffer_size.height.max(1) as f32;
        Matrix3F::from_values(
            self.target_rect.width as f32 / framebuffer_width,
            0.0,
            self.target_rect.x as f32 / framebuffer_width,
            0.0,
            self.target_rect.height as f32 / framebuffer_height,
            self.target_rect.y as f32 / framebuffer_height,
            0.0,
            0.0,
            1.0,
        )
    }
}

/// A pooled framebuffer for hardware-composed opacity groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionTarget {
    pub framebuffer: FramebufferId,
    pub texture: TextureId,
    pub size: Size,
}

/// Counters describing cache behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffscreenCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub scratch_targets: u64,
    pub atlases_created: u64,
}

impl OffscreenCacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f32 / total as f32) * 100.0
        }
    }
}

#[derive(Debug)]
struct Atlas {
    framebuffer: FramebufferId,
    texture: TextureId,
    canvas: Canvas,
    allocator: ShelfAllocator,
    last_used_frame: u64,
    scratch: bool,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    atlas: AtlasId,
    rect: Rect,
}

#[derive(Debug)]
struct PooledTarget {
    target: CompositionTarget,
    in_use: bool,
    last_used_frame: u64,
}

/// Owns the offscreen atlases fallback content is cached in, plus the pool
/// of framebuffers hardware opacity groups compose into.
#[derive(Debug)]
pub struct OffscreenTargetManager {
    max_atlases: usize,
    target_size: Option<Size>,
    frame: u64,
    next_atlas_id: u32,
    atlases: BTreeMap<AtlasId, Atlas>,
    entries: HashMap<OffscreenTargetKey, CacheEntry>,
    composition_pool: Vec<PooledTarget>,
    stats: OffscreenCacheStats,
}

impl OffscreenTargetManager {
    /// Manager keeping at most `max_atlases` atlases alive between frames.
    #[must_use]
    pub fn new(max_atlases: usize) -> Self {
        Self {
            max_atlases: max_atlases.max(1),
            target_size: None,
            frame: 0,
            next_atlas_id: 0,
            atlases: BTreeMap::new(),
            entries: HashMap::new(),
            composition_pool: Vec::new(),
            stats: OffscreenCacheStats::default(),
        }
    }

    /// Start a new frame rendering into a target of `target_size`.
    ///
    /// Releases last frame's scratch targets and idle pooled framebuffers.
    /// A change of target size drops every atlas.
    pub fn update(&mut self, gpu: &mut dyn GpuDevice, target_size: Size) {
        let finished_frame = self.frame;
        self.frame += 1;

        let scratch: Vec<AtlasId> = self
            .atlases
            .iter()
            .filter(|(_, atlas)| atlas.scratch)
            .map(|(id, _)| *id)
            .collect();
        for id in scratch {
            self.delete_atlas(gpu, id);
        }

        self.composition_pool.retain(|pooled| {
            let keep = pooled.last_used_frame == finished_frame;
            if !keep {
                gpu.delete_framebuffer(pooled.target.framebuffer);
            }
            keep
        });
        for pooled in &mut self.composition_pool {
            pooled.in_use = false;
        }

        if self.target_size != Some(target_size) {
            if self.target_size.is_some() {
                log::debug!(
                    target: "renderer",
                    "target resized to {}x{}, dropping offscreen atlases",
                    target_size.width,
                    target_size.height
                );
            }
            self.drop_all(gpu);
            self.target_size = Some(target_size);
        }
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Look up a cached target. A hit marks its atlas as used this frame.
    pub fn get_cached_offscreen_target(
        &mut self,
        key: &OffscreenTargetKey,
    ) -> Option<OffscreenTarget> {
        let Some(entry) = self.entries.get(key).copied() else {
            self.stats.misses += 1;
            return None;
        };
        let atlas = self.atlases.get_mut(&entry.atlas)?;
        atlas.last_used_frame = self.frame;
        self.stats.hits += 1;
        log::trace!(target: "renderer", "offscreen cache hit for {:?}", key.node);
        Some(OffscreenTarget {
            atlas: entry.atlas,
            framebuffer: atlas.framebuffer,
            texture: atlas.texture,
            framebuffer_size: atlas.allocator.size(),
            target_rect: entry.rect,
        })
    }

    /// Allocate space for `key`, which must not already be cached.
    ///
    /// # Errors
    /// Returns an error if no canvas can be allocated for the request.
    ///
    /// # Panics
    /// Panics if `key` already has a cached entry.
    pub fn allocate_offscreen_target(
        &mut self,
        gpu: &mut dyn GpuDevice,
        key: OffscreenTargetKey,
    ) -> AnyResult<OffscreenTarget> {
        assert!(
            !self.entries.contains_key(&key),
            "offscreen target for {:?} allocated twice",
            key.node
        );
        let atlas_size = self
            .target_size
            .ok_or_else(|| anyhow!("offscreen allocation before update"))?;

        if atlas_size.contains(key.size) {
            if let Some(target) = self.pack_into_existing(key) {
                return Ok(target);
            }
            if self.atlas_count() < self.max_atlases {
                let id = self.create_atlas(gpu, atlas_size, false)?;
                if let Some(target) = self.pack_into(id, key) {
                    return Ok(target);
                }
            }
            let evicted = self.evict_lru_atlas();
            if let Some(target) = evicted.and_then(|id| self.pack_into(id, key)) {
                return Ok(target);
            }
        }

        log::warn!(
            target: "renderer",
            "offscreen atlases exhausted, using a scratch target for {:?} ({}x{})",
            key.node,
            key.size.width,
            key.size.height
        );
        self.stats.scratch_targets += 1;
        let id = self.create_atlas(gpu, key.size, true)?;
        self.pack_into(id, key)
            .ok_or_else(|| anyhow!("scratch target cannot hold its own request"))
    }

    fn atlas_count(&self) -> usize {
        self.atlases.values().filter(|atlas| !atlas.scratch).count()
    }

    fn pack_into_existing(&mut self, key: OffscreenTargetKey) -> Option<OffscreenTarget> {
        let frame = self.frame;
        let target = self
            .atlases
            .iter_mut()
            .filter(|(_, atlas)| !atlas.scratch)
            .find_map(|(id, atlas)| {
                let rect = atlas.allocator.allocate(key.size)?;
                atlas.last_used_frame = frame;
                Some(OffscreenTarget {
                    atlas: *id,
                    framebuffer: atlas.framebuffer,
                    texture: atlas.texture,
                    framebuffer_size: atlas.allocator.size(),
                    target_rect: rect,
                })
            })?;
        self.entries.insert(
            key,
            CacheEntry {
                atlas: target.atlas,
                rect: target.target_rect,
            },
        );
        Some(target)
    }

    fn pack_into(&mut self, id: AtlasId, key: OffscreenTargetKey) -> Option<OffscreenTarget> {
        let atlas = self.atlases.get_mut(&id)?;
        let rect = atlas.allocator.allocate(key.size)?;
        atlas.last_used_frame = self.frame;
        self.entries.insert(key, CacheEntry { atlas: id, rect });
        Some(OffscreenTarget {
            atlas: id,
            framebuffer: atlas.framebuffer,
            texture: atlas.texture,
            framebuffer_size: atlas.allocator.size(),
            target_rect: rect,
        })
    }

    fn create_atlas(
        &mut self,
        gpu: &mut dyn GpuDevice,
        size: Size,
        scratch: bool,
    ) -> AnyResult<AtlasId> {
        let canvas = Canvas::new(size)?;
        let framebuffer = gpu.create_framebuffer(size);
        let texture = gpu
            .framebuffer_texture(framebuffer)
            .ok_or_else(|| anyhow!("framebuffer {framebuffer:?} has no color texture"))?;
        let id = AtlasId(self.next_atlas_id);
        self.next_atlas_id += 1;
        if !scratch {
            self.stats.atlases_created += 1;
            log::debug!(
                target: "renderer",
                "created offscreen atlas {id:?} ({}x{})",
                size.width,
                size.height
            );
        }
        self.atlases.insert(
            id,
            Atlas {
                framebuffer,
                texture,
                canvas,
                allocator: ShelfAllocator::new(size),
                last_used_frame: self.frame,
                scratch,
            },
        );
        Ok(id)
    }

    /// Empty the least recently used atlas that holds nothing referenced by
    /// the current frame.
    fn evict_lru_atlas(&mut self) -> Option<AtlasId> {
        let frame = self.frame;
        let victim = self
            .atlases
            .iter()
            .filter(|(_, atlas)| !atlas.scratch && atlas.last_used_frame < frame)
            .min_by_key(|(_, atlas)| atlas.last_used_frame)
            .map(|(id, _)| *id)?;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.atlas != victim);
        if let Some(atlas) = self.atlases.get_mut(&victim) {
            atlas.allocator.reset();
        }
        self.stats.evictions += 1;
        log::debug!(
            target: "renderer",
            "evicted atlas {victim:?} holding {} entries",
            before - self.entries.len()
        );
        Some(victim)
    }

    fn delete_atlas(&mut self, gpu: &mut dyn GpuDevice, id: AtlasId) {
        if let Some(atlas) = self.atlases.remove(&id) {
            gpu.delete_framebuffer(atlas.framebuffer);
        }
        self.entries.retain(|_, entry| entry.atlas != id);
    }

    fn drop_all(&mut self, gpu: &mut dyn GpuDevice) {
        for (_, atlas) in mem::take(&mut self.atlases) {
            gpu.delete_framebuffer(atlas.framebuffer);
        }
        self.entries.clear();
        for pooled in self.composition_pool.drain(..) {
            gpu.delete_framebuffer(pooled.target.framebuffer);
        }
    }

    /// The CPU mirror of an atlas, for fallback rasterization.
    pub fn canvas_mut(&mut self, atlas: AtlasId) -> Option<&mut Canvas> {
        self.atlases.get_mut(&atlas).map(|atlas| &mut atlas.canvas)
    }

    /// Upload every region of the atlas canvas written since the last
    /// flush into its framebuffer. Returns the number of uploads.
    pub fn flush_canvas(&mut self, gpu: &mut dyn GpuDevice, atlas: AtlasId) -> usize {
        let Some(atlas) = self.atlases.get_mut(&atlas) else {
            return 0;
        };
        let dirty = atlas.canvas.take_dirty_rects();
        for rect in &dirty {
            let pixels = atlas.canvas.read_region(*rect);
            gpu.write_texture(atlas.texture, *rect, &pixels);
        }
        dirty.len()
    }

    /// A framebuffer of at least `size` for a hardware opacity group,
    /// reserved until the next `update`.
    ///
    /// # Errors
    /// Returns an error if the device creates a framebuffer without a color
    /// texture.
    pub fn acquire_composition_target(
        &mut self,
        gpu: &mut dyn GpuDevice,
        size: Size,
    ) -> AnyResult<CompositionTarget> {
        let size = Size::new(size.width.max(1), size.height.max(1));
        // Allow up to 25% slack to improve reuse.
        let max_width = size.width + size.width / 4;
        let max_height = size.height + size.height / 4;
        let frame = self.frame;
        if let Some(pooled) = self.composition_pool.iter_mut().find(|pooled| {
            let pooled_size = pooled.target.size;
            !pooled.in_use
                && pooled_size.contains(size)
                && pooled_size.width <= max_width
                && pooled_size.height <= max_height
        }) {
            pooled.in_use = true;
            pooled.last_used_frame = frame;
            return Ok(pooled.target);
        }

        let framebuffer = gpu.create_framebuffer(size);
        let Some(texture) = gpu.framebuffer_texture(framebuffer) else {
            gpu.delete_framebuffer(framebuffer);
            return Err(anyhow!("framebuffer {framebuffer:?} has no color texture"));
        };
        let target = CompositionTarget {
            framebuffer,
            texture,
            size,
        };
        self.composition_pool.push(PooledTarget {
            target,
            in_use: true,
            last_used_frame: frame,
        });
        Ok(target)
    }

    #[inline]
    #[must_use]
    pub const fn stats(&self) -> OffscreenCacheStats {
        self.stats
    }

    /// Number of cached entries, including this frame's scratch entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete every GPU object the manager owns. The context must be current.
    pub fn destroy(&mut self, gpu: &mut dyn GpuDevice) {
        self.drop_all(gpu);
        self.target_size = None;
    }
}
