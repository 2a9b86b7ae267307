//! Frame orchestration for the hardware rasterizer.
//!
//! A `HardwareRasterizer` owns one GPU context and every cache tied to it.
//! Each `submit` turns a render tree into draw objects, lets the fallback
//! rasterizer fill any offscreen targets it needs, executes the offscreen
//! and onscreen phases, and presents the frame.

use crate::backend::{GpuDevice, GraphicsContext, RenderTarget};
use crate::config::RasterizerConfig;
use crate::fallback::{FallbackRasterizer, SoftwareRasterizer};
use crate::rasterizer::draw_object_manager::DrawObjectManager;
use crate::rasterizer::frame_rate_throttler::FrameRateThrottler;
use crate::rasterizer::graphics_state::GraphicsState;
use crate::rasterizer::image_texture_cache::ImageTextureCache;
use crate::rasterizer::offscreen_target_manager::{OffscreenCacheStats, OffscreenTargetManager};
use crate::rasterizer::render_tree_node_visitor::{RasterizeComponents, RenderTreeNodeVisitor};
use crate::rasterizer::shader_program_manager::ShaderProgramManager;
use anyhow::{Context as _, Result as AnyResult};
use render_tree::{Node, Rect, ResourceProvider};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Per-submit options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Region that changed since the previous frame. Only honoured when the
    /// target kept its contents across the last swap.
    pub dirty: Option<Rect>,
}

/// Work done for the most recent frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RasterizerMetrics {
    /// Wall time of the last submit in milliseconds, excluding throttling.
    pub frame_time_ms: f32,
    /// Device draw calls across both phases.
    pub draw_calls: u32,
    /// Vertices uploaded for the onscreen phase.
    pub vertices: u32,
    pub offscreen_hits: u32,
    pub offscreen_misses: u32,
    /// Subtrees drawn by the fallback rasterizer.
    pub fallback_rasterizations: u32,
    /// Opacity groups composed in hardware.
    pub composition_targets: u32,
    pub culled_nodes: u32,
    /// Canvas regions uploaded to offscreen framebuffers.
    pub canvas_uploads: u32,
}

/// Draws render trees with a `GpuDevice`, caching fallback content in
/// offscreen atlases across frames.
///
/// Bound to the thread that first submits; submitting from another thread
/// panics.
pub struct HardwareRasterizer<D: GpuDevice> {
    context: GraphicsContext<D>,
    config: RasterizerConfig,
    fallback: Box<dyn FallbackRasterizer>,
    graphics_state: GraphicsState,
    programs: ShaderProgramManager,
    offscreen_targets: OffscreenTargetManager,
    images: ImageTextureCache,
    throttler: FrameRateThrottler,
    render_thread: Option<ThreadId>,
    metrics: RasterizerMetrics,
    frames: u64,
}

impl<D: GpuDevice> HardwareRasterizer<D> {
    /// Rasterizer drawing unsupported content with `SoftwareRasterizer`.
    pub fn new(device: D, config: RasterizerConfig) -> Self {
        let fallback = Box::new(SoftwareRasterizer::new(config.fallback_scratch_bytes));
        Self::with_fallback(device, config, fallback)
    }

    /// Rasterizer handing unsupported content to `fallback`.
    pub fn with_fallback(
        device: D,
        config: RasterizerConfig,
        fallback: Box<dyn FallbackRasterizer>,
    ) -> Self {
        log::debug!(
            target: "renderer",
            "creating hardware rasterizer: {} offscreen atlases, composition {}",
            config.max_offscreen_atlases,
            if config.offscreen_composition { "enabled" } else { "disabled" }
        );
        Self {
            context: GraphicsContext::new(device),
            offscreen_targets: OffscreenTargetManager::new(config.max_offscreen_atlases),
            throttler: FrameRateThrottler::new(config.min_frame_time()),
            config,
            fallback,
            graphics_state: GraphicsState::new(),
            programs: ShaderProgramManager::new(),
            images: ImageTextureCache::new(),
            render_thread: None,
            metrics: RasterizerMetrics::default(),
            frames: 0,
        }
    }

    /// Resource provider for trees submitted to this rasterizer.
    pub fn resource_provider(&self) -> Arc<dyn ResourceProvider> {
        self.fallback.resource_provider()
    }

    /// Metrics for the most recent frame.
    #[inline]
    pub const fn metrics(&self) -> RasterizerMetrics {
        self.metrics
    }

    #[inline]
    pub const fn offscreen_stats(&self) -> OffscreenCacheStats {
        self.offscreen_targets.stats()
    }

    #[inline]
    pub const fn frame_count(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub const fn config(&self) -> &RasterizerConfig {
        &self.config
    }

    #[inline]
    pub const fn device(&self) -> &D {
        self.context.device()
    }

    /// Device access for setup such as creating render targets. Any state
    /// changed through it must be followed by `invalidate_state`.
    #[inline]
    pub const fn device_mut(&mut self) -> &mut D {
        self.context.device_mut()
    }

    /// Tell the rasterizer another user of the context changed GPU state.
    pub fn invalidate_state(&mut self) {
        self.graphics_state.set_dirty();
    }

    fn check_thread(&mut self) {
        let current = thread::current().id();
        let owner = *self.render_thread.get_or_insert(current);
        assert_eq!(
            owner, current,
            "HardwareRasterizer used from a thread other than its render thread"
        );
    }

    /// Rasterize `tree` into `target` and present it.
    ///
    /// # Errors
    /// Returns an error if the device fails to present the frame.
    ///
    /// # Panics
    /// Panics when called from a thread other than the first submitter's.
    pub fn submit(
        &mut self,
        tree: &Node,
        target: &RenderTarget,
        options: SubmitOptions,
    ) -> AnyResult<()> {
        self.check_thread();
        let _span = tracing::info_span!(
            "submit",
            width = target.size.width,
            height = target.size.height
        )
        .entered();
        let frame_start = Instant::now();
        let mut metrics = RasterizerMetrics::default();

        let mut guard = self.context.make_current(Some(target));
        let gpu: &mut dyn GpuDevice = &mut *guard;

        self.fallback.advance_frame();

        let target_size = target.size;
        let full_target = Rect::from_size(target_size);
        let scissor = match options.dirty {
            Some(dirty) if gpu.content_was_preserved_after_swap(target) => {
                dirty.intersect(full_target)
            }
            _ => full_target,
        };
        self.graphics_state.set_clip_adjustment(target_size);
        self.offscreen_targets.update(gpu, target_size);
        self.images.update(gpu);

        let mut draw_objects = DrawObjectManager::new();
        let mut canvases_used_this_frame = Vec::new();
        RenderTreeNodeVisitor::new(RasterizeComponents {
            gpu: &mut *gpu,
            offscreen_targets: &mut self.offscreen_targets,
            images: &mut self.images,
            fallback: &mut *self.fallback,
            draw_objects: &mut draw_objects,
            canvases_used_this_frame: &mut canvases_used_this_frame,
            metrics: &mut metrics,
            offscreen_composition: self.config.offscreen_composition,
        })
        .visit_root(tree, scissor);

        self.graphics_state.begin_frame();

        // Offscreen phase: the fallback hands the context back, its canvases
        // are uploaded, then hardware offscreen draws run.
        self.fallback.reset_context();
        if !canvases_used_this_frame.is_empty() {
            let _flush_span = tracing::info_span!(
                "flush_canvases",
                canvases = canvases_used_this_frame.len()
            )
            .entered();
            for atlas in &canvases_used_this_frame {
                let uploads = self.offscreen_targets.flush_canvas(gpu, *atlas);
                metrics.canvas_uploads += uploads as u32;
            }
            self.graphics_state.set_dirty();
        }
        let offscreen_draws = draw_objects.execute_offscreen_rasterize(
            gpu,
            &mut self.graphics_state,
            &mut self.programs,
        );
        self.graphics_state.set_dirty();
        self.graphics_state.bind_framebuffer(gpu, None);

        // Onscreen phase.
        self.graphics_state.viewport(gpu, full_target);
        self.graphics_state.scissor(gpu, scissor);
        self.graphics_state.clear(gpu, self.config.clear_color);
        draw_objects.execute_onscreen_update_vertex_buffer(gpu, &mut self.graphics_state);
        metrics.vertices = self.graphics_state.vertex_count() as u32;
        let onscreen_draws = draw_objects.execute_onscreen_rasterize(
            gpu,
            &mut self.graphics_state,
            &mut self.programs,
        );
        self.graphics_state.end_frame();
        metrics.draw_calls = (offscreen_draws + onscreen_draws) as u32;
        metrics.frame_time_ms = frame_start.elapsed().as_secs_f32() * 1000.0;

        self.throttler.end_interval();
        let presented = gpu
            .swap_buffers(target)
            .with_context(|| format!("presenting frame {}", self.frames));
        self.throttler.begin_interval();
        drop(guard);

        self.frames += 1;
        self.metrics = metrics;
        log::trace!(
            target: "renderer",
            "frame {}: {} draw calls, {} offscreen hits, {} misses, {} fallback rasterizations",
            self.frames,
            metrics.draw_calls,
            metrics.offscreen_hits,
            metrics.offscreen_misses,
            metrics.fallback_rasterizations
        );
        presented
    }
}

impl<D: GpuDevice> Drop for HardwareRasterizer<D> {
    fn drop(&mut self) {
        let mut guard = self.context.make_current(None);
        let gpu: &mut dyn GpuDevice = &mut *guard;
        if let Err(error) = gpu.finish() {
            log::error!(target: "renderer", "finishing GPU work on shutdown failed: {error:#}");
        }
        self.offscreen_targets.destroy(gpu);
        self.images.destroy(gpu);
        self.programs.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuDevice;
    use render_tree::{ColorRGBA, PointF, RectF, Size};

    #[test]
    fn metrics_describe_the_last_frame() {
        let mut rasterizer =
            HardwareRasterizer::new(CpuDevice::new(), RasterizerConfig::default());
        let target = rasterizer
            .device_mut()
            .create_render_target(Size::new(32, 32), true);
        let font = rasterizer.resource_provider().create_font(8.0);
        let glyphs = rasterizer.resource_provider().create_glyph_buffer("A", font);
        let tree = Node::composition(vec![
            Node::solid_rect(RectF::new(0.0, 0.0, 8.0, 8.0), ColorRGBA::RED),
            Node::text(glyphs, PointF::new(0.0, 20.0), ColorRGBA::BLACK),
            Node::solid_rect(RectF::new(100.0, 100.0, 8.0, 8.0), ColorRGBA::RED),
        ]);

        rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
        let first = rasterizer.metrics();
        assert_eq!(first.offscreen_misses, 1);
        assert_eq!(first.fallback_rasterizations, 1);
        assert_eq!(first.culled_nodes, 1);
        assert_eq!(first.vertices, 12);
        assert!(first.canvas_uploads > 0);

        rasterizer.submit(&tree, &target, SubmitOptions::default()).unwrap();
        let second = rasterizer.metrics();
        assert_eq!(second.offscreen_hits, 1);
        assert_eq!(second.fallback_rasterizations, 0);
        assert_eq!(second.canvas_uploads, 0);
        assert_eq!(rasterizer.frame_count(), 2);
    }
}
