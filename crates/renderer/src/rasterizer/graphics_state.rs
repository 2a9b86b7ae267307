//! Cache of GPU state bound on the rasterizer's context.
//!
//! Every state-changing call is compared against the cached value and only
//! forwarded to the device when it differs. When something outside the
//! hardware path touches the context, `set_dirty` must be called; the next
//! call then re-issues the entire cached state before applying its change.

use crate::backend::{FramebufferId, GpuDevice, ProgramId, TextureId, Vertex};
use render_tree::{ColorRGBA, PointF, Rect, Size};

/// State the hardware path expects to be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct CachedState {
    framebuffer: Option<FramebufferId>,
    viewport: Rect,
    scissor: Rect,
    program: Option<ProgramId>,
    texture: Option<TextureId>,
    blend: bool,
}

#[derive(Debug)]
pub struct GraphicsState {
    cached: CachedState,
    state_dirty: bool,
    clip_size: Size,
    frame_started: bool,
    vertex_data: Vec<Vertex>,
    vertex_data_uploaded: bool,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsState {
    /// The device state is unknown until the first call re-issues it.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cached: CachedState {
                framebuffer: None,
                viewport: Rect::new(0, 0, 0, 0),
                scissor: Rect::new(0, 0, 0, 0),
                program: None,
                texture: None,
                blend: false,
            },
            state_dirty: true,
            clip_size: Size::new(1, 1),
            frame_started: false,
            vertex_data: Vec::new(),
            vertex_data_uploaded: false,
        }
    }

    /// Mark the device state as clobbered by a foreign user of the context.
    #[inline]
    pub const fn set_dirty(&mut self) {
        self.state_dirty = true;
    }

    #[inline]
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.state_dirty
    }

    fn restore_if_dirty(&mut self, gpu: &mut dyn GpuDevice) {
        if !self.state_dirty {
            return;
        }
        log::trace!(target: "renderer", "re-issuing cached graphics state");
        let cached = self.cached;
        gpu.bind_framebuffer(cached.framebuffer);
        gpu.set_viewport(cached.viewport);
        gpu.set_scissor(cached.scissor);
        gpu.use_program(cached.program);
        gpu.bind_texture(cached.texture);
        gpu.set_blend_enabled(cached.blend);
        self.state_dirty = false;
    }

    pub fn bind_framebuffer(&mut self, gpu: &mut dyn GpuDevice, framebuffer: Option<FramebufferId>) {
        self.restore_if_dirty(gpu);
        if self.cached.framebuffer != framebuffer {
            self.cached.framebuffer = framebuffer;
            gpu.bind_framebuffer(framebuffer);
        }
    }

    pub fn viewport(&mut self, gpu: &mut dyn GpuDevice, viewport: Rect) {
        self.restore_if_dirty(gpu);
        if self.cached.viewport != viewport {
            self.cached.viewport = viewport;
            gpu.set_viewport(viewport);
        }
    }

    pub fn scissor(&mut self, gpu: &mut dyn GpuDevice, scissor: Rect) {
        self.restore_if_dirty(gpu);
        if self.cached.scissor != scissor {
            self.cached.scissor = scissor;
            gpu.set_scissor(scissor);
        }
    }

    #[inline]
    #[must_use]
    pub const fn current_scissor(&self) -> Rect {
        self.cached.scissor
    }

    pub fn use_program(&mut self, gpu: &mut dyn GpuDevice, program: Option<ProgramId>) {
        self.restore_if_dirty(gpu);
        if self.cached.program != program {
            self.cached.program = program;
            gpu.use_program(program);
        }
    }

    pub fn bind_texture(&mut self, gpu: &mut dyn GpuDevice, texture: Option<TextureId>) {
        self.restore_if_dirty(gpu);
        if self.cached.texture != texture {
            self.cached.texture = texture;
            gpu.bind_texture(texture);
        }
    }

    pub fn enable_blend(&mut self, gpu: &mut dyn GpuDevice) {
        self.set_blend(gpu, true);
    }

    pub fn disable_blend(&mut self, gpu: &mut dyn GpuDevice) {
        self.set_blend(gpu, false);
    }

    fn set_blend(&mut self, gpu: &mut dyn GpuDevice, enabled: bool) {
        self.restore_if_dirty(gpu);
        if self.cached.blend != enabled {
            self.cached.blend = enabled;
            gpu.set_blend_enabled(enabled);
        }
    }

    /// Set the size of the render target pixel coordinates are mapped
    /// from when generating vertices.
    pub fn set_clip_adjustment(&mut self, size: Size) {
        self.clip_size = Size::new(size.width.max(1), size.height.max(1));
    }

    #[inline]
    #[must_use]
    pub const fn clip_size(&self) -> Size {
        self.clip_size
    }

    /// Map a point in render-target pixels to normalized device coordinates.
    #[must_use]
    pub fn pixel_to_ndc(&self, point: PointF) -> [f32; 2] {
        [
            point.x.mul_add(2.0 / self.clip_size.width as f32, -1.0),
            point.y.mul_add(-2.0 / self.clip_size.height as f32, 1.0),
        ]
    }

    /// Start a frame and its first vertex phase.
    ///
    /// # Panics
    /// Panics if a frame is already in progress.
    pub fn begin_frame(&mut self) {
        assert!(!self.frame_started, "begin_frame called twice");
        self.frame_started = true;
        self.begin_vertex_phase();
    }

    /// # Panics
    /// Panics without a matching `begin_frame`.
    pub fn end_frame(&mut self) {
        assert!(self.frame_started, "end_frame without begin_frame");
        self.frame_started = false;
    }

    #[inline]
    #[must_use]
    pub const fn frame_started(&self) -> bool {
        self.frame_started
    }

    /// Clear the scissor box of the bound framebuffer.
    ///
    /// # Panics
    /// Panics outside a frame.
    pub fn clear(&mut self, gpu: &mut dyn GpuDevice, color: ColorRGBA) {
        assert!(self.frame_started, "clear outside a frame");
        self.restore_if_dirty(gpu);
        gpu.clear(color.premultiplied());
    }

    /// Start a new vertex phase: vertex data may be allocated and then
    /// uploaded exactly once.
    pub fn begin_vertex_phase(&mut self) {
        self.vertex_data.clear();
        self.vertex_data_uploaded = false;
    }

    /// Reserve `count` vertices in this phase's arena. Returns the index of
    /// the first vertex and the slice to fill.
    ///
    /// # Panics
    /// Panics once the phase's vertex data has been uploaded.
    pub fn allocate_vertex_data(&mut self, count: usize) -> (u32, &mut [Vertex]) {
        assert!(
            !self.vertex_data_uploaded,
            "vertex data allocated after upload"
        );
        let first = self.vertex_data.len();
        self.vertex_data.resize(first + count, Vertex::default());
        (first as u32, &mut self.vertex_data[first..])
    }

    /// Upload this phase's vertex arena to the device.
    ///
    /// # Panics
    /// Panics if the arena was already uploaded in this phase.
    pub fn update_vertex_data(&mut self, gpu: &mut dyn GpuDevice) {
        assert!(
            !self.vertex_data_uploaded,
            "vertex data uploaded twice in one phase"
        );
        self.restore_if_dirty(gpu);
        gpu.upload_vertex_data(&self.vertex_data);
        self.vertex_data_uploaded = true;
    }

    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertex_data.len()
    }

    /// Draw `count` vertices of the uploaded arena starting at `first`.
    ///
    /// # Panics
    /// Panics before the phase's vertex data is uploaded.
    pub fn draw_triangles(&mut self, gpu: &mut dyn GpuDevice, first: u32, count: u32) {
        assert!(
            self.vertex_data_uploaded,
            "draw issued before vertex data upload"
        );
        self.restore_if_dirty(gpu);
        gpu.draw_triangles(first, count);
    }
}
