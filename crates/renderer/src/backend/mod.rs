//! GPU device abstraction.
//!
//! Defines the `GpuDevice` trait: the immediate-mode command surface the
//! hardware rasterizer drives. Implementations execute commands on the CPU
//! (`CpuDevice`) or record them for a real graphics API.
//!
//! Conventions shared by every implementation:
//! * viewport and scissor rects use a top-left origin in framebuffer pixels;
//! * vertex positions are normalized device coordinates with y pointing up;
//! * texture coordinates have their origin at the top-left texel;
//! * colors are premultiplied and blending, when enabled, is source-over
//!   (`src + dst * (1 - src.a)`).

pub mod cpu;
pub mod graphics_context;

pub use cpu::CpuDevice;
pub use graphics_context::{GraphicsContext, ScopedMakeCurrent};

use anyhow::Result as AnyResult;
use bytemuck::{Pod, Zeroable};
use render_tree::{Rect, Size};

/// Handle to a compiled shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Handle to a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Handle to an offscreen framebuffer with a single color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// Handle to a presentable surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

/// A presentable surface the rasterizer renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub surface: SurfaceId,
    pub size: Size,
}

/// Shader programs, one per draw-object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderKind {
    /// Outputs the interpolated vertex color.
    ColorFill,
    /// Outputs the sampled texel multiplied by the vertex color.
    TexturedQuad,
}

/// Vertex layout consumed by every shader program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Normalized device coordinates.
    pub position: [f32; 2],
    /// Premultiplied RGBA.
    pub color: [f32; 4],
    pub tex_coord: [f32; 2],
}

/// Counts of commands that reached the device since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub viewport_calls: u64,
    pub scissor_calls: u64,
    pub program_binds: u64,
    pub texture_binds: u64,
    pub framebuffer_binds: u64,
    pub blend_changes: u64,
    pub draw_calls: u64,
    pub clears: u64,
    pub vertex_uploads: u64,
    pub texture_uploads: u64,
    pub programs_created: u64,
    pub swaps: u64,
}

impl DeviceStats {
    /// Total number of state-changing calls (excludes draws and uploads).
    #[must_use]
    pub const fn state_calls(&self) -> u64 {
        self.viewport_calls
            + self.scissor_calls
            + self.program_binds
            + self.texture_binds
            + self.framebuffer_binds
            + self.blend_changes
    }
}

/// Immediate GPU command interface, modelled on a GL-style context.
///
/// Commands issued between `make_current` and `release_current` apply to
/// the current render target. Implementations may defer execution but must
/// preserve command order.
pub trait GpuDevice: Send {
    /// Bind the context to the calling thread, rendering into `target`'s
    /// surface. `None` binds without a surface, for resource management.
    fn make_current(&mut self, target: Option<&RenderTarget>);

    /// Unbind the context from the calling thread.
    fn release_current(&mut self);

    fn create_program(&mut self, kind: ShaderKind) -> ProgramId;

    fn delete_program(&mut self, program: ProgramId);

    /// Create an RGBA8 texture, optionally initialised with premultiplied
    /// pixels. Uninitialised textures are transparent black.
    fn create_texture(&mut self, size: Size, pixels: Option<&[u8]>) -> TextureId;

    /// Replace the texels inside `region` with tightly packed RGBA8 rows.
    fn write_texture(&mut self, texture: TextureId, region: Rect, pixels: &[u8]);

    fn delete_texture(&mut self, texture: TextureId);

    /// Create a framebuffer backed by a new texture of `size`.
    fn create_framebuffer(&mut self, size: Size) -> FramebufferId;

    /// The color attachment of `framebuffer`, sampleable as a texture.
    /// `None` if the framebuffer does not exist.
    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId>;

    /// Delete a framebuffer together with its color attachment.
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Bind an offscreen framebuffer, or the current surface for `None`.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    fn set_viewport(&mut self, viewport: Rect);

    fn set_scissor(&mut self, scissor: Rect);

    fn use_program(&mut self, program: Option<ProgramId>);

    fn bind_texture(&mut self, texture: Option<TextureId>);

    fn set_blend_enabled(&mut self, enabled: bool);

    /// Replace the contents of the vertex buffer.
    fn upload_vertex_data(&mut self, vertices: &[Vertex]);

    /// Draw `count` vertices as a triangle list starting at `first`.
    fn draw_triangles(&mut self, first: u32, count: u32);

    /// Fill the scissor box of the bound framebuffer with `color`,
    /// ignoring blend state.
    fn clear(&mut self, color: [f32; 4]);

    /// Present the current surface.
    ///
    /// # Errors
    /// Returns an error if the device rejects the submitted work or the
    /// surface cannot be presented.
    fn swap_buffers(&mut self, target: &RenderTarget) -> AnyResult<()>;

    /// Block until all issued work has completed.
    ///
    /// # Errors
    /// Returns an error if the device reports a failure for issued work.
    fn finish(&mut self) -> AnyResult<()>;

    /// Whether the back buffer of `target` still holds the previous
    /// frame's pixels after a swap.
    fn content_was_preserved_after_swap(&self, target: &RenderTarget) -> bool;

    fn stats(&self) -> DeviceStats;
}
