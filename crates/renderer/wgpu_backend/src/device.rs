//! `GpuDevice` on top of wgpu.
//!
//! Commands are recorded as they arrive and turned into render passes when
//! the device flushes: on swap, on `finish`, and before any texture upload or
//! deletion that recorded commands still depend on. Offscreen framebuffers
//! and headless surfaces are `Rgba8Unorm` textures; window surfaces use the
//! first non-sRGB format the surface supports.

use crate::bind_group_cache::BindGroupCache;
use crate::error::submit_with_validation;
use crate::gpu_context::GpuContext;
use crate::pipeline_cache::{PipelineCache, PipelineKey};
use crate::readback::readback_texture;
use crate::recorder::{CommandRecorder, DrawCommand, TargetRef};
use crate::texture_pool::{TexturePool, create_framebuffer_texture};
use anyhow::{Context as _, Result as AnyResult, anyhow};
use bytemuck::cast_slice;
use render_tree::{Rect, Size};
use renderer::{
    DeviceStats, FramebufferId, GpuDevice, ProgramId, RenderTarget, ShaderKind, SurfaceId,
    TextureId, Vertex,
};
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::{BufferInitDescriptor, DeviceExt as _};
use wgpu::{
    AdapterInfo, Buffer, BufferUsages, CommandEncoderDescriptor, CompositeAlphaMode, Extent3d,
    LoadOp, Operations, Origin3d, PollType, PresentMode, Queue, RenderPass,
    RenderPassColorAttachment, RenderPassDescriptor, StoreOp, Surface, SurfaceConfiguration,
    SurfaceTexture, TexelCopyBufferLayout, TexelCopyTextureInfo, Texture, TextureAspect,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor,
};
use winit::window::Window;

/// Format of textures, framebuffers and headless surfaces.
const TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Textures and framebuffers share one id space.
struct GpuTexture {
    texture: Texture,
    view: TextureView,
    size: Size,
}

/// Offscreen stand-in for a window: draws land in `back`, swaps copy it
/// into `front`, which is what readback observes.
struct HeadlessSurface {
    size: Size,
    preserve: bool,
    back: Texture,
    back_view: TextureView,
    front: Texture,
}

struct WindowSurface {
    _window: Arc<Window>,
    surface: Surface<'static>,
    config: SurfaceConfiguration,
    frame: Option<AcquiredFrame>,
}

struct AcquiredFrame {
    texture: SurfaceTexture,
    view: TextureView,
}

enum SurfaceTarget {
    Headless(HeadlessSurface),
    Window(WindowSurface),
}

impl SurfaceTarget {
    fn size(&self) -> Size {
        match self {
            Self::Headless(headless) => headless.size,
            Self::Window(window) => Size::new(window.config.width, window.config.height),
        }
    }

    fn format(&self) -> TextureFormat {
        match self {
            Self::Headless(_) => TEXTURE_FORMAT,
            Self::Window(window) => window.config.format,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BoundState {
    framebuffer: Option<FramebufferId>,
    viewport: Rect,
    scissor: Rect,
    program: Option<ProgramId>,
    texture: Option<TextureId>,
    blend: bool,
}

/// Hardware device driven by the rasterizer.
pub struct WgpuDevice {
    gpu: GpuContext,
    pipelines: PipelineCache,
    bind_groups: BindGroupCache,
    texture_pool: TexturePool,
    recorder: CommandRecorder,
    programs: HashMap<ProgramId, ShaderKind>,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    surfaces: HashMap<SurfaceId, SurfaceTarget>,
    state: BoundState,
    current: bool,
    current_surface: Option<SurfaceId>,
    pending_error: Option<anyhow::Error>,
    stats: DeviceStats,
    next_id: u32,
}

impl WgpuDevice {
    /// Device without a window. Render targets come from
    /// [`WgpuDevice::create_headless_target`].
    ///
    /// # Errors
    /// Returns an error if no adapter is available.
    pub fn new_headless() -> AnyResult<Self> {
        Ok(Self::from_context(GpuContext::headless()?))
    }

    /// Device presenting to `window`, with the window's render target.
    ///
    /// # Errors
    /// Returns an error if the surface, adapter or device cannot be created.
    pub fn for_window(window: Arc<Window>) -> AnyResult<(Self, RenderTarget)> {
        let (gpu, surface) = GpuContext::for_window(Arc::clone(&window))?;
        let mut device = Self::from_context(gpu);
        let target = device.add_window_surface(window, surface)?;
        Ok((device, target))
    }

    fn from_context(gpu: GpuContext) -> Self {
        let pipelines = PipelineCache::new(gpu.device());
        Self {
            gpu,
            pipelines,
            bind_groups: BindGroupCache::new(),
            texture_pool: TexturePool::new(),
            recorder: CommandRecorder::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            surfaces: HashMap::new(),
            state: BoundState::default(),
            current: false,
            current_surface: None,
            pending_error: None,
            stats: DeviceStats::default(),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn add_window_surface(
        &mut self,
        window: Arc<Window>,
        surface: Surface<'static>,
    ) -> AnyResult<RenderTarget> {
        let inner = window.inner_size();
        let size = Size::new(inner.width.max(1), inner.height.max(1));
        let capabilities = surface.get_capabilities(self.gpu.adapter());
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| {
                matches!(
                    format,
                    TextureFormat::Bgra8Unorm | TextureFormat::Rgba8Unorm
                )
            })
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        if format.is_srgb() {
            log::warn!(
                target: "wgpu_renderer",
                "only sRGB surface formats available, using {format:?}"
            );
        }
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode: PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode: CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        surface.configure(self.gpu.device(), &config);

        let id = SurfaceId(self.next_id());
        self.surfaces.insert(
            id,
            SurfaceTarget::Window(WindowSurface {
                _window: window,
                surface,
                config,
                frame: None,
            }),
        );
        log::debug!(target: "wgpu_renderer", "window surface {id:?} configured at {size:?}");
        Ok(RenderTarget { surface: id, size })
    }

    /// Offscreen render target. With `preserve`, swaps keep the back
    /// buffer; without it, the next frame starts from undefined content.
    pub fn create_headless_target(&mut self, size: Size, preserve: bool) -> RenderTarget {
        let size = Size::new(size.width.max(1), size.height.max(1));
        let device = self.gpu.device();
        let back = create_framebuffer_texture(device, size, TEXTURE_FORMAT);
        let front = device.create_texture(&TextureDescriptor {
            label: Some("headless-front-buffer"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: TextureUsages::COPY_DST | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let back_view = back.create_view(&TextureViewDescriptor::default());
        let id = SurfaceId(self.next_id());
        self.surfaces.insert(
            id,
            SurfaceTarget::Headless(HeadlessSurface {
                size,
                preserve,
                back,
                back_view,
                front,
            }),
        );
        RenderTarget { surface: id, size }
    }

    /// Reconfigure a window surface after the window changed size.
    ///
    /// # Errors
    /// Returns an error if `target` is not a window surface.
    pub fn resize_window_target(
        &mut self,
        target: &RenderTarget,
        size: Size,
    ) -> AnyResult<RenderTarget> {
        self.flush("resize")?;
        let Some(SurfaceTarget::Window(window)) = self.surfaces.get_mut(&target.surface) else {
            return Err(anyhow!("{:?} is not a window surface", target.surface));
        };
        window.frame = None;
        window.config.width = size.width.max(1);
        window.config.height = size.height.max(1);
        window.surface.configure(self.gpu.device(), &window.config);
        Ok(RenderTarget {
            surface: target.surface,
            size: Size::new(window.config.width, window.config.height),
        })
    }

    pub fn destroy_render_target(&mut self, target: &RenderTarget) {
        if self.current_surface == Some(target.surface) {
            self.current_surface = None;
        }
        self.surfaces.remove(&target.surface);
    }

    /// Tightly packed RGBA rows of what the last swap presented.
    ///
    /// # Errors
    /// Returns an error for window surfaces or if readback fails.
    pub fn read_target_pixels(&mut self, target: &RenderTarget) -> AnyResult<Vec<u8>> {
        self.flush("readback")?;
        match self.surfaces.get(&target.surface) {
            Some(SurfaceTarget::Headless(headless)) => readback_texture(
                self.gpu.device(),
                self.gpu.queue(),
                &headless.front,
                headless.size,
            ),
            Some(SurfaceTarget::Window(_)) => {
                Err(anyhow!("window surfaces cannot be read back"))
            }
            None => Err(anyhow!("unknown surface {:?}", target.surface)),
        }
    }

    pub fn adapter_info(&self) -> AdapterInfo {
        self.gpu.adapter_info()
    }

    pub fn bind_group_hit_rate(&self) -> f32 {
        self.bind_groups.hit_rate()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub const fn reused_framebuffer_textures(&self) -> u64 {
        self.texture_pool.reused()
    }

    fn draw_target(&self) -> Option<(TargetRef, Size, TextureFormat)> {
        if let Some(framebuffer) = self.state.framebuffer {
            let texture = *self.framebuffers.get(&framebuffer)?;
            let size = self.textures.get(&texture)?.size;
            return Some((TargetRef::Texture(texture), size, TEXTURE_FORMAT));
        }
        let surface = self.current_surface?;
        let target = self.surfaces.get(&surface)?;
        Some((TargetRef::Surface(surface), target.size(), target.format()))
    }

    fn target_view(&self, target: TargetRef) -> Option<&TextureView> {
        match target {
            TargetRef::Texture(texture) => self.textures.get(&texture).map(|entry| &entry.view),
            TargetRef::Surface(surface) => match self.surfaces.get(&surface)? {
                SurfaceTarget::Headless(headless) => Some(&headless.back_view),
                SurfaceTarget::Window(window) => window.frame.as_ref().map(|frame| &frame.view),
            },
        }
    }

    fn acquire_frame(&mut self, surface: SurfaceId) -> AnyResult<()> {
        let Some(SurfaceTarget::Window(window)) = self.surfaces.get_mut(&surface) else {
            return Ok(());
        };
        if window.frame.is_some() {
            return Ok(());
        }
        let texture = window
            .surface
            .get_current_texture()
            .context("acquiring surface texture")?;
        let view = texture.texture.create_view(&TextureViewDescriptor::default());
        window.frame = Some(AcquiredFrame { texture, view });
        Ok(())
    }

    /// Encode and submit everything recorded so far.
    fn flush(&mut self, label: &'static str) -> AnyResult<()> {
        let Some(frame) = self.recorder.take() else {
            return Ok(());
        };
        let _span = tracing::info_span!("wgpu_flush", label, commands = frame.commands.len())
            .entered();
        let device = Arc::clone(self.gpu.device());

        for command in &frame.commands {
            self.pipelines.ensure(&device, command.pipeline);
            let sampled = command.texture.and_then(|texture| {
                self.textures
                    .get(&texture)
                    .map(|entry| (texture, &entry.view))
            });
            if let Some((texture, view)) = sampled {
                self.bind_groups.ensure(
                    &device,
                    self.pipelines.texture_bind_layout(),
                    self.pipelines.sampler(),
                    texture,
                    view,
                );
            }
            if let TargetRef::Surface(surface) = command.target {
                self.acquire_frame(surface)?;
            }
        }

        let vertex_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("rasterizer-vertices"),
            contents: cast_slice(&frame.vertices),
            usage: BufferUsages::VERTEX,
        });
        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some(label),
        });
        for pass_commands in frame.commands.chunk_by(|left, right| left.target == right.target) {
            let Some(first_command) = pass_commands.first() else {
                continue;
            };
            let Some(view) = self.target_view(first_command.target) else {
                log::warn!(
                    target: "wgpu_renderer",
                    "dropping {} commands for missing target {:?}",
                    pass_commands.len(),
                    first_command.target
                );
                continue;
            };
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("rasterizer-pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            for command in pass_commands {
                self.encode_draw(&mut pass, &vertex_buffer, command);
            }
        }
        submit_with_validation(&device, self.gpu.queue(), label, [encoder.finish()])
    }

    fn encode_draw(&self, pass: &mut RenderPass<'_>, vertices: &Buffer, command: &DrawCommand) {
        let scissor = command
            .scissor
            .intersect(Rect::from_size(command.target_size));
        if scissor.is_empty() {
            return;
        }
        let Some(pipeline) = self.pipelines.get(command.pipeline) else {
            return;
        };
        if command.pipeline.kind == ShaderKind::TexturedQuad {
            let Some(group) = command
                .texture
                .and_then(|texture| self.bind_groups.get(texture))
            else {
                log::warn!(
                    target: "wgpu_renderer",
                    "skipping draw with deleted texture {:?}",
                    command.texture
                );
                return;
            };
            pass.set_bind_group(0, group, &[]);
        }
        let viewport = command.viewport;
        pass.set_pipeline(pipeline);
        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.set_scissor_rect(
            scissor.x as u32,
            scissor.y as u32,
            scissor.width,
            scissor.height,
        );
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.draw(command.first..command.first + command.count, 0..1);
    }

    /// Flush, keeping the first failure for the next swap to report.
    fn flush_or_defer(&mut self, label: &'static str) {
        if let Err(err) = self.flush(label) {
            log::error!(target: "wgpu_renderer", "flush before {label} failed: {err:#}");
            if self.pending_error.is_none() {
                self.pending_error = Some(err);
            }
        }
    }

    fn assert_current(&self, command: &str) {
        assert!(self.current, "{command} issued without a current context");
    }
}

fn extent(size: Size) -> Extent3d {
    Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn write_region(queue: &Queue, texture: &Texture, region: Rect, pixels: &[u8]) {
    queue.write_texture(
        TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: Origin3d {
                x: region.x as u32,
                y: region.y as u32,
                z: 0,
            },
            aspect: TextureAspect::All,
        },
        pixels,
        TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(region.width * 4),
            rows_per_image: Some(region.height),
        },
        extent(region.size()),
    );
}

impl GpuDevice for WgpuDevice {
    fn make_current(&mut self, target: Option<&RenderTarget>) {
        if let Some(target) = target {
            assert!(
                self.surfaces.contains_key(&target.surface),
                "make_current on unknown surface {:?}",
                target.surface
            );
        }
        self.current = true;
        self.current_surface = target.map(|target| target.surface);
    }

    fn release_current(&mut self) {
        self.current = false;
        self.current_surface = None;
    }

    fn create_program(&mut self, kind: ShaderKind) -> ProgramId {
        self.assert_current("create_program");
        let program = ProgramId(self.next_id());
        self.programs.insert(program, kind);
        self.stats.programs_created += 1;
        program
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn create_texture(&mut self, size: Size, pixels: Option<&[u8]>) -> TextureId {
        self.assert_current("create_texture");
        let allocated = Size::new(size.width.max(1), size.height.max(1));
        let texture = self.gpu.device().create_texture(&TextureDescriptor {
            label: Some("rasterizer-texture"),
            size: extent(allocated),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_DST
                | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if let Some(pixels) = pixels {
            if pixels.len() as u64 == allocated.area() * 4 {
                write_region(self.gpu.queue(), &texture, Rect::from_size(allocated), pixels);
                self.stats.texture_uploads += 1;
            } else {
                log::error!(
                    target: "wgpu_renderer",
                    "ignoring {} bytes of initial data for a {allocated:?} texture",
                    pixels.len()
                );
            }
        }
        let view = texture.create_view(&TextureViewDescriptor::default());
        let id = TextureId(self.next_id());
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                size: allocated,
            },
        );
        id
    }

    fn write_texture(&mut self, texture: TextureId, region: Rect, pixels: &[u8]) {
        self.assert_current("write_texture");
        if self.recorder.references(texture) {
            self.flush_or_defer("texture upload");
        }
        let Some(entry) = self.textures.get(&texture) else {
            log::warn!(target: "wgpu_renderer", "write_texture on unknown texture {texture:?}");
            return;
        };
        if !Rect::from_size(entry.size).contains(region)
            || pixels.len() as u64 != region.size().area() * 4
        {
            log::error!(
                target: "wgpu_renderer",
                "write_texture region {region:?} with {} bytes does not fit {:?}",
                pixels.len(),
                entry.size
            );
            return;
        }
        if region.is_empty() {
            return;
        }
        write_region(self.gpu.queue(), &entry.texture, region, pixels);
        self.stats.texture_uploads += 1;
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.recorder.references(texture) {
            self.flush_or_defer("texture deletion");
        }
        self.bind_groups.invalidate(texture);
        self.textures.remove(&texture);
        if self.state.texture == Some(texture) {
            self.state.texture = None;
        }
    }

    fn create_framebuffer(&mut self, size: Size) -> FramebufferId {
        self.assert_current("create_framebuffer");
        let allocated = Size::new(size.width.max(1), size.height.max(1));
        let pooled = self.texture_pool.take(allocated, TEXTURE_FORMAT);
        let reused = pooled.is_some();
        let texture = pooled.unwrap_or_else(|| {
            create_framebuffer_texture(self.gpu.device(), allocated, TEXTURE_FORMAT)
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        let texture_id = TextureId(self.next_id());
        self.textures.insert(
            texture_id,
            GpuTexture {
                texture,
                view,
                size: allocated,
            },
        );
        if reused {
            // New framebuffers start transparent, recycled ones included.
            self.recorder.clear(
                TargetRef::Texture(texture_id),
                allocated,
                Rect::from_size(allocated),
                TEXTURE_FORMAT,
                [0.0; 4],
            );
        }
        let framebuffer = FramebufferId(self.next_id());
        self.framebuffers.insert(framebuffer, texture_id);
        framebuffer
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).copied()
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        let Some(texture) = self.framebuffers.remove(&framebuffer) else {
            return;
        };
        if self.recorder.references(texture) {
            self.flush_or_defer("framebuffer deletion");
        }
        self.bind_groups.invalidate(texture);
        if let Some(entry) = self.textures.remove(&texture) {
            self.texture_pool.return_texture(entry.texture, entry.size);
        }
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.assert_current("bind_framebuffer");
        self.state.framebuffer = framebuffer;
        self.stats.framebuffer_binds += 1;
    }

    fn set_viewport(&mut self, viewport: Rect) {
        self.assert_current("set_viewport");
        self.state.viewport = viewport;
        self.stats.viewport_calls += 1;
    }

    fn set_scissor(&mut self, scissor: Rect) {
        self.assert_current("set_scissor");
        self.state.scissor = scissor;
        self.stats.scissor_calls += 1;
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.assert_current("use_program");
        self.state.program = program;
        self.stats.program_binds += 1;
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        self.assert_current("bind_texture");
        self.state.texture = texture;
        self.stats.texture_binds += 1;
    }

    fn set_blend_enabled(&mut self, enabled: bool) {
        self.assert_current("set_blend_enabled");
        self.state.blend = enabled;
        self.stats.blend_changes += 1;
    }

    fn upload_vertex_data(&mut self, vertices: &[Vertex]) {
        self.assert_current("upload_vertex_data");
        self.recorder.upload(vertices);
        self.stats.vertex_uploads += 1;
    }

    fn draw_triangles(&mut self, first: u32, count: u32) {
        self.assert_current("draw_triangles");
        self.stats.draw_calls += 1;
        let Some(kind) = self
            .state
            .program
            .and_then(|program| self.programs.get(&program).copied())
        else {
            log::warn!(target: "wgpu_renderer", "draw_triangles without a program bound");
            return;
        };
        let Some((target, target_size, format)) = self.draw_target() else {
            log::warn!(target: "wgpu_renderer", "draw_triangles without a draw buffer");
            return;
        };
        let texture = match kind {
            ShaderKind::ColorFill => None,
            ShaderKind::TexturedQuad => {
                let Some(texture) = self.state.texture else {
                    log::warn!(target: "wgpu_renderer", "textured draw without a texture bound");
                    return;
                };
                Some(texture)
            }
        };
        let recorded = self.recorder.draw(DrawCommand {
            target,
            target_size,
            viewport: self.state.viewport,
            scissor: self.state.scissor,
            pipeline: PipelineKey {
                kind,
                blend: self.state.blend,
                format,
            },
            texture,
            first,
            count,
        });
        if !recorded {
            log::debug!(
                target: "wgpu_renderer",
                "dropped draw {first}+{count} outside the uploaded vertices or target"
            );
        }
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.assert_current("clear");
        self.stats.clears += 1;
        let Some((target, target_size, format)) = self.draw_target() else {
            log::warn!(target: "wgpu_renderer", "clear without a draw buffer");
            return;
        };
        self.recorder
            .clear(target, target_size, self.state.scissor, format, color);
    }

    fn swap_buffers(&mut self, target: &RenderTarget) -> AnyResult<()> {
        let _span = tracing::info_span!("swap_buffers", surface = target.surface.0).entered();
        self.flush("frame")?;
        if let Some(err) = self.pending_error.take() {
            return Err(err.context("deferred device error"));
        }
        match self.surfaces.get_mut(&target.surface) {
            Some(SurfaceTarget::Headless(headless)) => {
                let device = self.gpu.device();
                let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
                    label: Some("headless-swap"),
                });
                encoder.copy_texture_to_texture(
                    headless.back.as_image_copy(),
                    headless.front.as_image_copy(),
                    extent(headless.size),
                );
                submit_with_validation(device, self.gpu.queue(), "swap", [encoder.finish()])?;
            }
            Some(SurfaceTarget::Window(window)) => {
                if let Some(frame) = window.frame.take() {
                    frame.texture.present();
                }
            }
            None => return Err(anyhow!("swap_buffers on unknown surface {:?}", target.surface)),
        }
        self.stats.swaps += 1;
        Ok(())
    }

    fn finish(&mut self) -> AnyResult<()> {
        self.flush("finish")?;
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        self.gpu
            .device()
            .poll(PollType::Wait)
            .map_err(|err| anyhow!("waiting for the GPU: {err}"))?;
        Ok(())
    }

    fn content_was_preserved_after_swap(&self, target: &RenderTarget) -> bool {
        match self.surfaces.get(&target.surface) {
            Some(SurfaceTarget::Headless(headless)) => headless.preserve,
            Some(SurfaceTarget::Window(_)) | None => false,
        }
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}
