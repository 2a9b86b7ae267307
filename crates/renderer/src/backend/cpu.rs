//! CPU reference implementation of `GpuDevice`.
//!
//! Executes every command immediately against RGBA8 buffers held in memory:
//! triangles are scan-converted with edge functions (top-left fill rule,
//! pixel centres at +0.5), textures are sampled with nearest filtering and
//! blending is premultiplied source-over. Surfaces are double buffered; a
//! surface created without preservation gets its back buffer filled with
//! garbage on every swap, the way a real swap chain leaves it undefined.

use super::{
    DeviceStats, FramebufferId, GpuDevice, ProgramId, RenderTarget, ShaderKind, SurfaceId,
    TextureId, Vertex,
};
use anyhow::{Result as AnyResult, anyhow};
use core::mem;
use render_tree::{Rect, Size};
use std::collections::HashMap;

/// Back-buffer contents after a swap on a non-preserving surface.
pub const GARBAGE_PIXEL: [u8; 4] = [255, 0, 255, 255];

/// State currently bound on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundState {
    pub framebuffer: Option<FramebufferId>,
    pub viewport: Rect,
    pub scissor: Rect,
    pub program: Option<ProgramId>,
    pub texture: Option<TextureId>,
    pub blend: bool,
}

#[derive(Debug)]
struct CpuTexture {
    size: Size,
    pixels: Vec<u8>,
}

#[derive(Debug)]
struct CpuSurface {
    size: Size,
    preserve: bool,
    front: Vec<u8>,
    back: Vec<u8>,
}

/// Where draw and clear commands currently land.
#[derive(Debug, Clone, Copy)]
enum DrawBuffer {
    Texture(TextureId),
    Surface(SurfaceId),
}

/// Vertex mapped to framebuffer pixel space.
#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    color: [f32; 4],
    tex_coord: [f32; 2],
}

/// Texture bound for sampling during a draw.
struct Sampler<'tex> {
    size: Size,
    pixels: &'tex [u8],
}

impl Sampler<'_> {
    fn sample(&self, tex_coord: [f32; 2]) -> [f32; 4] {
        if self.size.is_empty() || self.pixels.is_empty() {
            return [0.0; 4];
        }
        let max_x = self.size.width - 1;
        let max_y = self.size.height - 1;
        let texel_x = ((tex_coord[0] * self.size.width as f32).floor().max(0.0) as u32).min(max_x);
        let texel_y =
            ((tex_coord[1] * self.size.height as f32).floor().max(0.0) as u32).min(max_y);
        let offset = ((texel_y * self.size.width + texel_x) * 4) as usize;
        let texel = &self.pixels[offset..offset + 4];
        [
            f32::from(texel[0]) / 255.0,
            f32::from(texel[1]) / 255.0,
            f32::from(texel[2]) / 255.0,
            f32::from(texel[3]) / 255.0,
        ]
    }
}

/// A device that executes commands on the CPU.
#[derive(Debug, Default)]
pub struct CpuDevice {
    next_id: u32,
    programs: HashMap<ProgramId, ShaderKind>,
    textures: HashMap<TextureId, CpuTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    surfaces: HashMap<SurfaceId, CpuSurface>,
    current: bool,
    current_surface: Option<SurfaceId>,
    state: BoundState,
    vertices: Vec<Vertex>,
    stats: DeviceStats,
}

impl CpuDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Create a double-buffered surface. When `preserve` is false the back
    /// buffer holds garbage after every swap.
    pub fn create_render_target(&mut self, size: Size, preserve: bool) -> RenderTarget {
        let surface = SurfaceId(self.next_id());
        let len = size.area() as usize * 4;
        self.surfaces.insert(
            surface,
            CpuSurface {
                size,
                preserve,
                front: vec![0; len],
                back: vec![0; len],
            },
        );
        RenderTarget { surface, size }
    }

    /// Destroy a surface created by `create_render_target`.
    pub fn destroy_render_target(&mut self, target: &RenderTarget) {
        self.surfaces.remove(&target.surface);
    }

    /// Pixels of the last presented frame, premultiplied RGBA8 rows.
    #[must_use]
    pub fn read_surface_pixels(&self, target: &RenderTarget) -> Option<Vec<u8>> {
        self.surfaces
            .get(&target.surface)
            .map(|surface| surface.front.clone())
    }

    /// One presented pixel, or `None` if out of bounds.
    #[must_use]
    pub fn surface_pixel(&self, target: &RenderTarget, x: u32, y: u32) -> Option<[u8; 4]> {
        let surface = self.surfaces.get(&target.surface)?;
        read_pixel(&surface.front, surface.size, x, y)
    }

    /// Current contents of a texture.
    #[must_use]
    pub fn read_texture(&self, texture: TextureId) -> Option<Vec<u8>> {
        self.textures
            .get(&texture)
            .map(|texture| texture.pixels.clone())
    }

    /// One texel of a texture, or `None` if out of bounds.
    #[must_use]
    pub fn texture_pixel(&self, texture: TextureId, x: u32, y: u32) -> Option<[u8; 4]> {
        let texture = self.textures.get(&texture)?;
        read_pixel(&texture.pixels, texture.size, x, y)
    }

    #[must_use]
    pub const fn bound_state(&self) -> BoundState {
        self.state
    }

    #[must_use]
    pub const fn is_current(&self) -> bool {
        self.current
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    fn assert_current(&self, command: &str) {
        assert!(self.current, "{command} issued without a current context");
    }

    /// Buffer that draw and clear commands currently land in.
    fn draw_buffer(&self) -> Option<DrawBuffer> {
        match (self.state.framebuffer, self.current_surface) {
            (Some(framebuffer), _) => self
                .framebuffers
                .get(&framebuffer)
                .map(|texture| DrawBuffer::Texture(*texture)),
            (None, Some(surface)) => Some(DrawBuffer::Surface(surface)),
            (None, None) => None,
        }
    }

    /// Detach the pixels commands should land in, so textures can be
    /// sampled while they are written.
    fn take_draw_buffer(&mut self) -> Option<(DrawBuffer, Size, Vec<u8>)> {
        let buffer = self.draw_buffer()?;
        let (size, pixels) = match buffer {
            DrawBuffer::Texture(texture_id) => {
                let texture = self.textures.get_mut(&texture_id)?;
                (texture.size, mem::take(&mut texture.pixels))
            }
            DrawBuffer::Surface(surface_id) => {
                let surface = self.surfaces.get_mut(&surface_id)?;
                (surface.size, mem::take(&mut surface.back))
            }
        };
        Some((buffer, size, pixels))
    }

    fn restore_draw_buffer(&mut self, buffer: DrawBuffer, pixels: Vec<u8>) {
        match buffer {
            DrawBuffer::Texture(texture_id) => {
                if let Some(texture) = self.textures.get_mut(&texture_id) {
                    texture.pixels = pixels;
                }
            }
            DrawBuffer::Surface(surface_id) => {
                if let Some(surface) = self.surfaces.get_mut(&surface_id) {
                    surface.back = pixels;
                }
            }
        }
    }

    fn to_screen(&self, vertex: &Vertex) -> ScreenVertex {
        let viewport = self.state.viewport;
        ScreenVertex {
            x: (vertex.position[0] + 1.0)
                .mul_add(0.5 * viewport.width as f32, viewport.x as f32),
            y: (1.0 - vertex.position[1])
                .mul_add(0.5 * viewport.height as f32, viewport.y as f32),
            color: vertex.color,
            tex_coord: vertex.tex_coord,
        }
    }
}

fn read_pixel(pixels: &[u8], size: Size, x: u32, y: u32) -> Option<[u8; 4]> {
    if x >= size.width || y >= size.height {
        return None;
    }
    let offset = ((y * size.width + x) * 4) as usize;
    let pixel = pixels.get(offset..offset + 4)?;
    Some([pixel[0], pixel[1], pixel[2], pixel[3]])
}

fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn edge(from: &ScreenVertex, to: &ScreenVertex, x: f32, y: f32) -> f32 {
    (to.x - from.x).mul_add(y - from.y, -((to.y - from.y) * (x - from.x)))
}

/// Top or left edge of a triangle wound clockwise on a y-down screen.
fn is_top_left(from: &ScreenVertex, to: &ScreenVertex) -> bool {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

fn covers(weight: f32, top_left: bool) -> bool {
    weight > 0.0 || (weight == 0.0 && top_left)
}

/// Rasterize one triangle into `pixels`, restricted to `clip`.
fn fill_triangle(
    pixels: &mut [u8],
    size: Size,
    clip: Rect,
    triangle: [ScreenVertex; 3],
    sampler: Option<&Sampler<'_>>,
    blend: bool,
) {
    let [first, mut second, mut third] = triangle;
    let mut area = edge(&first, &second, third.x, third.y);
    if area == 0.0 {
        return;
    }
    if area < 0.0 {
        mem::swap(&mut second, &mut third);
        area = -area;
    }

    let min_x = first.x.min(second.x).min(third.x).floor().max(clip.x as f32) as i32;
    let min_y = first.y.min(second.y).min(third.y).floor().max(clip.y as f32) as i32;
    let max_x = first.x.max(second.x).max(third.x).ceil().min(clip.right() as f32) as i32;
    let max_y = first.y.max(second.y).max(third.y).ceil().min(clip.bottom() as f32) as i32;

    let top_left = [
        is_top_left(&second, &third),
        is_top_left(&third, &first),
        is_top_left(&first, &second),
    ];

    for py in min_y..max_y {
        for px in min_x..max_x {
            let sample_x = px as f32 + 0.5;
            let sample_y = py as f32 + 0.5;
            let weights = [
                edge(&second, &third, sample_x, sample_y),
                edge(&third, &first, sample_x, sample_y),
                edge(&first, &second, sample_x, sample_y),
            ];
            if !weights
                .iter()
                .zip(top_left)
                .all(|(weight, is_top_left)| covers(*weight, is_top_left))
            {
                continue;
            }
            let bary = weights.map(|weight| weight / area);
            let interpolate = |values: [f32; 3]| {
                bary[0].mul_add(values[0], bary[1].mul_add(values[1], bary[2] * values[2]))
            };
            let mut color = [0.0f32; 4];
            for (channel, out) in color.iter_mut().enumerate() {
                *out = interpolate([
                    first.color[channel],
                    second.color[channel],
                    third.color[channel],
                ]);
            }
            if let Some(sampler) = sampler {
                let tex_coord = [
                    interpolate([first.tex_coord[0], second.tex_coord[0], third.tex_coord[0]]),
                    interpolate([first.tex_coord[1], second.tex_coord[1], third.tex_coord[1]]),
                ];
                let texel = sampler.sample(tex_coord);
                for (out, sampled) in color.iter_mut().zip(texel) {
                    *out *= sampled;
                }
            }
            write_pixel(pixels, size, px as u32, py as u32, color, blend);
        }
    }
}

fn write_pixel(pixels: &mut [u8], size: Size, x: u32, y: u32, color: [f32; 4], blend: bool) {
    let offset = ((y * size.width + x) * 4) as usize;
    let Some(dst) = pixels.get_mut(offset..offset + 4) else {
        return;
    };
    let inv_alpha = 1.0 - color[3].clamp(0.0, 1.0);
    for (channel, out) in dst.iter_mut().enumerate() {
        let value = if blend {
            (f32::from(*out) / 255.0).mul_add(inv_alpha, color[channel])
        } else {
            color[channel]
        };
        *out = to_unorm8(value);
    }
}

impl GpuDevice for CpuDevice {
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
        self.assert_current("delete_program");
        self.programs.remove(&program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn create_texture(&mut self, size: Size, pixels: Option<&[u8]>) -> TextureId {
        self.assert_current("create_texture");
        let len = size.area() as usize * 4;
        let data = match pixels {
            Some(pixels) => {
                assert_eq!(pixels.len(), len, "texture data does not match its size");
                self.stats.texture_uploads += 1;
                pixels.to_vec()
            }
            None => vec![0; len],
        };
        let texture = TextureId(self.next_id());
        self.textures.insert(texture, CpuTexture { size, pixels: data });
        texture
    }

    fn write_texture(&mut self, texture: TextureId, region: Rect, pixels: &[u8]) {
        self.assert_current("write_texture");
        let Some(target) = self.textures.get_mut(&texture) else {
            log::warn!(target: "renderer", "write_texture on unknown texture {texture:?}");
            return;
        };
        assert!(
            Rect::from_size(target.size).contains(region),
            "write_texture region {region:?} outside texture of {:?}",
            target.size
        );
        assert_eq!(
            pixels.len() as u64,
            region.size().area() * 4,
            "write_texture data does not match its region"
        );
        let row_bytes = region.width as usize * 4;
        for row in 0..region.height as usize {
            let dst_offset =
                ((region.y as usize + row) * target.size.width as usize + region.x as usize) * 4;
            let src_offset = row * row_bytes;
            target.pixels[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&pixels[src_offset..src_offset + row_bytes]);
        }
        self.stats.texture_uploads += 1;
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.assert_current("delete_texture");
        self.textures.remove(&texture);
        if self.state.texture == Some(texture) {
            self.state.texture = None;
        }
    }

    fn create_framebuffer(&mut self, size: Size) -> FramebufferId {
        let texture = self.create_texture(size, None);
        let framebuffer = FramebufferId(self.next_id());
        self.framebuffers.insert(framebuffer, texture);
        framebuffer
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).copied()
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.assert_current("delete_framebuffer");
        if let Some(texture) = self.framebuffers.remove(&framebuffer) {
            self.delete_texture(texture);
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
        self.vertices.clear();
        self.vertices.extend_from_slice(vertices);
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
            log::warn!(target: "renderer", "draw_triangles without a program bound");
            return;
        };
        let start = first as usize;
        let end = start + count as usize;
        assert!(
            end <= self.vertices.len(),
            "draw range {start}..{end} exceeds {} uploaded vertices",
            self.vertices.len()
        );
        let Some((buffer, size, mut pixels)) = self.take_draw_buffer() else {
            log::warn!(target: "renderer", "draw_triangles without a draw buffer");
            return;
        };

        let clip = self
            .state
            .scissor
            .intersect(self.state.viewport)
            .intersect(Rect::from_size(size));
        let screen: Vec<ScreenVertex> = self.vertices[start..end]
            .iter()
            .map(|vertex| self.to_screen(vertex))
            .collect();
        let sampler = match kind {
            ShaderKind::ColorFill => None,
            ShaderKind::TexturedQuad => Some(
                self.state
                    .texture
                    .and_then(|texture| self.textures.get(&texture))
                    .map_or_else(
                        || Sampler {
                            size: Size::default(),
                            pixels: &[],
                        },
                        |texture| Sampler {
                            size: texture.size,
                            pixels: &texture.pixels,
                        },
                    ),
            ),
        };
        if !clip.is_empty() {
            for triangle in screen.chunks_exact(3) {
                fill_triangle(
                    &mut pixels,
                    size,
                    clip,
                    [triangle[0], triangle[1], triangle[2]],
                    sampler.as_ref(),
                    self.state.blend,
                );
            }
        }
        self.restore_draw_buffer(buffer, pixels);
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.assert_current("clear");
        self.stats.clears += 1;
        let Some((buffer, size, mut pixels)) = self.take_draw_buffer() else {
            log::warn!(target: "renderer", "clear without a draw buffer");
            return;
        };
        let value = color.map(to_unorm8);
        let region = self.state.scissor.intersect(Rect::from_size(size));
        if !region.is_empty() {
            for y in region.y..region.bottom() {
                let row = (y as u32 * size.width) as usize;
                let start = (row + region.x as usize) * 4;
                let end = start + region.width as usize * 4;
                for pixel in pixels[start..end].chunks_exact_mut(4) {
                    pixel.copy_from_slice(&value);
                }
            }
        }
        self.restore_draw_buffer(buffer, pixels);
    }

    fn swap_buffers(&mut self, target: &RenderTarget) -> AnyResult<()> {
        let surface = self
            .surfaces
            .get_mut(&target.surface)
            .ok_or_else(|| anyhow!("swap_buffers on unknown surface {:?}", target.surface))?;
        surface.front.clone_from(&surface.back);
        if !surface.preserve {
            for pixel in surface.back.chunks_exact_mut(4) {
                pixel.copy_from_slice(&GARBAGE_PIXEL);
            }
        }
        self.stats.swaps += 1;
        Ok(())
    }

    fn finish(&mut self) -> AnyResult<()> {
        Ok(())
    }

    fn content_was_preserved_after_swap(&self, target: &RenderTarget) -> bool {
        self.surfaces
            .get(&target.surface)
            .is_some_and(|surface| surface.preserve)
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}
