//! Deferred command recording.
//!
//! `WgpuDevice` receives immediate-mode `GpuDevice` calls but wgpu wants whole
//! render passes. Draws and clears are recorded here together with the state
//! they were issued under, then encoded when the device flushes.

use crate::pipeline_cache::PipelineKey;
use render_tree::{Rect, Size};
use renderer::{ShaderKind, SurfaceId, TextureId, Vertex};
use std::mem;
use wgpu::TextureFormat;

/// Where a recorded command lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetRef {
    Texture(TextureId),
    Surface(SurfaceId),
}

/// A draw resolved against the bound state.
///
/// `viewport` always lies inside the target; `first` indexes the recorder's
/// vertex list rather than the latest upload once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    pub target: TargetRef,
    pub target_size: Size,
    pub viewport: Rect,
    pub scissor: Rect,
    pub pipeline: PipelineKey,
    pub texture: Option<TextureId>,
    pub first: u32,
    pub count: u32,
}

/// Everything recorded since the previous flush.
#[derive(Debug, Default)]
pub struct RecordedFrame {
    pub vertices: Vec<Vertex>,
    pub commands: Vec<DrawCommand>,
}

/// Full-target quad used to implement scissored clears.
const CLEAR_QUAD: [[f32; 2]; 6] = [
    [-1.0, 1.0],
    [1.0, 1.0],
    [1.0, -1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [-1.0, -1.0],
];

#[derive(Debug, Default)]
pub struct CommandRecorder {
    vertices: Vec<Vertex>,
    upload_base: u32,
    upload_len: u32,
    commands: Vec<DrawCommand>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the vertex data later draws index into.
    pub fn upload(&mut self, vertices: &[Vertex]) {
        if self.commands.is_empty() {
            self.vertices.clear();
        }
        self.upload_base = vertex_count(&self.vertices);
        self.upload_len = vertex_count(vertices);
        self.vertices.extend_from_slice(vertices);
    }

    /// Record a draw whose `first` is relative to the latest upload.
    ///
    /// Returns false when the range lies outside the upload or nothing of
    /// the viewport falls inside the target.
    pub fn draw(&mut self, mut command: DrawCommand) -> bool {
        if command.count == 0
            || command.viewport.is_empty()
            || command.first.saturating_add(command.count) > self.upload_len
        {
            return false;
        }
        let bounds = Rect::from_size(command.target_size);
        if bounds.contains(command.viewport) {
            command.first += self.upload_base;
            self.commands.push(command);
            return true;
        }

        let clamped = command.viewport.intersect(bounds);
        if clamped.is_empty() {
            return false;
        }
        let start = (self.upload_base + command.first) as usize;
        let end = start + command.count as usize;
        let remapped: Vec<Vertex> = self.vertices[start..end]
            .iter()
            .map(|vertex| remap_viewport(*vertex, command.viewport, clamped))
            .collect();
        command.first = vertex_count(&self.vertices);
        command.viewport = clamped;
        self.vertices.extend(remapped);
        self.commands.push(command);
        true
    }

    /// Record a clear of the scissored part of the target.
    pub fn clear(
        &mut self,
        target: TargetRef,
        target_size: Size,
        scissor: Rect,
        format: TextureFormat,
        color: [f32; 4],
    ) {
        let first = vertex_count(&self.vertices);
        self.vertices
            .extend(CLEAR_QUAD.into_iter().map(|position| Vertex {
                position,
                color,
                tex_coord: [0.0, 0.0],
            }));
        self.commands.push(DrawCommand {
            target,
            target_size,
            viewport: Rect::from_size(target_size),
            scissor,
            pipeline: PipelineKey {
                kind: ShaderKind::ColorFill,
                blend: false,
                format,
            },
            texture: None,
            first,
            count: CLEAR_QUAD.len() as u32,
        });
    }

    /// Hand out the recorded commands.
    ///
    /// The latest upload stays available, rebased to the start of the list,
    /// so draws after a flush keep indexing the same data.
    pub fn take(&mut self) -> Option<RecordedFrame> {
        if self.commands.is_empty() {
            return None;
        }
        let start = self.upload_base as usize;
        let end = start + self.upload_len as usize;
        let current_upload = self.vertices[start..end].to_vec();
        self.upload_base = 0;
        Some(RecordedFrame {
            vertices: mem::replace(&mut self.vertices, current_upload),
            commands: mem::take(&mut self.commands),
        })
    }

    #[inline]
    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }

    /// Whether a pending command samples or renders into `texture`.
    pub fn references(&self, texture: TextureId) -> bool {
        self.commands.iter().any(|command| {
            command.texture == Some(texture) || command.target == TargetRef::Texture(texture)
        })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn vertex_count(vertices: &[Vertex]) -> u32 {
    vertices.len() as u32
}

/// Re-express a vertex given in `from`'s NDC in `to`'s NDC.
fn remap_viewport(mut vertex: Vertex, from: Rect, to: Rect) -> Vertex {
    let [x, y] = vertex.position;
    let pixel_x = from.x as f32 + (x + 1.0) * 0.5 * from.width as f32;
    let pixel_y = from.y as f32 + (1.0 - y) * 0.5 * from.height as f32;
    vertex.position = [
        (pixel_x - to.x as f32) / to.width as f32 * 2.0 - 1.0,
        1.0 - (pixel_y - to.y as f32) / to.height as f32 * 2.0,
    ];
    vertex
}
