//! Scheduling of one frame's draw objects.
//!
//! Draws are collected in traversal order into two lists: offscreen draws,
//! which render into framebuffers sampled later in the frame, and onscreen
//! draws. Each list is executed as one phase. Within a phase, consecutive
//! draws that share program, texture, blend, scissor and destination are
//! merged into a single device draw over adjacent vertex ranges. Draws are
//! never reordered.

use crate::backend::{GpuDevice, ShaderKind, TextureId};
use crate::rasterizer::draw_object::{BaseState, Destination, DrawObject};
use crate::rasterizer::graphics_state::GraphicsState;
use crate::rasterizer::shader_program_manager::ShaderProgramManager;
use render_tree::{ColorRGBA, Rect};

#[derive(Debug, Clone)]
struct Entry {
    base: BaseState,
    object: DrawObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchKey {
    base: BaseState,
    program: Option<ShaderKind>,
    texture: Option<TextureId>,
    blend: bool,
}

#[derive(Debug, Clone, Copy)]
enum BatchOp {
    Clear(ColorRGBA),
    Draw { first: u32, count: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Batch {
    key: BatchKey,
    op: BatchOp,
}

#[derive(Debug, Default)]
pub struct DrawObjectManager {
    onscreen: Vec<Entry>,
    offscreen: Vec<Entry>,
    onscreen_batches: Option<Vec<Batch>>,
}

impl DrawObjectManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a draw into the bound render target.
    ///
    /// # Panics
    /// Panics if `base` targets an offscreen destination.
    pub fn add_onscreen_draw(&mut self, base: BaseState, object: DrawObject) {
        assert_eq!(
            base.destination,
            Destination::Onscreen,
            "onscreen draw with an offscreen destination"
        );
        self.onscreen.push(Entry { base, object });
    }

    /// Queue a draw into an offscreen target. Executed before any onscreen
    /// draw, in submission order.
    ///
    /// # Panics
    /// Panics if `base` targets the onscreen destination.
    pub fn add_offscreen_draw(&mut self, base: BaseState, object: DrawObject) {
        assert_ne!(
            base.destination,
            Destination::Onscreen,
            "offscreen draw with an onscreen destination"
        );
        self.offscreen.push(Entry { base, object });
    }

    #[inline]
    #[must_use]
    pub fn onscreen_len(&self) -> usize {
        self.onscreen.len()
    }

    #[inline]
    #[must_use]
    pub fn offscreen_len(&self) -> usize {
        self.offscreen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.onscreen.is_empty() && self.offscreen.is_empty()
    }

    /// Upload and execute every offscreen draw in its own vertex phase.
    /// Leaves an offscreen framebuffer bound; the caller rebinds the default
    /// framebuffer. Returns the number of device draw calls.
    pub fn execute_offscreen_rasterize(
        &mut self,
        gpu: &mut dyn GpuDevice,
        state: &mut GraphicsState,
        programs: &mut ShaderProgramManager,
    ) -> usize {
        if self.offscreen.is_empty() {
            return 0;
        }
        let _span = tracing::info_span!("offscreen_rasterize", draws = self.offscreen.len()).entered();

        // Vertices are generated against each destination's own size.
        let onscreen_clip = state.clip_size();
        state.begin_vertex_phase();
        let batches = build_batches(&self.offscreen, state, |state, base| {
            if let Destination::Offscreen { size, .. } = base.destination {
                state.set_clip_adjustment(size);
            }
        });
        state.set_clip_adjustment(onscreen_clip);
        state.update_vertex_data(gpu);

        issue_batches(&batches, gpu, state, programs)
    }

    /// Write every onscreen draw into the shared vertex arena and upload it.
    pub fn execute_onscreen_update_vertex_buffer(
        &mut self,
        gpu: &mut dyn GpuDevice,
        state: &mut GraphicsState,
    ) {
        let _span = tracing::info_span!("update_vertex_buffer", draws = self.onscreen.len()).entered();
        state.begin_vertex_phase();
        let batches = build_batches(&self.onscreen, state, |_, _| {});
        if state.vertex_count() > 0 {
            state.update_vertex_data(gpu);
        }
        self.onscreen_batches = Some(batches);
    }

    /// Issue the onscreen draws in traversal order. Returns the number of
    /// device draw calls.
    ///
    /// # Panics
    /// Panics when called without a preceding vertex buffer update.
    pub fn execute_onscreen_rasterize(
        &mut self,
        gpu: &mut dyn GpuDevice,
        state: &mut GraphicsState,
        programs: &mut ShaderProgramManager,
    ) -> usize {
        let batches = self.onscreen_batches.take().unwrap_or_default();
        assert!(
            batches.is_empty() || !self.onscreen.is_empty(),
            "onscreen batches without draws"
        );
        assert!(
            self.onscreen.is_empty() || !batches.is_empty(),
            "onscreen rasterize before vertex upload"
        );
        let _span = tracing::info_span!("onscreen_rasterize", batches = batches.len()).entered();
        issue_batches(&batches, gpu, state, programs)
    }
}

/// Allocate vertices for `entries` in order and merge consecutive
/// compatible draws. `prepare` runs before each entry's vertices are built.
fn build_batches(
    entries: &[Entry],
    state: &mut GraphicsState,
    mut prepare: impl FnMut(&mut GraphicsState, &BaseState),
) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    for entry in entries {
        let key = BatchKey {
            base: entry.base,
            program: entry.object.shader_kind(),
            texture: entry.object.texture(),
            blend: entry.object.requires_blend(),
        };
        if let DrawObject::Clear { color } = entry.object {
            batches.push(Batch {
                key,
                op: BatchOp::Clear(color),
            });
            continue;
        }

        prepare(state, &entry.base);
        let Some(vertices) = entry.object.vertices(state) else {
            continue;
        };
        let (first, slot) = state.allocate_vertex_data(vertices.len());
        slot.copy_from_slice(&vertices);
        let count = vertices.len() as u32;

        let merged = match batches.last_mut() {
            Some(Batch {
                key: last_key,
                op:
                    BatchOp::Draw {
                        first: last_first,
                        count: last_count,
                    },
            }) if *last_key == key && *last_first + *last_count == first => {
                *last_count += count;
                true
            }
            _ => false,
        };
        if !merged {
            batches.push(Batch {
                key,
                op: BatchOp::Draw { first, count },
            });
        }
    }
    batches
}

fn issue_batches(
    batches: &[Batch],
    gpu: &mut dyn GpuDevice,
    state: &mut GraphicsState,
    programs: &mut ShaderProgramManager,
) -> usize {
    let mut draw_calls = 0;
    for batch in batches {
        let base = batch.key.base;
        state.bind_framebuffer(gpu, base.destination.framebuffer());
        if let Destination::Offscreen { size, .. } = base.destination {
            state.viewport(gpu, Rect::from_size(size));
        }
        state.scissor(gpu, base.scissor);
        match batch.op {
            BatchOp::Clear(color) => state.clear(gpu, color),
            BatchOp::Draw { first, count } => {
                let program = batch
                    .key
                    .program
                    .map(|kind| programs.get_program(gpu, kind));
                state.use_program(gpu, program);
                if batch.key.texture.is_some() {
                    state.bind_texture(gpu, batch.key.texture);
                }
                if batch.key.blend {
                    state.enable_blend(gpu);
                } else {
                    state.disable_blend(gpu);
                }
                state.draw_triangles(gpu, first, count);
                draw_calls += 1;
            }
        }
    }
    draw_calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuDevice, RenderTarget};
    use render_tree::{PointF, RectF, Size};

    const SIZE: Size = Size::new(8, 8);

    fn setup() -> (CpuDevice, RenderTarget, GraphicsState, ShaderProgramManager) {
        let mut gpu = CpuDevice::new();
        let target = gpu.create_render_target(SIZE, true);
        gpu.make_current(Some(&target));
        let mut state = GraphicsState::new();
        state.set_clip_adjustment(SIZE);
        state.viewport(&mut gpu, Rect::from_size(SIZE));
        state.begin_frame();
        (gpu, target, state, ShaderProgramManager::new())
    }

    fn onscreen() -> BaseState {
        BaseState {
            scissor: Rect::from_size(SIZE),
            destination: Destination::Onscreen,
        }
    }

    fn quad(rect: RectF, color: ColorRGBA) -> DrawObject {
        DrawObject::PolyColor {
            corners: [
                PointF::new(rect.x, rect.y),
                PointF::new(rect.right(), rect.y),
                PointF::new(rect.right(), rect.bottom()),
                PointF::new(rect.x, rect.bottom()),
            ],
            color,
        }
    }

    #[test]
    fn consecutive_compatible_draws_merge() {
        let (mut gpu, _target, mut state, mut programs) = setup();
        let mut manager = DrawObjectManager::new();
        for index in 0..3 {
            let rect = RectF::new(index as f32, 0.0, 1.0, 1.0);
            manager.add_onscreen_draw(onscreen(), quad(rect, ColorRGBA::RED));
        }
        manager.execute_onscreen_update_vertex_buffer(&mut gpu, &mut state);
        let calls = manager.execute_onscreen_rasterize(&mut gpu, &mut state, &mut programs);
        assert_eq!(calls, 1);
        assert_eq!(gpu.stats().draw_calls, 1);
        assert_eq!(gpu.stats().vertex_uploads, 1);
    }

    #[test]
    fn incompatible_draws_stay_separate_and_ordered() {
        let (mut gpu, target, mut state, mut programs) = setup();
        let mut manager = DrawObjectManager::new();
        let full = RectF::new(0.0, 0.0, 8.0, 8.0);
        manager.add_onscreen_draw(onscreen(), quad(full, ColorRGBA::RED));
        manager.add_onscreen_draw(onscreen(), quad(full, ColorRGBA::BLUE.with_opacity(0.5)));
        manager.add_onscreen_draw(onscreen(), quad(RectF::new(0.0, 0.0, 4.0, 4.0), ColorRGBA::GREEN));
        manager.execute_onscreen_update_vertex_buffer(&mut gpu, &mut state);
        let calls = manager.execute_onscreen_rasterize(&mut gpu, &mut state, &mut programs);
        assert_eq!(calls, 3);

        gpu.swap_buffers(&target).unwrap();
        assert_eq!(gpu.surface_pixel(&target, 1, 1), Some([0, 255, 0, 255]));
        assert_eq!(gpu.surface_pixel(&target, 6, 6), Some([128, 0, 128, 255]));
    }

    #[test]
    fn empty_phases_touch_nothing() {
        let (mut gpu, _target, mut state, mut programs) = setup();
        let before = gpu.stats();
        let mut manager = DrawObjectManager::new();
        assert_eq!(manager.execute_offscreen_rasterize(&mut gpu, &mut state, &mut programs), 0);
        manager.execute_onscreen_update_vertex_buffer(&mut gpu, &mut state);
        assert_eq!(manager.execute_onscreen_rasterize(&mut gpu, &mut state, &mut programs), 0);
        assert_eq!(gpu.stats(), before);
    }

    #[test]
    fn offscreen_draws_use_destination_coordinates() {
        let (mut gpu, _target, mut state, mut programs) = setup();
        let framebuffer_size = Size::new(4, 4);
        let framebuffer = gpu.create_framebuffer(framebuffer_size);
        let base = BaseState {
            scissor: Rect::from_size(framebuffer_size),
            destination: Destination::Offscreen {
                framebuffer,
                size: framebuffer_size,
            },
        };
        let mut manager = DrawObjectManager::new();
        manager.add_offscreen_draw(base, DrawObject::Clear { color: ColorRGBA::WHITE });
        manager.add_offscreen_draw(base, quad(RectF::new(2.0, 2.0, 2.0, 2.0), ColorRGBA::RED));
        let calls = manager.execute_offscreen_rasterize(&mut gpu, &mut state, &mut programs);
        assert_eq!(calls, 1);
        assert_eq!(state.clip_size(), SIZE);

        let texture = gpu.framebuffer_texture(framebuffer).unwrap();
        assert_eq!(gpu.texture_pixel(texture, 0, 0), Some([255, 255, 255, 255]));
        assert_eq!(gpu.texture_pixel(texture, 3, 3), Some([255, 0, 0, 255]));
        assert_eq!(gpu.bound_state().framebuffer, Some(framebuffer));
    }
}
