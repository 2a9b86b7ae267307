//! CPU-side canvas mirroring an offscreen framebuffer.
//!
//! The canvas wraps a tiny-skia `Pixmap` with a stack of graphics states
//! (device clip rectangle and transform). Regions written through the
//! canvas are recorded as dirty so the owner can upload exactly those
//! regions into the matching GPU framebuffer.

use anyhow::{Result as AnyResult, anyhow};
use core::{fmt, mem};
use render_tree::{ColorRGBA, Matrix3F, Rect, Size};
use tiny_skia::{Pixmap, PixmapPaint, Transform};

#[derive(Debug, Clone, Copy)]
struct CanvasState {
    transform: Matrix3F,
    clip: Rect,
}

pub struct Canvas {
    pixmap: Pixmap,
    state_stack: Vec<CanvasState>,
    current_state: CanvasState,
    dirty: Vec<Rect>,
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f
            .debug_struct("Canvas")
            .field("size", &self.size())
            .field("state_depth", &self.state_stack.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Canvas {
    /// Create a transparent canvas.
    ///
    /// # Errors
    /// Returns an error if the size is empty or too large to allocate.
    pub fn new(size: Size) -> AnyResult<Self> {
        let pixmap = Pixmap::new(size.width, size.height)
            .ok_or_else(|| anyhow!("cannot allocate {}x{} canvas", size.width, size.height))?;
        Ok(Self {
            pixmap,
            state_stack: Vec::new(),
            current_state: CanvasState {
                transform: Matrix3F::identity(),
                clip: Rect::from_size(size),
            },
            dirty: Vec::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.pixmap.width(), self.pixmap.height())
    }

    /// Push a copy of the current state.
    pub fn save(&mut self) {
        self.state_stack.push(self.current_state);
    }

    /// Pop the most recently saved state. Does nothing if none is saved.
    pub fn restore(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
        }
    }

    #[inline]
    #[must_use]
    pub fn state_depth(&self) -> usize {
        self.state_stack.len()
    }

    /// Intersect the clip with a device-space rectangle.
    pub fn clip_rect(&mut self, rect: Rect) {
        self.current_state.clip = self.current_state.clip.intersect(rect);
    }

    /// Current clip in device pixels. May be empty.
    #[inline]
    #[must_use]
    pub const fn clip_bounds(&self) -> Rect {
        self.current_state.clip
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.concat(&Matrix3F::translation(dx, dy));
    }

    /// Pre-multiply the current transform: `matrix` applies first.
    pub fn concat(&mut self, matrix: &Matrix3F) {
        self.current_state.transform = self.current_state.transform.concat(matrix);
    }

    #[inline]
    #[must_use]
    pub const fn transform(&self) -> Matrix3F {
        self.current_state.transform
    }

    /// Replace every pixel inside the clip with `color`.
    pub fn clear(&mut self, color: ColorRGBA) {
        let clip = self.current_state.clip;
        if clip.is_empty() {
            return;
        }
        let value = color.premultiplied().map(|channel| (channel * 255.0).round() as u8);
        let width = self.pixmap.width() as usize;
        let data = self.pixmap.data_mut();
        for y in clip.y..clip.bottom() {
            let start = (y as usize * width + clip.x as usize) * 4;
            let end = start + clip.width as usize * 4;
            for pixel in data[start..end].chunks_exact_mut(4) {
                pixel.copy_from_slice(&value);
            }
        }
        self.mark_dirty(clip);
    }

    /// Composite `layer` over the clip region, with the layer's top-left
    /// at the clip origin.
    ///
    /// # Panics
    /// Panics if the layer does not fit inside the clip.
    pub fn draw_layer(&mut self, layer: &Pixmap) {
        let clip = self.current_state.clip;
        if clip.is_empty() {
            return;
        }
        assert!(
            layer.width() <= clip.width && layer.height() <= clip.height,
            "layer of {}x{} exceeds clip {clip:?}",
            layer.width(),
            layer.height()
        );
        let covered = Rect::new(clip.x, clip.y, layer.width(), layer.height());
        self.pixmap.draw_pixmap(
            clip.x,
            clip.y,
            layer.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        self.mark_dirty(covered);
    }

    fn mark_dirty(&mut self, rect: Rect) {
        if self.dirty.iter().any(|dirty| dirty.contains(rect)) {
            return;
        }
        self.dirty.retain(|dirty| !rect.contains(*dirty));
        self.dirty.push(rect);
    }

    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Regions written since the last call, in device pixels.
    pub fn take_dirty_rects(&mut self) -> Vec<Rect> {
        mem::take(&mut self.dirty)
    }

    /// Tightly packed premultiplied RGBA8 rows covering `rect`.
    #[must_use]
    pub fn read_region(&self, rect: Rect) -> Vec<u8> {
        let rect = rect.intersect(Rect::from_size(self.size()));
        let width = self.pixmap.width() as usize;
        let data = self.pixmap.data();
        let mut out = Vec::with_capacity(rect.size().area() as usize * 4);
        for y in rect.y..rect.bottom() {
            let start = (y as usize * width + rect.x as usize) * 4;
            out.extend_from_slice(&data[start..start + rect.width as usize * 4]);
        }
        out
    }

    #[inline]
    #[must_use]
    pub const fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }
}
