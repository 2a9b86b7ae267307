//! tiny-skia implementation of `FallbackRasterizer`.
//!
//! Each submitted subtree is drawn into a scratch pixmap covering the
//! canvas clip, then composited onto the canvas. Viewport clips become
//! alpha masks; opacity and blur render their source into a separate layer
//! first.

use crate::fallback::bitmap_font;
use crate::fallback::blur::apply_gaussian_blur;
use crate::fallback::canvas::Canvas;
use crate::fallback::resource_provider::SoftwareResourceProvider;
use crate::fallback::scratch::ScratchPixmapCache;
use crate::fallback::FallbackRasterizer;
use anyhow::{Result as AnyResult, anyhow};
use render_tree::{
    ColorRGBA, FilterNode, Image, ImageId, ImageNode, Matrix3F, Node, NodeKind, RectF, RectNode,
    ResourceProvider, Size, TextNode,
};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tiny_skia::{
    Color, FillRule, FilterQuality, IntSize, Mask, Paint, Path, PathBuilder, Pattern, Pixmap,
    PixmapPaint, Rect as SkiaRect, SpreadMode, Transform,
};

/// Cubic control point distance for a quarter circle.
const KAPPA: f32 = 0.552_284_8;

fn to_skia_transform(matrix: &Matrix3F) -> Transform {
    Transform::from_row(
        matrix.get(0, 0),
        matrix.get(1, 0),
        matrix.get(0, 1),
        matrix.get(1, 1),
        matrix.get(0, 2),
        matrix.get(1, 2),
    )
}

fn solid_paint(color: ColorRGBA) -> Option<Paint<'static>> {
    let color = Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        color.a.clamp(0.0, 1.0),
    )?;
    let mut paint = Paint::default();
    paint.set_color(color);
    paint.anti_alias = true;
    Some(paint)
}

/// Append a rectangle with uniformly rounded corners to `builder`.
fn append_rounded_rect(builder: &mut PathBuilder, rect: RectF, radius: f32) {
    let radius = radius.min(rect.width / 2.0).min(rect.height / 2.0).max(0.0);
    if radius <= 0.0 {
        if let Some(skia_rect) = SkiaRect::from_xywh(rect.x, rect.y, rect.width, rect.height) {
            builder.push_rect(skia_rect);
        }
        return;
    }
    let handle = radius * KAPPA;
    let (left, top, right, bottom) = (rect.x, rect.y, rect.right(), rect.bottom());
    builder.move_to(left + radius, top);
    builder.line_to(right - radius, top);
    builder.cubic_to(right - radius + handle, top, right, top + radius - handle, right, top + radius);
    builder.line_to(right, bottom - radius);
    builder.cubic_to(
        right,
        bottom - radius + handle,
        right - radius + handle,
        bottom,
        right - radius,
        bottom,
    );
    builder.line_to(left + radius, bottom);
    builder.cubic_to(
        left + radius - handle,
        bottom,
        left,
        bottom - radius + handle,
        left,
        bottom - radius,
    );
    builder.line_to(left, top + radius);
    builder.cubic_to(left, top + radius - handle, left + radius - handle, top, left + radius, top);
    builder.close();
}

fn rounded_rect_path(rect: RectF, radius: f32) -> Option<Path> {
    if rect.is_empty() {
        return None;
    }
    let mut builder = PathBuilder::new();
    append_rounded_rect(&mut builder, rect, radius);
    builder.finish()
}

/// Multiply `mask` by `other` in place.
fn combine_masks(mask: &mut Mask, other: &Mask) {
    for (dst, src) in mask.data_mut().iter_mut().zip(other.data()) {
        *dst = ((u16::from(*dst) * u16::from(*src) + 127) / 255) as u8;
    }
}

#[derive(Debug)]
struct CachedImage {
    pixmap: Pixmap,
    last_used_frame: u64,
}

/// Counters for work done since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareRasterizerStats {
    pub submissions: u64,
    pub layers: u64,
    pub images_decoded: u64,
}

#[derive(Debug)]
pub struct SoftwareRasterizer {
    provider: Arc<SoftwareResourceProvider>,
    scratch: ScratchPixmapCache,
    images: HashMap<ImageId, CachedImage>,
    frame: u64,
    stats: SoftwareRasterizerStats,
}

impl SoftwareRasterizer {
    /// `scratch_bytes` bounds the memory kept for reusable layers.
    #[must_use]
    pub fn new(scratch_bytes: usize) -> Self {
        Self {
            provider: Arc::new(SoftwareResourceProvider::new()),
            scratch: ScratchPixmapCache::new(scratch_bytes),
            images: HashMap::new(),
            frame: 0,
            stats: SoftwareRasterizerStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn stats(&self) -> SoftwareRasterizerStats {
        self.stats
    }

    /// Number of images with a decoded pixmap cached.
    #[must_use]
    pub fn cached_image_count(&self) -> usize {
        self.images.len()
    }

    /// Draw `node` into `target` under `transform`, clipped by `mask`.
    fn render(
        &mut self,
        node: &Node,
        target: &mut Pixmap,
        transform: &Matrix3F,
        mask: Option<&Mask>,
    ) -> AnyResult<()> {
        let target_bounds = RectF::new(0.0, 0.0, target.width() as f32, target.height() as f32);
        if transform.map_rect(node.bounds()).intersect(target_bounds).is_empty() {
            return Ok(());
        }
        match node.kind() {
            NodeKind::Rect(rect) => {
                draw_rect(target, rect, to_skia_transform(transform), mask);
                Ok(())
            }
            NodeKind::Image(image) => self.draw_image(target, image, transform, mask),
            NodeKind::Text(text) => {
                draw_text(target, text, to_skia_transform(transform), mask);
                Ok(())
            }
            NodeKind::Composition(composition) => {
                let child_transform = transform.concat(&Matrix3F::translation(
                    composition.offset.x,
                    composition.offset.y,
                ));
                for child in &composition.children {
                    self.render(child, target, &child_transform, mask)?;
                }
                Ok(())
            }
            NodeKind::MatrixTransform(matrix) => {
                let source_transform = transform.concat(&matrix.transform);
                self.render(&matrix.source, target, &source_transform, mask)
            }
            NodeKind::Filter(filter) => self.render_filter(filter, target, transform, mask),
        }
    }

    fn render_filter(
        &mut self,
        filter: &FilterNode,
        target: &mut Pixmap,
        transform: &Matrix3F,
        mask: Option<&Mask>,
    ) -> AnyResult<()> {
        let opacity = filter.opacity.unwrap_or(1.0).clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return Ok(());
        }

        let viewport_mask = filter
            .viewport
            .map(|viewport| build_clip_mask(target, viewport, transform, mask))
            .transpose()?;
        let clip = viewport_mask.as_ref().or(mask);
        let sigma = filter.blur_sigma.filter(|value| *value > 0.0);

        if opacity >= 1.0 && sigma.is_none() {
            return self.render(&filter.source, target, transform, clip);
        }

        // The viewport clips the blurred result, so the source is drawn
        // unclipped into the layer.
        let mut layer = self
            .scratch
            .acquire(Size::new(target.width(), target.height()))?;
        self.stats.layers += 1;
        let rendered = self.render(&filter.source, &mut layer, transform, None);
        if rendered.is_ok() {
            if let Some(sigma) = sigma {
                apply_gaussian_blur(&mut layer, sigma);
            }
            let paint = PixmapPaint {
                opacity,
                ..PixmapPaint::default()
            };
            target.draw_pixmap(0, 0, layer.as_ref(), &paint, Transform::identity(), clip);
        }
        self.scratch.release(layer);
        rendered
    }

    fn draw_image(
        &mut self,
        target: &mut Pixmap,
        node: &ImageNode,
        transform: &Matrix3F,
        mask: Option<&Mask>,
    ) -> AnyResult<()> {
        let image = &node.image;
        let destination = node.destination;
        let size = image.size();
        let Some(rect) =
            SkiaRect::from_xywh(destination.x, destination.y, destination.width, destination.height)
        else {
            return Ok(());
        };
        if size.is_empty() {
            return Ok(());
        }

        let frame = self.frame;
        let cached = match self.images.entry(image.id()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let pixmap = image_pixmap(image)?;
                self.stats.images_decoded += 1;
                entry.insert(CachedImage {
                    pixmap,
                    last_used_frame: frame,
                })
            }
        };
        cached.last_used_frame = frame;

        let image_to_destination = Transform::from_row(
            destination.width / size.width as f32,
            0.0,
            0.0,
            destination.height / size.height as f32,
            destination.x,
            destination.y,
        );
        let paint = Paint {
            shader: Pattern::new(
                cached.pixmap.as_ref(),
                SpreadMode::Pad,
                FilterQuality::Bilinear,
                1.0,
                image_to_destination,
            ),
            anti_alias: true,
            ..Paint::default()
        };
        target.fill_rect(rect, &paint, to_skia_transform(transform), mask);
        Ok(())
    }
}

fn image_pixmap(image: &Image) -> AnyResult<Pixmap> {
    let size = image.size();
    let int_size = IntSize::from_wh(size.width, size.height)
        .ok_or_else(|| anyhow!("image {:?} has an empty size", image.id()))?;
    Pixmap::from_vec(image.pixels().to_vec(), int_size)
        .ok_or_else(|| anyhow!("image {:?} pixel buffer does not match its size", image.id()))
}

fn draw_rect(target: &mut Pixmap, node: &RectNode, transform: Transform, mask: Option<&Mask>) {
    let radius = node.corner_radius.unwrap_or(0.0).max(0.0);
    if let Some(background) = node.background {
        let path = rounded_rect_path(node.rect, radius);
        if let (Some(path), Some(paint)) = (path, solid_paint(background)) {
            target.fill_path(&path, &paint, FillRule::Winding, transform, mask);
        }
    }

    let Some(border) = node.border.filter(|border| border.width > 0.0) else {
        return;
    };
    if node.rect.is_empty() {
        return;
    }
    let mut builder = PathBuilder::new();
    append_rounded_rect(&mut builder, node.rect, radius);
    let inner = node.rect.outset(-border.width);
    if !inner.is_empty() {
        append_rounded_rect(&mut builder, inner, (radius - border.width).max(0.0));
    }
    if let (Some(path), Some(paint)) = (builder.finish(), solid_paint(border.color)) {
        target.fill_path(&path, &paint, FillRule::EvenOdd, transform, mask);
    }
}

fn draw_text(target: &mut Pixmap, node: &TextNode, transform: Transform, mask: Option<&Mask>) {
    let path = bitmap_font::text_path(&node.glyphs, node.offset);
    if let (Some(path), Some(mut paint)) = (path, solid_paint(node.color)) {
        // Glyph cells are pixel-aligned at integer scales.
        paint.anti_alias = false;
        target.fill_path(&path, &paint, FillRule::Winding, transform, mask);
    }
}

/// Coverage mask for `viewport` under `transform`, intersected with
/// `outer` when present.
fn build_clip_mask(
    target: &Pixmap,
    viewport: RectF,
    transform: &Matrix3F,
    outer: Option<&Mask>,
) -> AnyResult<Mask> {
    let mut mask = Mask::new(target.width(), target.height())
        .ok_or_else(|| anyhow!("cannot allocate {}x{} mask", target.width(), target.height()))?;
    if let Some(path) = rounded_rect_path(viewport, 0.0) {
        let anti_alias = !transform.is_axis_aligned();
        mask.fill_path(&path, FillRule::Winding, anti_alias, to_skia_transform(transform));
    }
    if let Some(outer) = outer {
        combine_masks(&mut mask, outer);
    }
    Ok(mask)
}

impl FallbackRasterizer for SoftwareRasterizer {
    fn advance_frame(&mut self) {
        let finished_frame = self.frame;
        self.frame += 1;
        let before = self.images.len();
        self.images
            .retain(|_, cached| cached.last_used_frame >= finished_frame);
        let dropped = before - self.images.len();
        if dropped > 0 {
            log::debug!(target: "renderer", "dropped {dropped} unused decoded images");
        }
    }

    fn submit_offscreen(&mut self, node: &Node, canvas: &mut Canvas) -> AnyResult<()> {
        let clip = canvas.clip_bounds();
        if clip.is_empty() {
            return Ok(());
        }
        let _span = tracing::info_span!("fallback_rasterize", node = node.id().get()).entered();
        self.stats.submissions += 1;

        let mut layer = self.scratch.acquire(clip.size())?;
        let to_layer = Matrix3F::translation(-clip.x as f32, -clip.y as f32).concat(&canvas.transform());
        let rendered = self.render(node, &mut layer, &to_layer, None);
        if rendered.is_ok() {
            canvas.draw_layer(&layer);
        }
        self.scratch.release(layer);
        rendered
    }

    fn reset_context(&mut self) {
        self.scratch.trim();
    }

    fn resource_provider(&self) -> Arc<dyn ResourceProvider> {
        Arc::<SoftwareResourceProvider>::clone(&self.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_tree::{Border, Font, GlyphBuffer, PointF, Rect};

    const SCRATCH_BYTES: usize = 1 << 20;

    fn rasterize(node: &Node, size: Size) -> Canvas {
        let mut rasterizer = SoftwareRasterizer::new(SCRATCH_BYTES);
        rasterizer.advance_frame();
        let mut canvas = Canvas::new(size).unwrap();
        rasterizer.submit_offscreen(node, &mut canvas).unwrap();
        rasterizer.reset_context();
        canvas
    }

    fn pixel(canvas: &Canvas, x: i32, y: i32) -> Vec<u8> {
        canvas.read_region(Rect::new(x, y, 1, 1))
    }

    #[test]
    fn solid_rect_fills_its_pixels() {
        let node = Node::solid_rect(RectF::new(2.0, 2.0, 4.0, 4.0), ColorRGBA::RED);
        let canvas = rasterize(&node, Size::new(8, 8));
        assert_eq!(pixel(&canvas, 3, 3), vec![255, 0, 0, 255]);
        assert_eq!(pixel(&canvas, 1, 1), vec![0, 0, 0, 0]);
    }

    #[test]
    fn canvas_clip_and_transform_position_the_subtree() {
        let node = Node::solid_rect(RectF::new(0.0, 0.0, 2.0, 2.0), ColorRGBA::BLUE);
        let mut rasterizer = SoftwareRasterizer::new(SCRATCH_BYTES);
        let mut canvas = Canvas::new(Size::new(16, 16)).unwrap();
        canvas.save();
        canvas.clip_rect(Rect::new(8, 8, 4, 4));
        canvas.translate(8.0, 8.0);
        rasterizer.submit_offscreen(&node, &mut canvas).unwrap();
        canvas.restore();
        assert_eq!(pixel(&canvas, 9, 9), vec![0, 0, 255, 255]);
        assert_eq!(pixel(&canvas, 10, 10), vec![0, 0, 0, 0]);
        assert_eq!(pixel(&canvas, 1, 1), vec![0, 0, 0, 0]);
    }

    #[test]
    fn border_leaves_interior_empty() {
        let node = Node::rect(
            RectNode::new(RectF::new(0.0, 0.0, 8.0, 8.0)).with_border(Border {
                width: 2.0,
                color: ColorRGBA::GREEN,
            }),
        );
        let canvas = rasterize(&node, Size::new(8, 8));
        assert_eq!(pixel(&canvas, 0, 4), vec![0, 255, 0, 255]);
        assert_eq!(pixel(&canvas, 4, 4), vec![0, 0, 0, 0]);
    }

    #[test]
    fn rounded_corners_are_cut() {
        let node = Node::rect(
            RectNode::new(RectF::new(0.0, 0.0, 16.0, 16.0))
                .with_background(ColorRGBA::RED)
                .with_corner_radius(8.0),
        );
        let canvas = rasterize(&node, Size::new(16, 16));
        assert_eq!(pixel(&canvas, 0, 0), vec![0, 0, 0, 0]);
        assert_eq!(pixel(&canvas, 8, 8), vec![255, 0, 0, 255]);
    }

    #[test]
    fn opacity_and_viewport_filters_apply() {
        let source = Node::solid_rect(RectF::new(0.0, 0.0, 8.0, 8.0), ColorRGBA::WHITE);
        let node = Node::filter(
            FilterNode::new(source)
                .with_opacity(0.5)
                .with_viewport(RectF::new(0.0, 0.0, 4.0, 8.0)),
        );
        let canvas = rasterize(&node, Size::new(8, 8));
        let inside = pixel(&canvas, 1, 1);
        assert!((126..=129).contains(&inside[3]), "{inside:?}");
        assert_eq!(pixel(&canvas, 6, 1), vec![0, 0, 0, 0]);
    }

    #[test]
    fn transparent_filter_draws_nothing() {
        let source = Node::solid_rect(RectF::new(0.0, 0.0, 8.0, 8.0), ColorRGBA::WHITE);
        let node = Node::filter(FilterNode::new(source).with_opacity(0.0));
        let canvas = rasterize(&node, Size::new(8, 8));
        assert!(canvas.pixmap().data().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn blur_spreads_past_source_edges() {
        let source = Node::solid_rect(RectF::new(6.0, 6.0, 4.0, 4.0), ColorRGBA::BLACK);
        let node = Node::filter(FilterNode::new(source).with_blur(1.5));
        let canvas = rasterize(&node, Size::new(16, 16));
        assert!(pixel(&canvas, 5, 8)[3] > 0);
        assert!(pixel(&canvas, 8, 8)[3] < 255);
    }

    #[test]
    fn images_are_scaled_to_destination() {
        let rasterizer = SoftwareRasterizer::new(SCRATCH_BYTES);
        let provider = rasterizer.resource_provider();
        let image = provider
            .create_image(render_tree::ImageData {
                size: Size::new(1, 1),
                alpha_format: render_tree::AlphaFormat::Premultiplied,
                pixels: vec![0, 255, 0, 255],
            })
            .unwrap();
        let node = Node::image(image, RectF::new(0.0, 0.0, 4.0, 4.0));
        let canvas = rasterize(&node, Size::new(4, 4));
        assert_eq!(pixel(&canvas, 3, 3), vec![0, 255, 0, 255]);
    }

    #[test]
    fn unused_images_are_dropped_after_a_frame() {
        let mut rasterizer = SoftwareRasterizer::new(SCRATCH_BYTES);
        let image = rasterizer
            .resource_provider()
            .create_image(render_tree::ImageData {
                size: Size::new(1, 1),
                alpha_format: render_tree::AlphaFormat::Premultiplied,
                pixels: vec![255; 4],
            })
            .unwrap();
        let node = Node::image(image, RectF::new(0.0, 0.0, 2.0, 2.0));
        let mut canvas = Canvas::new(Size::new(2, 2)).unwrap();
        rasterizer.advance_frame();
        rasterizer.submit_offscreen(&node, &mut canvas).unwrap();
        assert_eq!(rasterizer.cached_image_count(), 1);
        rasterizer.advance_frame();
        assert_eq!(rasterizer.cached_image_count(), 1);
        rasterizer.advance_frame();
        assert_eq!(rasterizer.cached_image_count(), 0);
    }

    #[test]
    fn text_draws_glyph_pixels() {
        let glyphs = Arc::new(GlyphBuffer::new("H", Font::new(8.0)));
        let node = Node::text(glyphs, PointF::new(0.0, 7.0), ColorRGBA::BLACK);
        let canvas = rasterize(&node, Size::new(8, 8));
        // Left stem of the H.
        assert_eq!(pixel(&canvas, 0, 0), vec![0, 0, 0, 255]);
        // Gap between the stems on the top row.
        assert_eq!(pixel(&canvas, 2, 0), vec![0, 0, 0, 0]);
    }
}
