//! Translation of a render tree into draw objects.
//!
//! The visitor walks the tree once per frame, tracking the accumulated
//! transform, scissor, folded opacity and destination. Content the GPU
//! shaders draw directly becomes `PolyColor` and `RectTexture` draws.
//! Everything else is rasterized by the fallback into a cached offscreen
//! target and drawn as a textured quad.

use crate::backend::{GpuDevice, TextureId};
use crate::fallback::FallbackRasterizer;
use crate::rasterizer::draw_object::{BaseState, Destination, DrawObject, FULL_TEX_COORDS};
use crate::rasterizer::draw_object_manager::DrawObjectManager;
use crate::rasterizer::hardware_rasterizer::RasterizerMetrics;
use crate::rasterizer::image_texture_cache::ImageTextureCache;
use crate::rasterizer::offscreen_target_manager::{
    AtlasId, OffscreenTargetKey, OffscreenTargetManager,
};
use anyhow::{Result as AnyResult, anyhow};
use render_tree::{
    ColorRGBA, FilterNode, Matrix3F, Node, NodeKind, PointF, Rect, RectF, RectNode,
};

/// Everything the visitor needs for one frame.
pub struct RasterizeComponents<'frame> {
    pub gpu: &'frame mut dyn GpuDevice,
    pub offscreen_targets: &'frame mut OffscreenTargetManager,
    pub images: &'frame mut ImageTextureCache,
    pub fallback: &'frame mut dyn FallbackRasterizer,
    pub draw_objects: &'frame mut DrawObjectManager,
    /// Atlases whose canvases were drawn to this frame, without repeats.
    pub canvases_used_this_frame: &'frame mut Vec<AtlasId>,
    pub metrics: &'frame mut RasterizerMetrics,
    /// Compose opacity groups with hardware offscreen passes.
    pub offscreen_composition: bool,
}

impl RasterizeComponents<'_> {
    /// Rasterize `node`, placed by `transform` within the destination, into
    /// an offscreen target covering `viewport`. Returns the target texture
    /// and the transform from the unit square to the target's texture
    /// coordinates.
    ///
    /// # Errors
    /// Returns an error if no offscreen target or working memory could be
    /// allocated.
    pub fn submit_to_fallback_rasterizer(
        &mut self,
        node: &Node,
        transform: &Matrix3F,
        viewport: Rect,
    ) -> AnyResult<(TextureId, Matrix3F)> {
        let placement =
            Matrix3F::translation(-viewport.x as f32, -viewport.y as f32).concat(transform);
        let key = OffscreenTargetKey::new(node.id(), viewport.size(), &placement);

        if let Some(target) = self.offscreen_targets.get_cached_offscreen_target(&key) {
            self.metrics.offscreen_hits += 1;
            return Ok((target.texture, target.texcoord_transform()));
        }
        self.metrics.offscreen_misses += 1;

        let target = self
            .offscreen_targets
            .allocate_offscreen_target(self.gpu, key)?;
        if !self.canvases_used_this_frame.contains(&target.atlas) {
            self.canvases_used_this_frame.push(target.atlas);
        }
        let canvas = self
            .offscreen_targets
            .canvas_mut(target.atlas)
            .ok_or_else(|| anyhow!("offscreen atlas {:?} has no canvas", target.atlas))?;

        let target_rect = target.target_rect;
        canvas.save();
        canvas.clip_rect(target_rect);
        canvas.clear(ColorRGBA::TRANSPARENT);
        canvas.translate(target_rect.x as f32, target_rect.y as f32);
        canvas.concat(&placement);
        let rasterized = self.fallback.submit_offscreen(node, canvas);
        canvas.restore();
        rasterized?;

        self.metrics.fallback_rasterizations += 1;
        log::trace!(
            target: "renderer",
            "fallback rasterized node {} into {:?}",
            node.id().get(),
            target_rect
        );
        Ok((target.texture, target.texcoord_transform()))
    }
}

/// Draw state inherited down the tree.
#[derive(Debug, Clone, Copy)]
struct DrawState {
    transform: Matrix3F,
    scissor: Rect,
    /// Opacity folded into the next primitive drawn.
    opacity: f32,
    destination: Destination,
}

/// Snap to the pixels whose centres lie inside `rect`.
fn snap_to_pixels(rect: RectF) -> Rect {
    let left = rect.x.round();
    let top = rect.y.round();
    let right = rect.right().round();
    let bottom = rect.bottom().round();
    Rect::new(
        left as i32,
        top as i32,
        (right - left).max(0.0) as u32,
        (bottom - top).max(0.0) as u32,
    )
}

/// Corners of a device rect, clockwise from the top-left.
fn rect_corners(rect: Rect) -> [PointF; 4] {
    let rect = rect.to_rect_f();
    [
        PointF::new(rect.x, rect.y),
        PointF::new(rect.right(), rect.y),
        PointF::new(rect.right(), rect.bottom()),
        PointF::new(rect.x, rect.bottom()),
    ]
}

/// True when the subtree draws at most one primitive, so a group opacity
/// can be folded into that primitive.
fn is_single_primitive(node: &Node) -> bool {
    match node.kind() {
        NodeKind::Rect(_) | NodeKind::Image(_) | NodeKind::Text(_) => true,
        NodeKind::MatrixTransform(matrix) => is_single_primitive(&matrix.source),
        NodeKind::Composition(composition) => match composition.children.as_slice() {
            [child] => is_single_primitive(child),
            _ => false,
        },
        NodeKind::Filter(_) => false,
    }
}

/// Walks a render tree, turning each node into draw objects or fallback
/// submissions under the accumulated transform, scissor and opacity.
pub struct RenderTreeNodeVisitor<'frame> {
    components: RasterizeComponents<'frame>,
}

impl<'frame> RenderTreeNodeVisitor<'frame> {
    #[must_use]
    pub const fn new(components: RasterizeComponents<'frame>) -> Self {
        Self { components }
    }

    /// Visit `root` drawing onscreen within `scissor`.
    pub fn visit_root(&mut self, root: &Node, scissor: Rect) {
        let _span = tracing::info_span!("visit_render_tree").entered();
        let state = DrawState {
            transform: Matrix3F::identity(),
            scissor,
            opacity: 1.0,
            destination: Destination::Onscreen,
        };
        if !scissor.is_empty() {
            self.visit(root, state);
        }
    }

    fn visit(&mut self, node: &Node, state: DrawState) {
        let device_bounds = state.transform.map_rect(node.bounds());
        if device_bounds.intersect(state.scissor.to_rect_f()).is_empty() {
            self.components.metrics.culled_nodes += 1;
            return;
        }

        match node.kind() {
            NodeKind::Composition(composition) => {
                let child_state = DrawState {
                    transform: state.transform.concat(&Matrix3F::translation(
                        composition.offset.x,
                        composition.offset.y,
                    )),
                    ..state
                };
                for child in &composition.children {
                    self.visit(child, child_state);
                }
            }
            NodeKind::MatrixTransform(matrix) => {
                let source_state = DrawState {
                    transform: state.transform.concat(&matrix.transform),
                    ..state
                };
                self.visit(&matrix.source, source_state);
            }
            NodeKind::Filter(filter) => self.visit_filter(node, filter, state),
            NodeKind::Rect(rect) => self.visit_rect(node, rect, state),
            NodeKind::Image(image) => {
                let texture = self
                    .components
                    .images
                    .get_or_upload(self.components.gpu, &image.image);
                self.add_draw(
                    state,
                    DrawObject::RectTexture {
                        corners: state.transform.map_quad(image.destination),
                        tex_coords: FULL_TEX_COORDS,
                        texture,
                        opacity: state.opacity,
                    },
                );
            }
            NodeKind::Text(_) => self.draw_with_fallback(node, state),
        }
    }

    fn visit_rect(&mut self, node: &Node, rect: &RectNode, state: DrawState) {
        if !rect.is_solid_color() {
            self.draw_with_fallback(node, state);
            return;
        }
        let Some(background) = rect.background else {
            return;
        };
        let color = background.with_opacity(state.opacity);
        if color.is_transparent() {
            return;
        }
        self.add_draw(
            state,
            DrawObject::PolyColor {
                corners: state.transform.map_quad(rect.rect),
                color,
            },
        );
    }

    fn visit_filter(&mut self, node: &Node, filter: &FilterNode, state: DrawState) {
        if filter.blur_sigma.is_some_and(|sigma| sigma > 0.0) {
            self.draw_with_fallback(node, state);
            return;
        }
        let opacity = filter.opacity.unwrap_or(1.0).clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return;
        }

        let mut inner = state;
        if let Some(viewport) = filter.viewport {
            if !state.transform.is_axis_aligned() {
                self.draw_with_fallback(node, state);
                return;
            }
            let clip = snap_to_pixels(state.transform.map_rect(viewport));
            inner.scissor = state.scissor.intersect(clip);
            if inner.scissor.is_empty() {
                return;
            }
        }

        if opacity >= 1.0 {
            self.visit(&filter.source, inner);
        } else if is_single_primitive(&filter.source) {
            inner.opacity *= opacity;
            self.visit(&filter.source, inner);
        } else if self.components.offscreen_composition {
            let composed = self.compose_with_opacity(&filter.source, inner, opacity);
            if let Err(error) = composed {
                log::warn!(
                    target: "renderer",
                    "opacity group for node {} falls back: {error:#}",
                    node.id().get()
                );
                self.draw_with_fallback(node, state);
            }
        } else {
            self.draw_with_fallback(node, state);
        }
    }

    /// Draw `source` into a pooled framebuffer with hardware draws, then
    /// draw that framebuffer as a translucent quad.
    fn compose_with_opacity(
        &mut self,
        source: &Node,
        state: DrawState,
        opacity: f32,
    ) -> AnyResult<()> {
        let bounds = state
            .transform
            .map_rect(source.bounds())
            .round_out()
            .intersect(state.scissor);
        if bounds.is_empty() {
            return Ok(());
        }
        let target = self
            .components
            .offscreen_targets
            .acquire_composition_target(self.components.gpu, bounds.size())?;
        self.components.metrics.composition_targets += 1;

        let destination = Destination::Offscreen {
            framebuffer: target.framebuffer,
            size: target.size,
        };
        let group_state = DrawState {
            transform: Matrix3F::translation(-bounds.x as f32, -bounds.y as f32)
                .concat(&state.transform),
            scissor: Rect::from_size(bounds.size()),
            opacity: 1.0,
            destination,
        };
        self.add_draw(
            group_state,
            DrawObject::Clear {
                color: ColorRGBA::TRANSPARENT,
            },
        );
        self.visit(source, group_state);

        let max_u = bounds.width as f32 / target.size.width as f32;
        let max_v = bounds.height as f32 / target.size.height as f32;
        self.add_draw(
            state,
            DrawObject::RectTexture {
                corners: rect_corners(bounds),
                tex_coords: [[0.0, 0.0], [max_u, 0.0], [max_u, max_v], [0.0, max_v]],
                texture: target.texture,
                opacity: state.opacity * opacity,
            },
        );
        Ok(())
    }

    fn draw_with_fallback(&mut self, node: &Node, state: DrawState) {
        let viewport = state
            .transform
            .map_rect(node.bounds())
            .round_out()
            .intersect(state.scissor);
        if viewport.is_empty() {
            return;
        }
        match self
            .components
            .submit_to_fallback_rasterizer(node, &state.transform, viewport)
        {
            Ok((texture, texcoord_transform)) => {
                let tex_coords = [
                    PointF::new(0.0, 0.0),
                    PointF::new(1.0, 0.0),
                    PointF::new(1.0, 1.0),
                    PointF::new(0.0, 1.0),
                ]
                .map(|corner| {
                    let mapped = texcoord_transform.map_point(corner);
                    [mapped.x, mapped.y]
                });
                self.add_draw(
                    state,
                    DrawObject::RectTexture {
                        corners: rect_corners(viewport),
                        tex_coords,
                        texture,
                        opacity: state.opacity,
                    },
                );
            }
            Err(error) => {
                log::warn!(
                    target: "renderer",
                    "skipping node {}: fallback rasterization failed: {error:#}",
                    node.id().get()
                );
            }
        }
    }

    fn add_draw(&mut self, state: DrawState, object: DrawObject) {
        let base = BaseState {
            scissor: state.scissor,
            destination: state.destination,
        };
        if state.destination == Destination::Onscreen {
            self.components.draw_objects.add_onscreen_draw(base, object);
        } else {
            self.components.draw_objects.add_offscreen_draw(base, object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuDevice;
    use crate::fallback::SoftwareRasterizer;
    use render_tree::{NodeRef, Size};

    const VIEWPORT: Size = Size::new(64, 64);

    struct Harness {
        gpu: CpuDevice,
        offscreen_targets: OffscreenTargetManager,
        images: ImageTextureCache,
        fallback: SoftwareRasterizer,
        draw_objects: DrawObjectManager,
        canvases: Vec<AtlasId>,
        metrics: RasterizerMetrics,
    }

    impl Harness {
        fn new() -> Self {
            let mut gpu = CpuDevice::new();
            gpu.make_current(None);
            let mut offscreen_targets = OffscreenTargetManager::new(2);
            offscreen_targets.update(&mut gpu, VIEWPORT);
            Self {
                gpu,
                offscreen_targets,
                images: ImageTextureCache::new(),
                fallback: SoftwareRasterizer::new(1 << 20),
                draw_objects: DrawObjectManager::new(),
                canvases: Vec::new(),
                metrics: RasterizerMetrics::default(),
            }
        }

        fn visit(&mut self, tree: &Node, offscreen_composition: bool) {
            RenderTreeNodeVisitor::new(RasterizeComponents {
                gpu: &mut self.gpu,
                offscreen_targets: &mut self.offscreen_targets,
                images: &mut self.images,
                fallback: &mut self.fallback,
                draw_objects: &mut self.draw_objects,
                canvases_used_this_frame: &mut self.canvases,
                metrics: &mut self.metrics,
                offscreen_composition,
            })
            .visit_root(tree, Rect::from_size(VIEWPORT));
        }
    }

    fn two_rects() -> Vec<NodeRef> {
        vec![
            Node::solid_rect(RectF::new(0.0, 0.0, 10.0, 10.0), ColorRGBA::RED),
            Node::solid_rect(RectF::new(5.0, 5.0, 10.0, 10.0), ColorRGBA::BLUE),
        ]
    }

    #[test]
    fn transparent_filter_draws_nothing() {
        let mut harness = Harness::new();
        let tree = Node::filter(FilterNode::new(Node::composition(two_rects())).with_opacity(0.0));
        harness.visit(&tree, true);
        assert!(harness.draw_objects.is_empty());
    }

    #[test]
    fn opacity_folds_into_a_single_primitive() {
        let mut harness = Harness::new();
        let rect = Node::solid_rect(RectF::new(0.0, 0.0, 10.0, 10.0), ColorRGBA::RED);
        let tree = Node::filter(FilterNode::new(rect).with_opacity(0.5));
        harness.visit(&tree, true);
        assert_eq!(harness.draw_objects.onscreen_len(), 1);
        assert_eq!(harness.draw_objects.offscreen_len(), 0);
        assert_eq!(harness.metrics.composition_targets, 0);
    }

    #[test]
    fn opacity_groups_compose_offscreen() {
        let mut harness = Harness::new();
        let tree =
            Node::filter(FilterNode::new(Node::composition(two_rects())).with_opacity(0.5));
        harness.visit(&tree, true);
        assert_eq!(harness.metrics.composition_targets, 1);
        // Clear plus both rects, then one textured quad onscreen.
        assert_eq!(harness.draw_objects.offscreen_len(), 3);
        assert_eq!(harness.draw_objects.onscreen_len(), 1);
        assert_eq!(harness.metrics.fallback_rasterizations, 0);
    }

    #[test]
    fn opacity_groups_fall_back_without_composition() {
        let mut harness = Harness::new();
        let tree =
            Node::filter(FilterNode::new(Node::composition(two_rects())).with_opacity(0.5));
        harness.visit(&tree, false);
        assert_eq!(harness.metrics.composition_targets, 0);
        assert_eq!(harness.metrics.fallback_rasterizations, 1);
        assert_eq!(harness.draw_objects.offscreen_len(), 0);
        assert_eq!(harness.canvases.len(), 1);
    }

    #[test]
    fn rotated_viewports_fall_back() {
        let mut harness = Harness::new();
        let clipped = Node::filter(
            FilterNode::new(Node::composition(two_rects()))
                .with_viewport(RectF::new(0.0, 0.0, 8.0, 8.0)),
        );
        let rotation = Matrix3F::from_values(0.0, -1.0, 32.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        harness.visit(&Node::matrix_transform(clipped, rotation), true);
        assert_eq!(harness.metrics.fallback_rasterizations, 1);
        assert_eq!(harness.draw_objects.onscreen_len(), 1);
    }

    #[test]
    fn axis_aligned_viewports_stay_in_hardware() {
        let mut harness = Harness::new();
        let clipped = Node::filter(
            FilterNode::new(Node::composition(two_rects()))
                .with_viewport(RectF::new(0.0, 0.0, 8.0, 8.0)),
        );
        harness.visit(&clipped, true);
        assert_eq!(harness.metrics.fallback_rasterizations, 0);
        assert_eq!(harness.draw_objects.onscreen_len(), 2);
    }

    #[test]
    fn offscreen_nodes_are_culled() {
        let mut harness = Harness::new();
        let tree = Node::composition(vec![
            Node::solid_rect(RectF::new(0.0, 0.0, 10.0, 10.0), ColorRGBA::RED),
            Node::solid_rect(RectF::new(200.0, 0.0, 10.0, 10.0), ColorRGBA::RED),
        ]);
        harness.visit(&tree, true);
        assert_eq!(harness.metrics.culled_nodes, 1);
        assert_eq!(harness.draw_objects.onscreen_len(), 1);
    }

    #[test]
    fn pixel_snapping_rounds_to_centres() {
        assert_eq!(
            snap_to_pixels(RectF::new(0.4, 0.6, 10.2, 4.0)),
            Rect::new(0, 1, 11, 4)
        );
    }
}
