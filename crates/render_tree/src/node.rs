//! Immutable render-tree nodes.
//!
//! Nodes are shared through `Arc` and never mutated after construction.
//! Every node gets a process-unique `NodeId`; rasterizer caches key on that
//! identity, so producers must build new nodes for changed content.

use crate::color::ColorRGBA;
use crate::math::{Matrix3F, PointF, RectF};
use crate::resources::{GlyphBuffer, Image};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a render-tree node. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Shared handle to an immutable node.
pub type NodeRef = Arc<Node>;

/// Border drawn inside a rect's bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Border {
    pub width: f32,
    pub color: ColorRGBA,
}

/// A rectangle with an optional solid background, border and rounded corners.
#[derive(Debug, Clone, PartialEq)]
pub struct RectNode {
    pub rect: RectF,
    pub background: Option<ColorRGBA>,
    pub border: Option<Border>,
    pub corner_radius: Option<f32>,
}

impl RectNode {
    #[must_use]
    pub const fn new(rect: RectF) -> Self {
        Self {
            rect,
            background: None,
            border: None,
            corner_radius: None,
        }
    }

    #[must_use]
    pub const fn with_background(mut self, color: ColorRGBA) -> Self {
        self.background = Some(color);
        self
    }

    #[must_use]
    pub const fn with_border(mut self, border: Border) -> Self {
        self.border = Some(border);
        self
    }

    #[must_use]
    pub const fn with_corner_radius(mut self, radius: f32) -> Self {
        self.corner_radius = Some(radius);
        self
    }

    /// A plain solid-color rectangle with no border or rounding.
    #[must_use]
    pub fn is_solid_color(&self) -> bool {
        self.background.is_some()
            && self.border.is_none()
            && self.corner_radius.is_none_or(|radius| radius <= 0.0)
    }
}

/// An image stretched over `destination`.
#[derive(Debug, Clone)]
pub struct ImageNode {
    pub image: Arc<Image>,
    pub destination: RectF,
}

/// A run of glyphs drawn with its baseline origin at `offset`.
#[derive(Debug, Clone)]
pub struct TextNode {
    pub glyphs: Arc<GlyphBuffer>,
    pub offset: PointF,
    pub color: ColorRGBA,
}

/// Children drawn in order (later children on top), shifted by `offset`.
#[derive(Debug, Clone)]
pub struct CompositionNode {
    pub children: Vec<NodeRef>,
    pub offset: PointF,
}

/// `source` drawn under an affine transform.
#[derive(Debug, Clone)]
pub struct MatrixTransformNode {
    pub source: NodeRef,
    pub transform: Matrix3F,
}

/// `source` with optional opacity, viewport clip and blur applied.
#[derive(Debug, Clone)]
pub struct FilterNode {
    pub source: NodeRef,
    pub opacity: Option<f32>,
    pub viewport: Option<RectF>,
    pub blur_sigma: Option<f32>,
}

impl FilterNode {
    #[must_use]
    pub const fn new(source: NodeRef) -> Self {
        Self {
            source,
            opacity: None,
            viewport: None,
            blur_sigma: None,
        }
    }

    #[must_use]
    pub const fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = Some(opacity);
        self
    }

    #[must_use]
    pub const fn with_viewport(mut self, viewport: RectF) -> Self {
        self.viewport = Some(viewport);
        self
    }

    #[must_use]
    pub const fn with_blur(mut self, sigma: f32) -> Self {
        self.blur_sigma = Some(sigma);
        self
    }
}

/// The closed set of drawing primitives.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Rect(RectNode),
    Image(ImageNode),
    Text(TextNode),
    Composition(CompositionNode),
    MatrixTransform(MatrixTransformNode),
    Filter(FilterNode),
}

impl NodeKind {
    /// Children already carry their bounds, so this only looks one level down.
    fn bounds(&self) -> RectF {
        match self {
            Self::Rect(rect) => rect.rect,
            Self::Image(image) => image.destination,
            Self::Text(text) => text
                .glyphs
                .bounds()
                .offset(text.offset.x, text.offset.y),
            Self::Composition(composition) => composition
                .children
                .iter()
                .fold(RectF::default(), |acc, child| acc.union(child.bounds()))
                .offset(composition.offset.x, composition.offset.y),
            Self::MatrixTransform(transform) => {
                transform.transform.map_rect(transform.source.bounds())
            }
            Self::Filter(filter) => {
                let mut bounds = filter.source.bounds();
                if let Some(sigma) = filter.blur_sigma {
                    bounds = bounds.outset(sigma.max(0.0) * 3.0);
                }
                if let Some(viewport) = filter.viewport {
                    bounds = bounds.intersect(viewport);
                }
                bounds
            }
        }
    }
}

/// A render-tree node: a kind plus its identity and subtree bounds.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    bounds: RectF,
    kind: NodeKind,
}

impl Node {
    /// Wrap `kind` in a new node with a fresh identity.
    #[must_use]
    pub fn new(kind: NodeKind) -> NodeRef {
        Arc::new(Self {
            id: NodeId::next(),
            bounds: kind.bounds(),
            kind,
        })
    }

    /// Solid color rectangle.
    #[must_use]
    pub fn solid_rect(rect: RectF, color: ColorRGBA) -> NodeRef {
        Self::new(NodeKind::Rect(RectNode::new(rect).with_background(color)))
    }

    #[must_use]
    pub fn rect(rect: RectNode) -> NodeRef {
        Self::new(NodeKind::Rect(rect))
    }

    #[must_use]
    pub fn image(image: Arc<Image>, destination: RectF) -> NodeRef {
        Self::new(NodeKind::Image(ImageNode { image, destination }))
    }

    #[must_use]
    pub fn text(glyphs: Arc<GlyphBuffer>, offset: PointF, color: ColorRGBA) -> NodeRef {
        Self::new(NodeKind::Text(TextNode {
            glyphs,
            offset,
            color,
        }))
    }

    #[must_use]
    pub fn composition(children: Vec<NodeRef>) -> NodeRef {
        Self::composition_with_offset(children, PointF::default())
    }

    #[must_use]
    pub fn composition_with_offset(children: Vec<NodeRef>, offset: PointF) -> NodeRef {
        Self::new(NodeKind::Composition(CompositionNode { children, offset }))
    }

    #[must_use]
    pub fn matrix_transform(source: NodeRef, transform: Matrix3F) -> NodeRef {
        Self::new(NodeKind::MatrixTransform(MatrixTransformNode {
            source,
            transform,
        }))
    }

    #[must_use]
    pub fn filter(filter: FilterNode) -> NodeRef {
        Self::new(NodeKind::Filter(filter))
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Bounds of everything this subtree may draw, in its local space.
    /// Computed once when the node is built.
    #[inline]
    #[must_use]
    pub const fn bounds(&self) -> RectF {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Font;

    #[test]
    fn identities_are_unique_even_for_equal_content() {
        let rect = RectF::new(0.0, 0.0, 10.0, 10.0);
        let first = Node::solid_rect(rect, ColorRGBA::RED);
        let second = Node::solid_rect(rect, ColorRGBA::RED);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn composition_bounds_include_offset() {
        let tree = Node::composition_with_offset(
            vec![
                Node::solid_rect(RectF::new(0.0, 0.0, 10.0, 10.0), ColorRGBA::RED),
                Node::solid_rect(RectF::new(20.0, 5.0, 10.0, 10.0), ColorRGBA::BLUE),
            ],
            PointF::new(5.0, 5.0),
        );
        assert_eq!(tree.bounds(), RectF::new(5.0, 5.0, 30.0, 15.0));
    }

    #[test]
    fn filter_bounds_apply_viewport_and_blur() {
        let source = Node::solid_rect(RectF::new(10.0, 10.0, 10.0, 10.0), ColorRGBA::RED);
        let clipped = Node::filter(
            FilterNode::new(Arc::clone(&source)).with_viewport(RectF::new(0.0, 0.0, 15.0, 15.0)),
        );
        assert_eq!(clipped.bounds(), RectF::new(10.0, 10.0, 5.0, 5.0));

        let blurred = Node::filter(FilterNode::new(source).with_blur(1.0));
        assert_eq!(blurred.bounds(), RectF::new(7.0, 7.0, 16.0, 16.0));
    }

    #[test]
    fn nested_bounds_are_stored_at_construction() {
        let leaf = Node::solid_rect(RectF::new(0.0, 0.0, 4.0, 4.0), ColorRGBA::RED);
        let mut chain = Arc::clone(&leaf);
        for _ in 0..512 {
            chain = Node::composition_with_offset(vec![chain], PointF::new(1.0, 0.0));
        }
        let wrapped = Node::matrix_transform(Arc::clone(&chain), Matrix3F::scale(2.0, 2.0));

        assert_eq!(leaf.bounds(), RectF::new(0.0, 0.0, 4.0, 4.0));
        assert_eq!(chain.bounds(), RectF::new(512.0, 0.0, 4.0, 4.0));
        assert_eq!(wrapped.bounds(), RectF::new(1024.0, 0.0, 8.0, 8.0));
        assert!(matches!(
            chain.kind(),
            NodeKind::Composition(composition)
                if composition.children[0].bounds() == RectF::new(511.0, 0.0, 4.0, 4.0)
        ));
    }

    #[test]
    fn text_bounds_sit_on_baseline() {
        let glyphs = Arc::new(GlyphBuffer::new("AB", Font::new(8.0)));
        let text = Node::text(glyphs, PointF::new(2.0, 10.0), ColorRGBA::BLACK);
        assert_eq!(text.bounds(), RectF::new(2.0, 3.0, 12.0, 8.0));
    }

    #[test]
    fn solid_color_detection() {
        let rect = RectF::new(0.0, 0.0, 4.0, 4.0);
        assert!(RectNode::new(rect).with_background(ColorRGBA::RED).is_solid_color());
        assert!(
            !RectNode::new(rect)
                .with_background(ColorRGBA::RED)
                .with_corner_radius(2.0)
                .is_solid_color()
        );
        assert!(!RectNode::new(rect).is_solid_color());
    }
}
