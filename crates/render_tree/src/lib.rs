//! Immutable render tree consumed by the rasterizers.
//!
//! The tree is produced once per frame by layout and handed to a rasterizer
//! read-only. This crate also defines the geometry types and the
//! `ResourceProvider` interface rasterizers expose back to layout.

pub mod color;
pub mod math;
pub mod node;
pub mod resources;

pub use color::ColorRGBA;
pub use math::{Matrix3F, PointF, Rect, RectF, Size, SizeF};
pub use node::{
    Border, CompositionNode, FilterNode, ImageNode, MatrixTransformNode, Node, NodeId, NodeKind,
    NodeRef, RectNode, TextNode,
};
pub use resources::{
    AlphaFormat, Font, GlyphBuffer, Image, ImageData, ImageId, ResourceProvider,
};
