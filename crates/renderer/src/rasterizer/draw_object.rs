//! Single GPU draws produced by the render tree visitor.

use crate::backend::{FramebufferId, ShaderKind, TextureId, Vertex};
use crate::rasterizer::graphics_state::GraphicsState;
use render_tree::{ColorRGBA, PointF, Rect, Size};

/// Vertices emitted per quad: two triangles, `(0, 1, 2)` and `(0, 2, 3)`.
pub const QUAD_VERTEX_COUNT: usize = 6;

const QUAD_TRIANGLES: [usize; QUAD_VERTEX_COUNT] = [0, 1, 2, 0, 2, 3];

/// Texture coordinates covering a whole texture, in quad corner order.
pub const FULL_TEX_COORDS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// Where a draw lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The default framebuffer of the current render target.
    Onscreen,
    /// An offscreen framebuffer, drawn with a full-size viewport.
    Offscreen {
        framebuffer: FramebufferId,
        size: Size,
    },
}

impl Destination {
    #[must_use]
    pub const fn framebuffer(self) -> Option<FramebufferId> {
        match self {
            Self::Onscreen => None,
            Self::Offscreen { framebuffer, .. } => Some(framebuffer),
        }
    }
}

/// State every draw is issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseState {
    /// Device-pixel scissor in the destination.
    pub scissor: Rect,
    pub destination: Destination,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawObject {
    /// Clear the scissor box of the destination.
    Clear { color: ColorRGBA },
    /// A solid color quad. Corners are in destination pixels, clockwise
    /// from the top-left.
    PolyColor {
        corners: [PointF; 4],
        color: ColorRGBA,
    },
    /// A textured quad modulated by `opacity`.
    RectTexture {
        corners: [PointF; 4],
        tex_coords: [[f32; 2]; 4],
        texture: TextureId,
        opacity: f32,
    },
}

impl DrawObject {
    /// Program the draw runs with. `None` for clears.
    #[must_use]
    pub const fn shader_kind(&self) -> Option<ShaderKind> {
        match self {
            Self::Clear { .. } => None,
            Self::PolyColor { .. } => Some(ShaderKind::ColorFill),
            Self::RectTexture { .. } => Some(ShaderKind::TexturedQuad),
        }
    }

    #[must_use]
    pub const fn texture(&self) -> Option<TextureId> {
        match self {
            Self::RectTexture { texture, .. } => Some(*texture),
            Self::Clear { .. } | Self::PolyColor { .. } => None,
        }
    }

    /// Textures may carry transparency, so textured quads always blend.
    #[must_use]
    pub fn requires_blend(&self) -> bool {
        match self {
            Self::Clear { .. } => false,
            Self::PolyColor { color, .. } => !color.is_opaque(),
            Self::RectTexture { .. } => true,
        }
    }

    #[must_use]
    pub const fn vertex_count(&self) -> usize {
        match self {
            Self::Clear { .. } => 0,
            Self::PolyColor { .. } | Self::RectTexture { .. } => QUAD_VERTEX_COUNT,
        }
    }

    /// Vertices for this draw, mapped through the state's clip adjustment.
    #[must_use]
    pub fn vertices(&self, state: &GraphicsState) -> Option<[Vertex; QUAD_VERTEX_COUNT]> {
        let (corners, color, tex_coords) = match self {
            Self::Clear { .. } => return None,
            Self::PolyColor { corners, color } => {
                (corners, color.premultiplied(), [[0.0, 0.0]; 4])
            }
            Self::RectTexture {
                corners,
                tex_coords,
                opacity,
                ..
            } => {
                let alpha = opacity.clamp(0.0, 1.0);
                (corners, [alpha; 4], *tex_coords)
            }
        };
        Some(QUAD_TRIANGLES.map(|corner| Vertex {
            position: state.pixel_to_ndc(corners[corner]),
            color,
            tex_coord: tex_coords[corner],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners() -> [PointF; 4] {
        [
            PointF::new(0.0, 0.0),
            PointF::new(10.0, 0.0),
            PointF::new(10.0, 10.0),
            PointF::new(0.0, 10.0),
        ]
    }

    #[test]
    fn blend_follows_content() {
        let opaque = DrawObject::PolyColor {
            corners: corners(),
            color: ColorRGBA::RED,
        };
        let translucent = DrawObject::PolyColor {
            corners: corners(),
            color: ColorRGBA::RED.with_opacity(0.5),
        };
        let textured = DrawObject::RectTexture {
            corners: corners(),
            tex_coords: FULL_TEX_COORDS,
            texture: TextureId(1),
            opacity: 1.0,
        };
        assert!(!opaque.requires_blend());
        assert!(translucent.requires_blend());
        assert!(textured.requires_blend());
        assert_eq!(textured.shader_kind(), Some(ShaderKind::TexturedQuad));
        assert_eq!(DrawObject::Clear { color: ColorRGBA::WHITE }.vertex_count(), 0);
    }

    #[test]
    fn quad_vertices_cover_two_triangles() {
        let mut state = GraphicsState::new();
        state.set_clip_adjustment(Size::new(10, 10));
        let quad = DrawObject::RectTexture {
            corners: corners(),
            tex_coords: FULL_TEX_COORDS,
            texture: TextureId(1),
            opacity: 0.5,
        };
        let vertices = quad.vertices(&state).unwrap();
        assert_eq!(vertices[0].position, [-1.0, 1.0]);
        assert_eq!(vertices[2].position, [1.0, -1.0]);
        assert_eq!(vertices[5].tex_coord, [0.0, 1.0]);
        assert!(vertices.iter().all(|vertex| vertex.color == [0.5; 4]));
    }
}
