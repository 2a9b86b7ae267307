//! Colors carried by render-tree nodes.

/// An RGBA color with straight (non-premultiplied) alpha, channels in `[0, 1]`.
#[allow(clippy::min_ident_chars, reason = "conventional channel names")]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorRGBA {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorRGBA {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    #[inline]
    #[must_use]
    pub const fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self {
            r: red,
            g: green,
            b: blue,
            a: alpha,
        }
    }

    /// Build a color from 8-bit straight-alpha channels.
    #[inline]
    #[must_use]
    pub fn from_rgba8(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self::new(
            f32::from(red) / 255.0,
            f32::from(green) / 255.0,
            f32::from(blue) / 255.0,
            f32::from(alpha) / 255.0,
        )
    }

    /// Same color with alpha multiplied by `opacity`.
    #[inline]
    #[must_use]
    pub fn with_opacity(self, opacity: f32) -> Self {
        Self::new(self.r, self.g, self.b, self.a * opacity.clamp(0.0, 1.0))
    }

    #[inline]
    #[must_use]
    pub fn is_opaque(self) -> bool {
        self.a >= 1.0
    }

    #[inline]
    #[must_use]
    pub fn is_transparent(self) -> bool {
        self.a <= 0.0
    }

    /// Premultiplied `[r, g, b, a]`, the layout every rasterizer blends with.
    #[inline]
    #[must_use]
    pub fn premultiplied(self) -> [f32; 4] {
        let alpha = self.a.clamp(0.0, 1.0);
        [
            self.r.clamp(0.0, 1.0) * alpha,
            self.g.clamp(0.0, 1.0) * alpha,
            self.b.clamp(0.0, 1.0) * alpha,
            alpha,
        ]
    }
}
