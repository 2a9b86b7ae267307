//! Geometry primitives shared by the render tree and the rasterizers.
//!
//! Floating point types (`PointF`, `SizeF`, `RectF`, `Matrix3F`) describe
//! render-tree space. Integer types (`Size`, `Rect`) describe device pixels:
//! surfaces, framebuffers, viewports and scissor boxes.

/// A point in render-tree space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A floating point size.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SizeF {
    pub width: f32,
    pub height: f32,
}

impl SizeF {
    #[inline]
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// A size in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    #[inline]
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether a rect of `other` size fits inside this size.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.width <= self.width && other.height <= self.height
    }
}

/// An axis-aligned rectangle in render-tree space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_size(size: SizeF) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    #[inline]
    #[must_use]
    pub fn right(self) -> f32 {
        self.x + self.width
    }

    #[inline]
    #[must_use]
    pub fn bottom(self) -> f32 {
        self.y + self.height
    }

    #[inline]
    #[must_use]
    pub fn origin(self) -> PointF {
        PointF::new(self.x, self.y)
    }

    #[inline]
    #[must_use]
    pub fn size(self) -> SizeF {
        SizeF::new(self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Translate the rectangle by the given offset.
    #[inline]
    #[must_use]
    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grow the rectangle by `amount` on every side.
    #[inline]
    #[must_use]
    pub fn outset(self, amount: f32) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            amount.mul_add(2.0, self.width),
            amount.mul_add(2.0, self.height),
        )
    }

    /// Intersection of both rectangles. Disjoint inputs yield an empty rect.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return Self::new(left, top, 0.0, 0.0);
        }
        Self::new(left, top, right - left, bottom - top)
    }

    /// Smallest rectangle containing both inputs. Empty inputs are ignored.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Self::new(left, top, right - left, bottom - top)
    }

    /// Smallest integer rectangle covering this rectangle.
    #[must_use]
    pub fn round_out(self) -> Rect {
        if self.is_empty() {
            return Rect::new(self.x.floor() as i32, self.y.floor() as i32, 0, 0);
        }
        let left = self.x.floor();
        let top = self.y.floor();
        let right = self.right().ceil();
        let bottom = self.bottom().ceil();
        Rect::new(
            left as i32,
            top as i32,
            (right - left).max(0.0) as u32,
            (bottom - top).max(0.0) as u32,
        )
    }
}

/// An axis-aligned rectangle in device pixels. Origin is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    #[inline]
    #[must_use]
    pub const fn size(self) -> Size {
        Size::new(self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn right(self) -> i32 {
        self.x
            .saturating_add(i32::try_from(self.width).unwrap_or(i32::MAX))
    }

    #[inline]
    #[must_use]
    pub fn bottom(self) -> i32 {
        self.y
            .saturating_add(i32::try_from(self.height).unwrap_or(i32::MAX))
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection of both rectangles. Disjoint inputs yield an empty rect.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return Self::new(left, top, 0, 0);
        }
        Self::new(
            left,
            top,
            u32::try_from(right - left).unwrap_or(0),
            u32::try_from(bottom - top).unwrap_or(0),
        )
    }

    /// Whether `other` lies entirely within this rectangle.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Whether the pixel at `(x, y)` lies within this rectangle.
    #[must_use]
    pub fn contains_point(self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    #[inline]
    #[must_use]
    pub fn to_rect_f(self) -> RectF {
        RectF::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

/// A 3x3 matrix describing a 2D affine transform, stored row-major.
///
/// Points are treated as column vectors, so `a.concat(b)` applies `b` first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3F {
    rows: [[f32; 3]; 3],
}

impl Default for Matrix3F {
    #[inline]
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix3F {
    #[inline]
    #[must_use]
    pub const fn identity() -> Self {
        Self::from_values(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0)
    }

    #[allow(
        clippy::too_many_arguments,
        reason = "mirrors the row-major layout of the matrix"
    )]
    #[inline]
    #[must_use]
    pub const fn from_values(
        m00: f32,
        m01: f32,
        m02: f32,
        m10: f32,
        m11: f32,
        m12: f32,
        m20: f32,
        m21: f32,
        m22: f32,
    ) -> Self {
        Self {
            rows: [[m00, m01, m02], [m10, m11, m12], [m20, m21, m22]],
        }
    }

    #[inline]
    #[must_use]
    pub const fn translation(dx: f32, dy: f32) -> Self {
        Self::from_values(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0)
    }

    #[inline]
    #[must_use]
    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self::from_values(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0)
    }

    /// Element at `row`, `col`.
    #[inline]
    #[must_use]
    pub const fn get(&self, row: usize, col: usize) -> f32 {
        self.rows[row][col]
    }

    /// Matrix product `self * other`.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut rows = [[0.0f32; 3]; 3];
        for (row, out_row) in rows.iter_mut().enumerate() {
            for (col, cell) in out_row.iter_mut().enumerate() {
                *cell = (0..3)
                    .map(|inner| self.rows[row][inner] * other.rows[inner][col])
                    .sum();
            }
        }
        Self { rows }
    }

    #[must_use]
    pub fn map_point(&self, point: PointF) -> PointF {
        let row0 = self.rows[0];
        let row1 = self.rows[1];
        PointF::new(
            row0[0].mul_add(point.x, row0[1].mul_add(point.y, row0[2])),
            row1[0].mul_add(point.x, row1[1].mul_add(point.y, row1[2])),
        )
    }

    /// The four corners of `rect` mapped through the matrix, in
    /// top-left, top-right, bottom-right, bottom-left order.
    #[must_use]
    pub fn map_quad(&self, rect: RectF) -> [PointF; 4] {
        [
            self.map_point(PointF::new(rect.x, rect.y)),
            self.map_point(PointF::new(rect.right(), rect.y)),
            self.map_point(PointF::new(rect.right(), rect.bottom())),
            self.map_point(PointF::new(rect.x, rect.bottom())),
        ]
    }

    /// Bounding box of `rect` after mapping through the matrix.
    #[must_use]
    pub fn map_rect(&self, rect: RectF) -> RectF {
        let corners = self.map_quad(rect);
        let mut left = f32::INFINITY;
        let mut top = f32::INFINITY;
        let mut right = f32::NEG_INFINITY;
        let mut bottom = f32::NEG_INFINITY;
        for corner in corners {
            left = left.min(corner.x);
            top = top.min(corner.y);
            right = right.max(corner.x);
            bottom = bottom.max(corner.y);
        }
        RectF::new(left, top, right - left, bottom - top)
    }

    /// True when the transform keeps rectangles axis-aligned
    /// (translation and scale only).
    #[allow(clippy::float_cmp, reason = "exact values written by constructors")]
    #[must_use]
    pub fn is_axis_aligned(&self) -> bool {
        self.rows[0][1] == 0.0
            && self.rows[1][0] == 0.0
            && self.rows[2][0] == 0.0
            && self.rows[2][1] == 0.0
            && self.rows[2][2] == 1.0
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Inverse of an affine matrix, or `None` when it is singular.
    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let [[m00, m01, m02], [m10, m11, m12], _] = self.rows;
        let det = m00.mul_add(m11, -(m01 * m10));
        if det.abs() <= f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        Some(Self::from_values(
            m11 * inv,
            -m01 * inv,
            m01.mul_add(m12, -(m02 * m11)) * inv,
            -m10 * inv,
            m00 * inv,
            m02.mul_add(m10, -(m00 * m12)) * inv,
            0.0,
            0.0,
            1.0,
        ))
    }
}
