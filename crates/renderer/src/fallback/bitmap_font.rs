//! Built-in 5x7 bitmap font used to rasterize text runs.
//!
//! Each glyph is seven rows of five bits, most significant bit leftmost.
//! Lowercase letters render with their uppercase shapes and characters
//! without a glyph render as an outlined box.

use render_tree::{GlyphBuffer, PointF};
use tiny_skia::{Path, PathBuilder, Rect as SkiaRect};

pub const GLYPH_COLUMNS: u32 = 5;
pub const GLYPH_ROWS: usize = 7;

type Glyph = [u8; GLYPH_ROWS];

const BLANK: Glyph = [0; GLYPH_ROWS];
const MISSING: Glyph = [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F];

const LETTERS: [Glyph; 26] = [
    [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
    [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
];

const DIGITS: [Glyph; 10] = [
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
];

/// Rows of the glyph drawn for `ch`.
#[must_use]
pub fn glyph_rows(ch: char) -> Glyph {
    let upper = ch.to_ascii_uppercase();
    match upper {
        'A'..='Z' => LETTERS[(upper as u8 - b'A') as usize],
        '0'..='9' => DIGITS[(upper as u8 - b'0') as usize],
        '.' => [0, 0, 0, 0, 0, 0x0C, 0x0C],
        ',' => [0, 0, 0, 0, 0x0C, 0x04, 0x08],
        ':' => [0, 0x0C, 0x0C, 0, 0x0C, 0x0C, 0],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0, 0x04],
        '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0, 0x04],
        '-' => [0, 0, 0, 0x1F, 0, 0, 0],
        '+' => [0, 0x04, 0x04, 0x1F, 0x04, 0x04, 0],
        '/' => [0, 0x01, 0x02, 0x04, 0x08, 0x10, 0],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '\'' => [0x04, 0x04, 0x08, 0, 0, 0, 0],
        _ if upper.is_whitespace() => BLANK,
        _ => MISSING,
    }
}

/// Outline of the glyph run with its baseline origin at `origin`. Runs of
/// set bits in a row become a single rectangle. `None` when nothing would
/// be drawn.
#[must_use]
pub fn text_path(glyphs: &GlyphBuffer, origin: PointF) -> Option<Path> {
    let font = glyphs.font();
    let unit = font.unit();
    let top = origin.y - font.ascent();
    let mut builder = PathBuilder::new();
    for (index, ch) in glyphs.text().chars().enumerate() {
        let left = (index as f32).mul_add(font.advance(), origin.x);
        for (row, bits) in glyph_rows(ch).iter().enumerate() {
            let y = (row as f32).mul_add(unit, top);
            let mut column = 0;
            while column < GLYPH_COLUMNS {
                if bits & (0x10 >> column) == 0 {
                    column += 1;
                    continue;
                }
                let start = column;
                while column < GLYPH_COLUMNS && bits & (0x10 >> column) != 0 {
                    column += 1;
                }
                let x = (start as f32).mul_add(unit, left);
                if let Some(rect) = SkiaRect::from_xywh(x, y, (column - start) as f32 * unit, unit) {
                    builder.push_rect(rect);
                }
            }
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_tree::Font;

    #[test]
    fn lowercase_shares_uppercase_shapes() {
        assert_eq!(glyph_rows('a'), glyph_rows('A'));
        assert_eq!(glyph_rows(' '), BLANK);
        assert_eq!(glyph_rows('\u{2603}'), MISSING);
    }

    #[test]
    fn path_spans_the_glyph_cells() {
        let glyphs = GlyphBuffer::new("HI", Font::new(8.0));
        let path = text_path(&glyphs, PointF::new(10.0, 20.0)).unwrap();
        let bounds = path.bounds();
        assert_eq!(bounds.left(), 10.0);
        assert_eq!(bounds.top(), 13.0);
        assert_eq!(bounds.bottom(), 20.0);
        // 'I' occupies columns 1..4 of the second cell.
        assert_eq!(bounds.right(), 10.0 + 6.0 + 4.0);
    }

    #[test]
    fn whitespace_only_runs_have_no_path() {
        let glyphs = GlyphBuffer::new("   ", Font::new(16.0));
        assert!(text_path(&glyphs, PointF::new(0.0, 0.0)).is_none());
    }
}
