//! Shelf packing of rectangles into a fixed-size atlas.
//!
//! Rectangles are placed left to right on horizontal shelves. A new shelf
//! opens below the last one when no existing shelf has room. Every
//! allocation is followed by a one pixel gap so filtered sampling never
//! reads a neighbour.

use render_tree::{Rect, Size};

/// Gap left to the right of and below every allocation.
pub const ATLAS_PADDING_PX: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct Shelf {
    y: u32,
    height: u32,
    cursor_x: u32,
}

#[derive(Debug, Clone)]
pub struct ShelfAllocator {
    size: Size,
    shelves: Vec<Shelf>,
    next_shelf_y: u32,
}

impl ShelfAllocator {
    #[must_use]
    pub const fn new(size: Size) -> Self {
        Self {
            size,
            shelves: Vec::new(),
            next_shelf_y: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    /// Place a rectangle of `size`, or `None` if the atlas is full.
    pub fn allocate(&mut self, size: Size) -> Option<Rect> {
        if size.is_empty() || !self.size.contains(size) {
            return None;
        }
        let padded_width = size.width + ATLAS_PADDING_PX;
        let padded_height = size.height + ATLAS_PADDING_PX;

        // Best fit: the shortest shelf that is tall enough and has room.
        let atlas_width = self.size.width;
        let best = self
            .shelves
            .iter_mut()
            .filter(|shelf| {
                shelf.height >= size.height && shelf.cursor_x + size.width <= atlas_width
            })
            .min_by_key(|shelf| shelf.height);
        if let Some(shelf) = best {
            let rect = Rect::new(shelf.cursor_x as i32, shelf.y as i32, size.width, size.height);
            shelf.cursor_x += padded_width;
            return Some(rect);
        }

        if self.next_shelf_y + size.height > self.size.height {
            return None;
        }
        let top = self.next_shelf_y;
        self.shelves.push(Shelf {
            y: top,
            height: size.height,
            cursor_x: padded_width,
        });
        self.next_shelf_y += padded_height;
        Some(Rect::new(0, top as i32, size.width, size.height))
    }

    /// Forget every allocation.
    pub fn reset(&mut self) {
        self.shelves.clear();
        self.next_shelf_y = 0;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shelves.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_never_overlap() {
        let mut allocator = ShelfAllocator::new(Size::new(32, 32));
        let mut placed: Vec<Rect> = Vec::new();
        for size in [
            Size::new(10, 8),
            Size::new(10, 8),
            Size::new(5, 4),
            Size::new(20, 10),
            Size::new(8, 8),
        ] {
            let rect = allocator.allocate(size).unwrap();
            assert_eq!(rect.size(), size);
            assert!(Rect::from_size(allocator.size()).contains(rect));
            for other in &placed {
                assert!(rect.intersect(*other).is_empty(), "{rect:?} overlaps {other:?}");
            }
            placed.push(rect);
        }
    }

    #[test]
    fn full_atlas_rejects_then_reset_reopens() {
        let mut allocator = ShelfAllocator::new(Size::new(16, 16));
        assert!(allocator.allocate(Size::new(16, 16)).is_some());
        assert!(allocator.allocate(Size::new(1, 1)).is_none());
        assert!(allocator.allocate(Size::new(17, 1)).is_none());
        allocator.reset();
        assert_eq!(
            allocator.allocate(Size::new(4, 4)),
            Some(Rect::new(0, 0, 4, 4))
        );
    }

    #[test]
    fn short_items_share_a_shelf() {
        let mut allocator = ShelfAllocator::new(Size::new(64, 64));
        let first = allocator.allocate(Size::new(10, 10)).unwrap();
        let second = allocator.allocate(Size::new(10, 6)).unwrap();
        assert_eq!(second, Rect::new(11, first.y, 10, 6));
    }
}
