//! Reusable scratch pixmaps for the software rasterizer.
//!
//! Pixmaps are handed out by value and returned after use. Returned pixmaps
//! are kept for reuse while their combined size stays within a byte
//! budget; the oldest are dropped first.

use anyhow::{Result as AnyResult, anyhow};
use render_tree::Size;
use std::collections::VecDeque;
use tiny_skia::Pixmap;

#[derive(Debug)]
pub struct ScratchPixmapCache {
    free: VecDeque<Pixmap>,
    pooled_bytes: usize,
    budget_bytes: usize,
    reused: u64,
    allocated: u64,
}

fn byte_size(pixmap: &Pixmap) -> usize {
    pixmap.data().len()
}

impl ScratchPixmapCache {
    #[must_use]
    pub const fn new(budget_bytes: usize) -> Self {
        Self {
            free: VecDeque::new(),
            pooled_bytes: 0,
            budget_bytes,
            reused: 0,
            allocated: 0,
        }
    }

    /// A transparent pixmap of exactly `size`.
    ///
    /// # Errors
    /// Returns an error if the size is empty or too large to allocate.
    pub fn acquire(&mut self, size: Size) -> AnyResult<Pixmap> {
        let position = self
            .free
            .iter()
            .position(|pixmap| pixmap.width() == size.width && pixmap.height() == size.height);
        if let Some(mut pixmap) = position.and_then(|index| self.free.remove(index)) {
            self.pooled_bytes -= byte_size(&pixmap);
            pixmap.fill(tiny_skia::Color::TRANSPARENT);
            self.reused += 1;
            return Ok(pixmap);
        }
        self.allocated += 1;
        Pixmap::new(size.width, size.height)
            .ok_or_else(|| anyhow!("cannot allocate {}x{} scratch pixmap", size.width, size.height))
    }

    /// Return a pixmap for reuse.
    pub fn release(&mut self, pixmap: Pixmap) {
        let bytes = byte_size(&pixmap);
        if bytes > self.budget_bytes {
            return;
        }
        self.pooled_bytes += bytes;
        self.free.push_back(pixmap);
        self.trim();
    }

    /// Drop the oldest pooled pixmaps until the pool fits its budget.
    pub fn trim(&mut self) {
        while self.pooled_bytes > self.budget_bytes {
            let Some(oldest) = self.free.pop_front() else {
                break;
            };
            self.pooled_bytes -= byte_size(&oldest);
        }
    }

    /// Drop every pooled pixmap.
    pub fn clear(&mut self) {
        self.free.clear();
        self.pooled_bytes = 0;
    }

    #[inline]
    #[must_use]
    pub const fn pooled_bytes(&self) -> usize {
        self.pooled_bytes
    }

    /// `(reused, allocated)` acquisition counts.
    #[inline]
    #[must_use]
    pub const fn counts(&self) -> (u64, u64) {
        (self.reused, self.allocated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_pixmaps_are_reused_cleared() {
        let mut cache = ScratchPixmapCache::new(1024);
        let mut pixmap = cache.acquire(Size::new(4, 4)).unwrap();
        pixmap.fill(tiny_skia::Color::BLACK);
        cache.release(pixmap);
        assert_eq!(cache.pooled_bytes(), 64);

        let reused = cache.acquire(Size::new(4, 4)).unwrap();
        assert!(reused.data().iter().all(|byte| *byte == 0));
        assert_eq!(cache.counts(), (1, 1));
        assert_eq!(cache.pooled_bytes(), 0);
    }

    #[test]
    fn budget_drops_oldest_first() {
        let mut cache = ScratchPixmapCache::new(128);
        let first = cache.acquire(Size::new(4, 4)).unwrap();
        let second = cache.acquire(Size::new(4, 2)).unwrap();
        let third = cache.acquire(Size::new(4, 3)).unwrap();
        cache.release(first);
        cache.release(second);
        cache.release(third);
        assert!(cache.pooled_bytes() <= 128);
        // The 4x4 pixmap was released first and went over budget.
        cache.acquire(Size::new(4, 4)).unwrap();
        assert_eq!(cache.counts(), (0, 4));
    }
}
