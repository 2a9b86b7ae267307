//! Ownership of a GPU device and scoped context binding.

use super::{GpuDevice, RenderTarget};
use core::ops::{Deref, DerefMut};

/// Owns a device. The device is only reachable through a
/// `ScopedMakeCurrent` guard, so every command is issued while the context
/// is current.
#[derive(Debug)]
pub struct GraphicsContext<D: GpuDevice> {
    device: D,
}

impl<D: GpuDevice> GraphicsContext<D> {
    #[inline]
    pub const fn new(device: D) -> Self {
        Self { device }
    }

    /// Make the context current on `target` (or without a surface) until the
    /// returned guard is dropped.
    pub fn make_current(&mut self, target: Option<&RenderTarget>) -> ScopedMakeCurrent<'_, D> {
        self.device.make_current(target);
        ScopedMakeCurrent {
            device: &mut self.device,
        }
    }

    /// Read-only access for queries that do not issue commands.
    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Direct access for device setup outside a frame, such as creating
    /// render targets.
    #[inline]
    pub const fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

/// Keeps the context current for its lifetime and releases it on drop,
/// including during unwinding.
pub struct ScopedMakeCurrent<'ctx, D: GpuDevice> {
    device: &'ctx mut D,
}

impl<D: GpuDevice> Deref for ScopedMakeCurrent<'_, D> {
    type Target = D;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.device
    }
}

impl<D: GpuDevice> DerefMut for ScopedMakeCurrent<'_, D> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device
    }
}

impl<D: GpuDevice> Drop for ScopedMakeCurrent<'_, D> {
    fn drop(&mut self) {
        self.device.release_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuDevice;
    use render_tree::Size;
    use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

    #[test]
    fn guard_releases_on_drop() {
        let mut context = GraphicsContext::new(CpuDevice::new());
        let target = context
            .device_mut()
            .create_render_target(Size::new(4, 4), true);
        {
            let guard = context.make_current(Some(&target));
            assert!(guard.is_current());
        }
        assert!(!context.device().is_current());
    }

    #[test]
    fn guard_releases_during_unwind() {
        let mut context = GraphicsContext::new(CpuDevice::new());
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _guard = context.make_current(None);
            resume_unwind(Box::new("rasterization failed"));
        }));
        assert!(outcome.err().is_some());
        assert!(!context.device().is_current());
    }
}
