//! wgpu implementation of the rasterizer's `GpuDevice`.
//!
//! `WgpuDevice` records the rasterizer's immediate-mode commands and encodes
//! them into render passes. It renders to a window surface or to headless
//! targets whose presented pixels can be read back.
#![allow(
    clippy::missing_docs_in_private_items,
    clippy::missing_inline_in_public_items,
    clippy::std_instead_of_core,
    clippy::missing_panics_doc,
    reason = "device methods assert on a current context the way CpuDevice does"
)]

mod bind_group_cache;
mod device;
mod error;
mod gpu_context;
mod pipeline_cache;
mod pipelines;
mod readback;
mod recorder;
mod texture_pool;

pub use device::WgpuDevice;
pub use error::{ErrorScopeGuard, submit_with_validation};
pub use gpu_context::GpuContext;
