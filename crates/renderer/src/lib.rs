//! Hardware rasterizer for immutable render trees.
//!
//! The rasterizer draws what the GPU shaders support directly and hands the
//! rest to a software fallback whose output is cached in offscreen atlases.
//! Devices plug in through the `GpuDevice` trait; `CpuDevice` executes
//! commands in memory for tests and headless use.

pub mod backend;
pub mod config;
pub mod fallback;
pub mod rasterizer;

pub use backend::{
    CpuDevice, DeviceStats, FramebufferId, GpuDevice, GraphicsContext, ProgramId, RenderTarget,
    ScopedMakeCurrent, ShaderKind, SurfaceId, TextureId, Vertex,
};
pub use config::RasterizerConfig;
pub use fallback::{Canvas, FallbackRasterizer, SoftwareRasterizer, SoftwareResourceProvider};
pub use rasterizer::{
    HardwareRasterizer, OffscreenCacheStats, RasterizerMetrics, SubmitOptions,
};
