//! Hardware rasterizer.
//!
//! Converts a render tree into batched draw objects, caches fallback
//! rasterizations in atlas-backed offscreen targets, and drives a
//! `GpuDevice` through an offscreen phase and an onscreen phase per frame.

pub mod draw_object;
pub mod draw_object_manager;
pub mod frame_rate_throttler;
pub mod graphics_state;
pub mod hardware_rasterizer;
pub mod image_texture_cache;
pub mod offscreen_target_manager;
pub mod render_tree_node_visitor;
pub mod shader_program_manager;
pub mod shelf_allocator;

pub use draw_object::{BaseState, Destination, DrawObject};
pub use draw_object_manager::DrawObjectManager;
pub use frame_rate_throttler::FrameRateThrottler;
pub use graphics_state::GraphicsState;
pub use hardware_rasterizer::{HardwareRasterizer, RasterizerMetrics, SubmitOptions};
pub use image_texture_cache::ImageTextureCache;
pub use offscreen_target_manager::{
    AtlasId, CompositionTarget, OffscreenCacheStats, OffscreenTarget, OffscreenTargetKey,
    OffscreenTargetManager,
};
pub use render_tree_node_visitor::{RasterizeComponents, RenderTreeNodeVisitor};
pub use shader_program_manager::ShaderProgramManager;
pub use shelf_allocator::ShelfAllocator;
