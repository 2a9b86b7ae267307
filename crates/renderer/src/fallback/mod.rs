//! Software rasterization of subtrees the hardware path cannot draw.
//!
//! The hardware rasterizer hands a subtree and a `Canvas` positioned over
//! an offscreen target to a `FallbackRasterizer`. The canvas contents are
//! later uploaded into the target's framebuffer and drawn as a textured
//! quad.

pub mod bitmap_font;
pub mod blur;
pub mod canvas;
pub mod resource_provider;
pub mod scratch;
pub mod software_rasterizer;

pub use canvas::Canvas;
pub use resource_provider::SoftwareResourceProvider;
pub use software_rasterizer::SoftwareRasterizer;

use anyhow::Result as AnyResult;
use render_tree::{Node, ResourceProvider};
use std::sync::Arc;

/// A CPU rasterizer sharing the hardware rasterizer's frames.
///
/// Calls arrive on the render thread in a fixed order each frame:
/// `advance_frame`, any number of `submit_offscreen`, then `reset_context`
/// before the hardware path touches the GPU context again.
pub trait FallbackRasterizer: Send {
    /// A new frame is starting.
    fn advance_frame(&mut self);

    /// Draw `node` into `canvas` under the canvas's current clip and
    /// transform.
    ///
    /// # Errors
    /// Returns an error if working memory cannot be allocated.
    fn submit_offscreen(&mut self, node: &Node, canvas: &mut Canvas) -> AnyResult<()>;

    /// The fallback is done with the context for this frame.
    fn reset_context(&mut self);

    /// Provider for resources this rasterizer can draw.
    fn resource_provider(&self) -> Arc<dyn ResourceProvider>;
}
