//! `PrismApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for applications driven by [`crate::run_app`].
///
/// The framework owns the window, the graphics context, the swapchain and
/// frame synchronization. The application records commands into the frame's
/// command buffer and leaves the acquired image in `PRESENT_SRC_KHR`.
pub trait PrismApp: Sized {
    /// Initialize the application.
    ///
    /// Called once, after the graphics context and window have been created.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state. `dt` is in seconds.
    #[allow(unused_variables)]
    fn update(&mut self, ctx: &AppContext, dt: f32) {}

    /// Record the frame.
    ///
    /// The acquired swapchain image starts in `UNDEFINED` layout. The
    /// submission waits for the image at the transfer stage.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Called after the swapchain has been rebuilt for a new size.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` to stop the framework from
    /// processing it further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Checked after every event; `true` closes the window.
    fn should_exit(&self) -> bool {
        false
    }

    /// Release GPU resources. The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
