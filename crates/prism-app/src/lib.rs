//! Application framework for Prism.
//!
//! This crate handles the boilerplate around a [`prism_gpu::GraphicsContext`]:
//! - Logging setup
//! - Window creation and the event loop
//! - Swapchain creation and recreation on resize
//! - A depth attachment matching the swapchain
//! - Frame synchronization
//!
//! # Example
//!
//! ```no_run
//! use prism_app::{run_app, AppConfig, AppContext, FrameContext, PrismApp};
//!
//! struct MyApp;
//!
//! impl PrismApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn render(&mut self, _ctx: &AppContext, _frame: &mut FrameContext) -> anyhow::Result<()> {
//!         // Record commands, leave the image in PRESENT_SRC_KHR.
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let (config, _rest) = AppConfig::new("My App").from_args()?;
//!     run_app::<MyApp>(config)
//! }
//! ```

mod app;
mod config;
mod context;
mod frame;
mod runner;

pub use app::PrismApp;
pub use config::AppConfig;
pub use context::{AppContext, DepthAttachment, MAX_FRAMES_IN_FLIGHT};
pub use frame::FrameContext;
pub use runner::{init_logging, run_app, ACQUIRE_WAIT_STAGE};

pub use prism_gpu::{GraphicsContext, GraphicsContextBuilder};
pub use winit::event::WindowEvent;
