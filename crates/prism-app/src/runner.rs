//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use ash::vk;
use prism_gpu::GraphicsContextBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "profiling-tracy")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::PrismApp;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Stage at which a frame's commands wait for the acquired swapchain image.
///
/// Apps must start their first swapchain-image barrier from this stage.
pub const ACQUIRE_WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::TRANSFER;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins; otherwise `fallback` (or `info`) is used. A second call
/// is a no-op. With `profiling-tracy`, spans are also streamed to Tracy.
pub fn init_logging(fallback: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback.unwrap_or("info")));

    #[cfg(feature = "profiling-tracy")]
    {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_tracy::TracyLayer::default())
            .try_init();
    }
    #[cfg(not(feature = "profiling-tracy"))]
    {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// Run an application with the given configuration.
///
/// Initializes logging, creates the window and graphics context, and runs
/// the event loop until the window closes. Bootstrap failures are returned.
pub fn run_app<A: PrismApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging(config.log_filter.as_deref());

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        init_error: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.init_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Drives a [`PrismApp`] from winit's callbacks.
struct AppRunner<A: PrismApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    init_error: Option<anyhow::Error>,
}

struct AppState<A: PrismApp> {
    // Dropped after the app's own cleanup has run.
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    fps_sum: f64,
}

impl<A: PrismApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.init_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        if state.app.on_event(&event) {
            if state.app.should_exit() {
                self.shutdown(event_loop);
            }
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                }
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = state.handle_resize(size.width, size.height) {
                    error!("Resize error: {e:#}");
                }
            }
            _ => {}
        }

        if self.state.as_ref().is_some_and(|s| s.app.should_exit()) {
            self.shutdown(event_loop);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: PrismApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GraphicsContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build(window.as_ref())?;

        // SAFETY: the context was built for this window.
        let mut ctx = unsafe { AppContext::new(window, gpu)? };

        let app = match A::init(&mut ctx) {
            Ok(app) => app,
            Err(e) => {
                // SAFETY: nothing has been submitted except blocking one-shot work.
                unsafe {
                    let _ = ctx.gpu.wait_idle();
                    ctx.cleanup();
                }
                return Err(e);
            }
        };

        let target_frame_time = self
            .config
            .target_fps
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            ctx,
            app,
            target_frame_time,
            fps_sum: 0.0,
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: PrismApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = frame_start
            .duration_since(self.ctx.last_frame_time)
            .as_secs_f32();
        self.ctx.last_frame_time = frame_start;
        if dt > 0.0 {
            self.fps_sum += 1.0 / f64::from(dt);
        }

        self.app.update(&self.ctx, dt);

        let device = self.ctx.gpu.device();
        let frame = self.ctx.frames.current();

        // SAFETY: every handle below belongs to `self.ctx` and outlives the frame.
        let image_index = unsafe {
            frame.wait(device)?;

            match self.ctx.swapchain.acquire_next_image(
                self.ctx.gpu.swapchain_loader(),
                frame.image_available,
                u64::MAX,
            ) {
                Ok((index, _suboptimal)) => index,
                Err(e) if e.is_out_of_date() => {
                    warn!("Swapchain out of date on acquire");
                    return self.rebuild_swapchain();
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut frame_ctx = FrameContext {
            command_buffer: frame.command_buffer,
            image_index,
            swapchain_image: self.ctx.swapchain.images[image_index as usize],
            extent: self.ctx.swapchain.extent,
            dt,
            frame_number: self.ctx.frame_count,
        };

        let render_finished = match self.record_and_submit(&mut frame_ctx) {
            Ok(semaphore) => [semaphore],
            Err(e) => {
                self.abandon_frame();
                return Err(e);
            }
        };

        // SAFETY: the submission above signals `render_finished`.
        let presented = unsafe {
            self.ctx.swapchain.present(
                self.ctx.gpu.swapchain_loader(),
                self.ctx.gpu.present_queue(),
                image_index,
                &render_finished,
            )
        };

        self.ctx.frames.advance();
        self.ctx.frame_count += 1;

        let needs_rebuild = presented?;
        if needs_rebuild {
            self.rebuild_swapchain()?;
        }

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    /// Record the frame's commands and submit them, returning the semaphore
    /// the submission signals for presentation.
    ///
    /// The in-flight fence is reset only once recording has succeeded, right
    /// before the submission that signals it again.
    fn record_and_submit(
        &mut self,
        frame_ctx: &mut FrameContext,
    ) -> anyhow::Result<vk::Semaphore> {
        let command_buffer = frame_ctx.command_buffer;
        let render_finished = *self
            .ctx
            .render_finished
            .get(frame_ctx.image_index as usize)
            .context("No render-finished semaphore for the acquired image")?;

        // SAFETY: the slot's fence has been waited on, so its command buffer is idle.
        unsafe {
            let device = self.ctx.gpu.device();
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(command_buffer, &begin_info)?;
        }

        self.app.render(&self.ctx, frame_ctx)?;

        let frame = self.ctx.frames.current();
        let device = self.ctx.gpu.device();

        // SAFETY: every handle belongs to `self.ctx` and outlives the submission.
        unsafe {
            device.end_command_buffer(command_buffer)?;

            let wait_semaphores = [frame.image_available];
            let wait_stages = [ACQUIRE_WAIT_STAGE];
            let signal_semaphores = [render_finished];
            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::default()
                .command_buffers(&command_buffers)
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .signal_semaphores(&signal_semaphores);

            frame.reset(device)?;
            device.queue_submit(self.ctx.gpu.graphics_queue(), &[submit_info], frame.in_flight)?;
        }

        Ok(render_finished)
    }

    /// Release a frame that acquired an image but never submitted work.
    fn abandon_frame(&mut self) {
        // SAFETY: nothing from this slot reached the queue, so its fence is not pending.
        let released = unsafe {
            self.ctx
                .frames
                .current()
                .abandon(self.ctx.gpu.device(), self.ctx.gpu.graphics_queue())
        };
        if let Err(e) = released {
            error!("Failed to release frame {}: {e}", self.ctx.frame_count);
        }
        self.ctx.frames.advance();

        // The acquired image is only handed back with the swapchain it came from.
        if let Err(e) = self.rebuild_swapchain() {
            error!("Swapchain rebuild after a failed frame: {e:#}");
        }
    }

    /// Rebuild at the window's current size.
    fn rebuild_swapchain(&mut self) -> anyhow::Result<()> {
        let size = self.ctx.window.inner_size();
        self.handle_resize(size.width, size.height)
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.ctx.gpu.wait_idle()?;
        // SAFETY: the device is idle.
        unsafe {
            self.ctx.recreate_swapchain(width, height)?;
        }

        let extent = self.ctx.extent();
        self.app.on_resize(&mut self.ctx, extent.width, extent.height)?;

        info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.ctx.frame_count > 0 {
            let avg_fps = self.fps_sum / self.ctx.frame_count as f64;
            info!(
                "Rendered {} frames, average {:.1} FPS",
                self.ctx.frame_count, avg_fps
            );
        }

        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        self.app.cleanup(&mut self.ctx);

        // SAFETY: the device is idle and the app has released its resources.
        unsafe {
            self.ctx.cleanup();
        }

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_init_twice_is_harmless() {
        init_logging(Some("warn"));
        init_logging(None);
        info!("logging still usable");
    }
}
