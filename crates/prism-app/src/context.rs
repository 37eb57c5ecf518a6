//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use prism_gpu::memory::{create_image_view, ImageDesc, ImageResource};
use prism_gpu::sync::{create_image_semaphores, destroy_semaphores, FramesInFlight};
use prism_gpu::transition::{aspect_mask, transition_image_layout};
use prism_gpu::{CommandPool, GraphicsContext, Swapchain};
use winit::window::Window;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Depth image and view matching the swapchain extent.
pub struct DepthAttachment {
    pub image: ImageResource,
    pub view: vk::ImageView,
}

impl DepthAttachment {
    /// Create a depth attachment in `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`.
    ///
    /// # Safety
    /// `pool` must belong to the graphics queue family of `gpu`.
    pub unsafe fn new(
        gpu: &GraphicsContext,
        pool: &CommandPool,
        extent: vk::Extent2D,
    ) -> anyhow::Result<Self> {
        let format = gpu.depth_format()?;
        let image = gpu.create_image(&ImageDesc::new_2d(
            extent.width,
            extent.height,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ))?;

        let device = gpu.device();
        let view = match create_image_view(
            device,
            image.image,
            format,
            aspect_mask(format, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            false,
            1,
        ) {
            Ok(view) => view,
            Err(e) => {
                unsafe { image.destroy(device) };
                return Err(e.into());
            }
        };

        let transitioned = unsafe {
            transition_image_layout(
                device,
                pool,
                gpu.graphics_queue(),
                image.image,
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                false,
                1,
            )
        };

        let depth = Self { image, view };
        if let Err(e) = transitioned {
            unsafe { depth.destroy(device) };
            return Err(e.into());
        }

        tracing::debug!(
            "Depth attachment {:?} {}x{}",
            format,
            extent.width,
            extent.height
        );
        Ok(depth)
    }

    /// # Safety
    /// The attachment must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            self.image.destroy(device);
        }
    }
}

/// Everything an application needs to render into the window.
pub struct AppContext {
    /// Graphics context. Declared before the window so the surface is
    /// released before the window it was created from.
    pub gpu: GraphicsContext,
    pub window: Arc<Window>,
    pub swapchain: Swapchain,
    pub depth: DepthAttachment,
    /// Graphics-family pool for per-frame and one-shot command buffers.
    pub command_pool: CommandPool,
    pub(crate) frames: FramesInFlight,
    /// Per-swapchain-image render finished semaphores.
    pub(crate) render_finished: Vec<vk::Semaphore>,
    /// Total frames rendered.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    /// Create the swapchain, depth attachment and frame resources.
    ///
    /// # Safety
    /// `gpu` must have been built for `window`.
    pub(crate) unsafe fn new(window: Arc<Window>, gpu: GraphicsContext) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let swapchain = gpu.build_swapchain(size.width.max(1), size.height.max(1), None)?;

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.present_mode
        );

        let device = gpu.device();

        // Partially created resources are destroyed in reverse on error.
        let command_pool = match unsafe {
            CommandPool::new(
                device,
                gpu.queue_families().graphics,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
        } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { swapchain.destroy(device, gpu.swapchain_loader()) };
                return Err(e.into());
            }
        };

        let frames = unsafe { FramesInFlight::new(device, &command_pool, MAX_FRAMES_IN_FLIGHT) };
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                unsafe {
                    command_pool.destroy(device);
                    swapchain.destroy(device, gpu.swapchain_loader());
                }
                return Err(e.into());
            }
        };

        let resources = unsafe {
            create_image_semaphores(device, swapchain.images.len()).map_err(anyhow::Error::from)
        }
        .and_then(|render_finished| {
            match unsafe { DepthAttachment::new(&gpu, &command_pool, swapchain.extent) } {
                Ok(depth) => Ok((render_finished, depth)),
                Err(e) => {
                    unsafe { destroy_semaphores(device, &render_finished) };
                    Err(e)
                }
            }
        });

        let (render_finished, depth) = match resources {
            Ok(resources) => resources,
            Err(e) => {
                unsafe {
                    frames.destroy(device);
                    command_pool.destroy(device);
                    swapchain.destroy(device, gpu.swapchain_loader());
                }
                return Err(e);
            }
        };

        Ok(Self {
            gpu,
            window,
            swapchain,
            depth,
            command_pool,
            frames,
            render_finished,
            frame_count: 0,
            last_frame_time: Instant::now(),
        })
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.swapchain.extent.width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.swapchain.extent.height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Rebuild the swapchain for a new size, handing the old one over as a
    /// hint and destroying it afterwards. Zero-sized requests are ignored.
    ///
    /// # Safety
    /// The device must be idle.
    pub(crate) unsafe fn recreate_swapchain(
        &mut self,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        let swapchain = self.gpu.build_swapchain(width, height, Some(&self.swapchain))?;
        let old = std::mem::replace(&mut self.swapchain, swapchain);

        let device = self.gpu.device();
        unsafe {
            old.destroy(device, self.gpu.swapchain_loader());
        }

        let image_count = self.swapchain.images.len();
        if self.render_finished.len() != image_count {
            replace_all(
                &mut self.render_finished,
                || unsafe { create_image_semaphores(device, image_count) },
                |old| unsafe { destroy_semaphores(device, old) },
            )?;
        }

        let depth =
            unsafe { DepthAttachment::new(&self.gpu, &self.command_pool, self.swapchain.extent)? };
        let old_depth = std::mem::replace(&mut self.depth, depth);
        unsafe {
            old_depth.destroy(self.gpu.device());
        }

        tracing::info!(
            "Swapchain recreated: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );

        Ok(())
    }

    /// Destroy everything created in [`AppContext::new`]. The graphics
    /// context itself is released when the `AppContext` is dropped.
    ///
    /// # Safety
    /// The device must be idle.
    pub(crate) unsafe fn cleanup(&mut self) {
        let device = self.gpu.device();

        unsafe {
            destroy_semaphores(device, &self.render_finished);
            self.render_finished.clear();
            self.frames.destroy(device);
            self.depth.destroy(device);
            self.command_pool.destroy(device);
            self.swapchain.destroy(device, self.gpu.swapchain_loader());
        }
    }
}

/// Swap in a freshly made set and release the old one. On failure `slot` is
/// left as it was.
fn replace_all<T, E>(
    slot: &mut Vec<T>,
    make: impl FnOnce() -> Result<Vec<T>, E>,
    release: impl FnOnce(&[T]),
) -> Result<(), E> {
    let fresh = make()?;
    let old = std::mem::replace(slot, fresh);
    release(&old);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_replacement_keeps_existing_items() {
        let mut slot = vec![1, 2];
        let mut released = Vec::new();

        let result = replace_all(&mut slot, || Err("out of memory"), |old| {
            released.extend_from_slice(old);
        });

        assert_eq!(result, Err("out of memory"));
        assert_eq!(slot, vec![1, 2]);
        assert!(released.is_empty());
    }

    #[test]
    fn replacement_releases_old_items_after_creation() {
        let mut slot = vec![1, 2];
        let mut released = Vec::new();

        let result: Result<(), &str> =
            replace_all(&mut slot, || Ok(vec![3, 4, 5]), |old| released.extend_from_slice(old));

        assert!(result.is_ok());
        assert_eq!(slot, vec![3, 4, 5]);
        assert_eq!(released, vec![1, 2]);
    }
}
