//! The viewer application: one texture blitted over a cleared background.

use ash::vk;
use prism_app::{AppContext, FrameContext, PrismApp, ACQUIRE_WAIT_STAGE};
use prism_gpu::{upload_texture, ImageResource};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{Key, NamedKey};

use crate::fit::fit_image;
use crate::options::ViewerOptions;
use crate::pixels::{blit_filter, TexturePixels};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

const COLOR_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

/// First barrier on a freshly acquired swapchain image, with its source stage.
///
/// The source stage matches the submission's wait on the acquire semaphore
/// so the layout change happens after the presentation engine is done.
fn acquired_to_transfer_dst(
    image: vk::Image,
) -> (vk::PipelineStageFlags, vk::ImageMemoryBarrier<'static>) {
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE);
    (ACQUIRE_WAIT_STAGE, barrier)
}

/// Image viewer state.
pub struct Viewer {
    options: ViewerOptions,
    /// Sampled texture kept in `SHADER_READ_ONLY_OPTIMAL` between frames.
    texture: Option<ImageResource>,
    /// Blit filter supported by the texture's format.
    filter: vk::Filter,
    should_exit: bool,
}

impl Viewer {
    fn load_texture(
        ctx: &AppContext,
        options: &ViewerOptions,
    ) -> anyhow::Result<Option<(ImageResource, vk::Filter)>> {
        let Some(path) = &options.image else {
            tracing::info!("No image given, showing the background only");
            return Ok(None);
        };

        let pixels = TexturePixels::from_image(image::open(path)?);
        tracing::info!(
            "Loaded {} ({}x{}, {})",
            path.display(),
            pixels.width,
            pixels.height,
            if pixels.is_hdr() { "HDR" } else { "LDR" }
        );

        // SAFETY: instance and physical device belong to the live context.
        let properties = unsafe {
            ctx.gpu
                .instance()
                .get_physical_device_format_properties(ctx.gpu.physical_device(), pixels.format)
        };
        let filter = blit_filter(options.filter, properties.optimal_tiling_features);
        if filter != options.filter {
            tracing::warn!("{:?} cannot be filtered linearly, using nearest", pixels.format);
        }

        let texture = upload_texture(
            &ctx.gpu,
            &ctx.command_pool,
            &pixels.bytes,
            pixels.width,
            pixels.height,
            pixels.format,
        )?;

        Ok(Some((texture, filter)))
    }

    fn record_clear(&self, ctx: &AppContext, frame: &FrameContext) {
        let device = ctx.gpu.device();
        let cmd = frame.command_buffer;

        let (src_stage, to_transfer) = acquired_to_transfer_dst(frame.swapchain_image);

        let [r, g, b] = self.options.background;
        let clear = vk::ClearColorValue {
            float32: [r, g, b, 1.0],
        };

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            device.cmd_clear_color_image(
                cmd,
                frame.swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                &[COLOR_RANGE],
            );
        }
    }

    fn record_blit(&self, ctx: &AppContext, frame: &FrameContext, texture: &ImageResource) {
        let rect = fit_image(texture.extent, frame.extent);
        if !rect.is_visible() {
            return;
        }

        let device = ctx.gpu.device();
        let cmd = frame.command_buffer;

        let texture_to_src = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(texture.image)
            .subresource_range(COLOR_RANGE);

        // Orders the blit after the clear.
        let clear_done = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

        let texture_to_read = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(texture.image)
            .subresource_range(COLOR_RANGE);

        let blit = vk::ImageBlit {
            src_subresource: COLOR_LAYERS,
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: texture.extent.width as i32,
                    y: texture.extent.height as i32,
                    z: 1,
                },
            ],
            dst_subresource: COLOR_LAYERS,
            dst_offsets: rect.dst_offsets(),
        };

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[clear_done],
                &[],
                &[texture_to_src],
            );

            device.cmd_blit_image(
                cmd,
                texture.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                frame.swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                self.filter,
            );

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[texture_to_read],
            );
        }
    }

    fn record_present_transition(&self, ctx: &AppContext, frame: &FrameContext) {
        let device = ctx.gpu.device();

        let to_present = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(frame.swapchain_image)
            .subresource_range(COLOR_RANGE);

        unsafe {
            device.cmd_pipeline_barrier(
                frame.command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );
        }
    }
}

impl PrismApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let options = ViewerOptions::from_args()?;
        let (texture, filter) = match Self::load_texture(ctx, &options)? {
            Some((texture, filter)) => (Some(texture), filter),
            None => (None, options.filter),
        };

        Ok(Self {
            options,
            texture,
            filter,
            should_exit: false,
        })
    }

    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        self.record_clear(ctx, frame);
        if let Some(texture) = &self.texture {
            self.record_blit(ctx, frame, texture);
        }
        self.record_present_transition(ctx, frame);
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
            ..
        } = event
        {
            self.should_exit = true;
            return true;
        }
        false
    }

    fn should_exit(&self) -> bool {
        self.should_exit
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        if let Some(texture) = self.texture.take() {
            // SAFETY: the framework waits for the device before cleanup.
            unsafe { texture.destroy(ctx.gpu.device()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn acquired_image_barrier_chains_with_acquire_wait() {
        let image = vk::Image::from_raw(42);
        let (src_stage, barrier) = acquired_to_transfer_dst(image);

        assert!(src_stage.contains(ACQUIRE_WAIT_STAGE));
        assert_ne!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.image, image);
    }
}
