//! Command pools and one-shot command submission.

use crate::error::Result;
use ash::vk;

/// Command pool bound to one queue family.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None).map_err(|e| {
            tracing::error!("Unable to create command pool: {e}");
            e
        })?;

        Ok(Self { pool, queue_family })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(device.allocate_command_buffers(&alloc_info)?)
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Record and synchronously run a one-shot command buffer on `queue`.
///
/// The buffer is freed on every path, including when recording or
/// submission fails. Blocks until the queue is idle.
///
/// # Safety
/// All handles must be valid and `queue` must belong to the pool's family.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool
        .allocate(device, 1)?
        .into_iter()
        .next()
        .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;

    let result = submit_and_wait(device, queue, cmd, record);
    device.free_command_buffers(pool.handle(), &[cmd]);
    result
}

unsafe fn submit_and_wait<F>(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    record(cmd);
    device.end_command_buffer(cmd)?;

    let cmd_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
    device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
    device.queue_wait_idle(queue)?;

    Ok(())
}

/// Full-extent copy region into mip 0, layer 0 of a colour image.
pub fn buffer_image_copy(width: u32, height: u32) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        // Zero row length and height mean tightly packed.
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_offset(vk::Offset3D::default())
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
}

/// Copy a tightly packed buffer into an image in `TRANSFER_DST_OPTIMAL`.
///
/// # Safety
/// All handles must be valid and the buffer must hold the whole extent.
pub unsafe fn copy_buffer_to_image(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> Result<()> {
    let region = buffer_image_copy(width, height);

    execute_single_time_commands(device, pool, queue, |cmd| {
        device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_region_covers_whole_first_layer() {
        let region = buffer_image_copy(800, 600);

        assert_eq!(region.buffer_offset, 0);
        assert_eq!(region.buffer_row_length, 0);
        assert_eq!(region.image_subresource.mip_level, 0);
        assert_eq!(region.image_subresource.base_array_layer, 0);
        assert_eq!(region.image_subresource.layer_count, 1);
        assert_eq!(region.image_subresource.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(region.image_offset.x, 0);
        assert_eq!(region.image_extent.width, 800);
        assert_eq!(region.image_extent.height, 600);
        assert_eq!(region.image_extent.depth, 1);
    }
}
