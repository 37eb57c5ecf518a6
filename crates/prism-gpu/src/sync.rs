//! Semaphores, fences and frames in flight.

use crate::command::CommandPool;
use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    Ok(device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?)
}

/// Create a fence, optionally already signaled.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    Ok(device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?)
}

/// Resources owned by one frame in flight.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready.
    pub image_available: vk::Semaphore,
    /// Signaled when this frame's submission completes.
    pub in_flight: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSync {
    /// # Safety
    /// The device must be valid. `command_buffer` must come from a pool that
    /// allows individual resets.
    pub unsafe fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let image_available = create_semaphore(device)?;
        let in_flight = match create_fence(device, true) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            in_flight,
            command_buffer,
        })
    }

    /// Block until the frame's previous submission has finished.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        device.wait_for_fences(&[self.in_flight], true, u64::MAX)?;
        Ok(())
    }

    /// # Safety
    /// The device must be valid and the fence must not be pending.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_fences(&[self.in_flight])?;
        Ok(())
    }

    /// Give up on a frame whose image was acquired but whose work never
    /// reached the queue.
    ///
    /// Submits an empty batch that consumes `image_available` and signals
    /// `in_flight`, so the slot can be waited on and reused.
    ///
    /// # Safety
    /// The device and queue must be valid and the fence must not be pending.
    pub unsafe fn abandon(&self, device: &ash::Device, queue: vk::Queue) -> Result<()> {
        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = wait_only_submit(&wait_semaphores, &wait_stages);

        self.reset(device)?;
        device.queue_submit(queue, &[submit_info], self.in_flight)?;
        Ok(())
    }

    /// # Safety
    /// The resources must not be in use. The command buffer is released with
    /// its pool.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_fence(self.in_flight, None);
    }
}

/// A submission with no command buffers that only waits on `semaphores`.
pub fn wait_only_submit<'a>(
    semaphores: &'a [vk::Semaphore],
    stages: &'a [vk::PipelineStageFlags],
) -> vk::SubmitInfo<'a> {
    vk::SubmitInfo::default()
        .wait_semaphores(semaphores)
        .wait_dst_stage_mask(stages)
}

/// Index of the frame slot after `current`.
pub fn next_frame(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight.max(1)
}

/// Ring of per-frame resources.
pub struct FramesInFlight {
    frames: Vec<FrameSync>,
    current: usize,
}

impl FramesInFlight {
    /// Create `count` frame slots, each with its own command buffer from `pool`.
    ///
    /// # Safety
    /// The device must be valid and `pool` must have been created with
    /// `RESET_COMMAND_BUFFER`.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool, count: usize) -> Result<Self> {
        let command_buffers = pool.allocate(device, count as u32)?;

        let mut frames = Vec::with_capacity(count);
        for command_buffer in command_buffers {
            match FrameSync::new(device, command_buffer) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    for frame in &frames {
                        frame.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self { frames, current: 0 })
    }

    pub fn current(&self) -> &FrameSync {
        &self.frames[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn advance(&mut self) {
        self.current = next_frame(self.current, self.frames.len());
    }

    /// # Safety
    /// No frame may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for frame in &self.frames {
            frame.destroy(device);
        }
    }
}

/// One render-finished semaphore per swapchain image.
///
/// Presentation holds its wait semaphore until the image is re-acquired, so
/// these are keyed by image index rather than by frame slot.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_image_semaphores(
    device: &ash::Device,
    count: usize,
) -> Result<Vec<vk::Semaphore>> {
    let mut semaphores = Vec::with_capacity(count);
    for _ in 0..count {
        match create_semaphore(device) {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(e) => {
                destroy_semaphores(device, &semaphores);
                return Err(e);
            }
        }
    }
    Ok(semaphores)
}

/// # Safety
/// None of the semaphores may be in use.
pub unsafe fn destroy_semaphores(device: &ash::Device, semaphores: &[vk::Semaphore]) {
    for &semaphore in semaphores {
        device.destroy_semaphore(semaphore, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn wait_only_submit_consumes_semaphore_without_work() {
        let semaphores = [vk::Semaphore::from_raw(7)];
        let stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let info = wait_only_submit(&semaphores, &stages);

        assert_eq!(info.wait_semaphore_count, 1);
        assert_eq!(info.command_buffer_count, 0);
        assert_eq!(info.signal_semaphore_count, 0);
        assert!(!info.p_wait_dst_stage_mask.is_null());
    }

    #[test]
    fn frame_index_wraps() {
        assert_eq!(next_frame(0, 2), 1);
        assert_eq!(next_frame(1, 2), 0);
        assert_eq!(next_frame(2, 3), 0);
    }

    #[test]
    fn single_slot_stays_put() {
        assert_eq!(next_frame(0, 1), 0);
        assert_eq!(next_frame(0, 0), 0);
    }
}
