//! Per-frame context for rendering.

use ash::vk;

/// The frame being recorded.
pub struct FrameContext {
    /// Command buffer for recording rendering commands, already begun.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// The acquired swapchain image.
    pub swapchain_image: vk::Image,
    pub extent: vk::Extent2D,
    /// Seconds since the previous frame.
    pub dt: f32,
    pub frame_number: u64,
}
