//! Vulkan device and swapchain bootstrap for the Prism renderer.
//!
//! This crate provides:
//! - Instance creation with optional validation forwarded to `tracing`
//! - Physical device selection against a window surface
//! - Logical device and queue creation
//! - Swapchain parameter derivation and (re)creation
//! - Image creation with dedicated memory, and pooled staging buffers
//! - Synchronous image layout transitions and texture uploads
//!
//! Decisions (queue families, formats, extents, memory types, barriers) are
//! plain functions over Vulkan structs and can be tested without a GPU.

pub mod allocator;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod transition;

pub use allocator::{GpuAllocator, GpuBuffer};
pub use capabilities::{
    find_depth_format, has_stencil_component, ActiveQueues, DeviceInfo, GpuVendor,
    QueueFamilies, SwapchainSupportDetails, SWAPCHAIN_IMAGE_USAGE,
};
pub use command::{copy_buffer_to_image, execute_single_time_commands, CommandPool};
pub use context::{GraphicsContext, GraphicsContextBuilder};
pub use error::{GpuError, Result};
pub use memory::{create_image, create_image_view, find_memory_type, ImageDesc, ImageResource};
pub use swapchain::{Swapchain, SwapchainParameters};
pub use sync::{FrameSync, FramesInFlight};
pub use texture::upload_texture;
pub use transition::transition_image_layout;

pub use ash;
pub use gpu_allocator;
