//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Every variant is terminal for the call that produced it: nothing in this
/// crate retries. Creation failures are environment problems the bootstrap
/// code should abort on.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// The instance reports zero physical devices.
    #[error("No Vulkan GPU available")]
    NoDeviceFound,

    /// Devices exist but none satisfies the requirements.
    #[error("No GPU satisfies the requirements")]
    NoSuitableDevice,

    #[error("Unable to create a Vulkan instance: {0}")]
    InstanceCreationFailed(vk::Result),

    #[error("Unable to register the debug callback: {0}")]
    DebugCallbackRegistrationFailed(vk::Result),

    #[error("Surface creation failed: {0}")]
    SurfaceCreationFailed(String),

    #[error("Unable to create logical Vulkan device: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("Unable to create swapchain: {0}")]
    SwapchainCreationFailed(vk::Result),

    #[error("Unable to create image: {0}")]
    ImageCreationFailed(vk::Result),

    /// Device memory allocation or binding failed.
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),

    /// No memory type matches the filter and property requirements.
    #[error("No memory type in filter {type_filter:#b} with properties {properties:?}")]
    MemoryTypeNotFound {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Unable to create image view: {0}")]
    ImageViewCreationFailed(vk::Result),

    /// The requested layout pair has no entry in the transition table.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// None of the candidate formats supports the requested features.
    #[error("No candidate format supports {features:?}")]
    FormatNotSupported { features: vk::FormatFeatureFlags },

    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// Whether this error points at a programming or configuration mistake
    /// rather than at the environment.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Self::MemoryTypeNotFound { .. } | Self::UnsupportedLayoutTransition { .. }
        )
    }

    /// Whether the swapchain must be rebuilt before it can be used again.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defects_are_flagged() {
        let missing = GpuError::MemoryTypeNotFound {
            type_filter: 0b101,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        assert!(missing.is_defect());

        let transition = GpuError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        assert!(transition.is_defect());

        assert!(!GpuError::NoSuitableDevice.is_defect());
        assert!(!GpuError::ImageCreationFailed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_defect());
    }

    #[test]
    fn out_of_date_detection() {
        assert!(GpuError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!GpuError::from(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
    }
}
