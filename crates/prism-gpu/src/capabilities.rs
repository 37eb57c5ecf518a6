//! Capability queries: device identity, queue families, device extensions,
//! surface support and format features.
//!
//! Each query is split into an `unsafe` function that talks to the driver and
//! a pure function that makes the decision, so the decisions can be tested
//! without a GPU.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::{BTreeSet, HashSet};
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Identity and limits of the selected physical device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Alignment required between dynamic uniform buffer offsets.
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    pub max_sampler_anisotropy: f32,
}

impl DeviceInfo {
    /// Query identity and limits of a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
        }
    }

    /// Get a human-readable summary of the device.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Queue family indices found while probing a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveQueues {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl ActiveQueues {
    /// Both a graphics and a present family were found. They may be equal.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Resolved indices, if complete.
    pub fn resolved(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Resolved graphics and present queue family indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// The distinct families, one queue is created per entry.
    pub fn unique(&self) -> BTreeSet<u32> {
        [self.graphics, self.present].into_iter().collect()
    }

    /// Whether graphics and present run on different families.
    pub fn is_split(&self) -> bool {
        self.graphics != self.present
    }
}

/// Walk queue families in index order.
///
/// The first graphics-capable family is kept; the present family is
/// overwritten by every presentation-capable family until both are known.
/// Families exposing zero queues are skipped.
pub fn resolve_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> ActiveQueues
where
    F: FnMut(u32) -> bool,
{
    let mut queues = ActiveQueues::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_count == 0 {
            continue;
        }

        if queues.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            queues.graphics = Some(index);
        }
        if supports_present(index) {
            queues.present = Some(index);
        }

        if queues.is_complete() {
            break;
        }
    }

    queues
}

/// Find graphics and present queue families for a device and surface.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn queue_family_indices(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> ActiveQueues {
    let families = instance.get_physical_device_queue_family_properties(physical_device);

    resolve_queue_families(&families, |index| {
        surface_loader
            .get_physical_device_surface_support(physical_device, index, surface)
            .unwrap_or(false)
    })
}

/// Required device extensions.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::khr::swapchain::NAME]
}

/// Required extensions absent from `available`.
pub fn missing_device_extensions(available: &HashSet<String>) -> Vec<&'static CStr> {
    required_device_extensions()
        .into_iter()
        .filter(|ext| ext.to_str().map_or(true, |name| !available.contains(name)))
        .collect()
}

/// Check that every required device extension is offered.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn check_device_extension_support(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<bool> {
    let available: HashSet<String> = instance
        .enumerate_device_extension_properties(physical_device)?
        .iter()
        .filter_map(|ext| {
            ext.extension_name_as_c_str()
                .ok()
                .and_then(|name| name.to_str().ok())
                .map(String::from)
        })
        .collect();

    let missing = missing_device_extensions(&available);
    if !missing.is_empty() {
        tracing::debug!("Device is missing extensions: {missing:?}");
    }

    Ok(missing.is_empty())
}

/// Surface support snapshot for one physical device.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Usage requested for every swapchain image: rendered to, cleared and blitted into.
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

impl SwapchainSupportDetails {
    /// A swapchain can be built: at least one format, one present mode, and
    /// surface images that accept [`SWAPCHAIN_IMAGE_USAGE`].
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty() && self.supports_image_usage()
    }

    pub fn supports_image_usage(&self) -> bool {
        self.capabilities
            .supported_usage_flags
            .contains(SWAPCHAIN_IMAGE_USAGE)
    }
}

/// Query surface capabilities, formats and present modes.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn query_swapchain_support(
    surface_loader: &ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SwapchainSupportDetails> {
    let capabilities =
        surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?;
    let formats = surface_loader.get_physical_device_surface_formats(physical_device, surface)?;
    let present_modes =
        surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?;

    Ok(SwapchainSupportDetails {
        capabilities,
        formats,
        present_modes,
    })
}

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Pick the first candidate whose features for `tiling` contain `features`.
pub fn select_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties: F,
) -> Result<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| {
            tracing::error!("No candidate format supports {features:?} with {tiling:?} tiling");
            GpuError::FormatNotSupported { features }
        })
}

/// Query format properties and pick the first supported candidate.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_supported_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    select_format(candidates, tiling, features, |format| {
        instance.get_physical_device_format_properties(physical_device, format)
    })
}

/// Find a depth format usable as an optimally tiled depth attachment.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    find_supported_format(
        instance,
        physical_device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// Depth formats that also carry a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}
