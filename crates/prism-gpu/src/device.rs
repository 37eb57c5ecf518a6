//! Physical device selection and logical device creation.

use crate::capabilities::{
    check_device_extension_support, query_swapchain_support, queue_family_indices,
    required_device_extensions, ActiveQueues, DeviceInfo, QueueFamilies,
};
use crate::error::{GpuError, Result};
use crate::instance::validation_layers;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::c_char;

/// Everything the selector checks on one device.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceSuitability {
    pub extensions_supported: bool,
    pub queues: ActiveQueues,
    /// Only probed when the extensions are supported.
    pub swapchain_adequate: bool,
    pub sampler_anisotropy: bool,
}

impl DeviceSuitability {
    /// Probe a device against a surface.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let extensions_supported = check_device_extension_support(instance, physical_device)?;
        let queues = queue_family_indices(instance, physical_device, surface_loader, surface);

        let swapchain_adequate = extensions_supported
            && query_swapchain_support(surface_loader, physical_device, surface)?.is_adequate();

        let features = instance.get_physical_device_features(physical_device);

        Ok(Self {
            extensions_supported,
            queues,
            swapchain_adequate,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        })
    }

    /// All requirements hold.
    pub fn is_suitable(&self) -> bool {
        self.extensions_supported
            && self.queues.is_complete()
            && self.swapchain_adequate
            && self.sampler_anisotropy
    }
}

/// The physical device chosen for rendering.
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub info: DeviceInfo,
}

/// Index of the first suitable candidate.
pub fn first_suitable(candidates: &[DeviceSuitability]) -> Option<usize> {
    candidates.iter().position(DeviceSuitability::is_suitable)
}

/// Pick the first physical device able to render and present to `surface`.
///
/// There is no ranking: enumeration order decides between suitable devices.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        tracing::error!("No Vulkan GPU available");
        return Err(GpuError::NoDeviceFound);
    }

    let reports: Vec<DeviceSuitability> = devices
        .iter()
        .map(|&device| {
            DeviceSuitability::query(instance, device, surface_loader, surface).unwrap_or_else(
                |e| {
                    tracing::warn!("Failed to probe device {device:?}: {e}");
                    DeviceSuitability::default()
                },
            )
        })
        .collect();

    let selected = first_suitable(&reports)
        .and_then(|index| Some((devices[index], reports[index].queues.resolved()?)));

    if let Some((physical_device, queue_families)) = selected {
        let info = DeviceInfo::query(instance, physical_device);
        tracing::info!("Selected GPU: {}", info.summary());
        return Ok(SelectedDevice {
            physical_device,
            queue_families,
            info,
        });
    }

    tracing::error!("No GPU satisfies the requirements");
    Err(GpuError::NoSuitableDevice)
}

/// Features every logical device is created with.
pub fn required_features() -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true)
}

/// One queue create record per distinct family, a single queue at `priority`.
pub fn queue_create_infos<'a>(
    queue_families: &BTreeSet<u32>,
    priority: &'a f32,
) -> Vec<vk::DeviceQueueCreateInfo<'a>> {
    queue_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(priority))
        })
        .collect()
}

/// Create the logical device.
///
/// # Safety
/// The instance and physical device must be valid, and every family in
/// `queue_families` must exist on the device.
#[allow(deprecated)]
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &BTreeSet<u32>,
    features: &vk::PhysicalDeviceFeatures,
    debug_enabled: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_infos = queue_create_infos(queue_families, &queue_priority);

    let extension_names: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    // Device layers are ignored by current loaders but older ones still read them.
    let layer_names: Vec<*const c_char> = if debug_enabled {
        validation_layers().iter().map(|l| l.as_ptr()).collect()
    } else {
        Vec::new()
    };

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .enabled_features(features);

    instance
        .create_device(physical_device, &create_info, None)
        .map_err(|e| {
            tracing::error!("Unable to create logical Vulkan device: {e}");
            GpuError::DeviceCreationFailed(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suitable() -> DeviceSuitability {
        DeviceSuitability {
            extensions_supported: true,
            queues: ActiveQueues {
                graphics: Some(0),
                present: Some(0),
            },
            swapchain_adequate: true,
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn every_requirement_is_needed() {
        assert!(suitable().is_suitable());

        let mut no_ext = suitable();
        no_ext.extensions_supported = false;
        assert!(!no_ext.is_suitable());

        let mut no_present = suitable();
        no_present.queues.present = None;
        assert!(!no_present.is_suitable());

        let mut no_swapchain = suitable();
        no_swapchain.swapchain_adequate = false;
        assert!(!no_swapchain.is_suitable());

        let mut no_aniso = suitable();
        no_aniso.sampler_anisotropy = false;
        assert!(!no_aniso.is_suitable());
    }

    #[test]
    fn first_suitable_device_wins() {
        let mut weak = suitable();
        weak.sampler_anisotropy = false;
        let mut split = suitable();
        split.queues.present = Some(1);

        assert_eq!(first_suitable(&[weak, split, suitable()]), Some(1));
        assert_eq!(first_suitable(&[weak]), None);
        assert_eq!(first_suitable(&[]), None);
    }

    #[test]
    fn shared_family_creates_one_queue() {
        let families = QueueFamilies {
            graphics: 3,
            present: 3,
        }
        .unique();
        let priority = 1.0;
        let infos = queue_create_infos(&families, &priority);

        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 3);
        assert_eq!(infos[0].queue_count, 1);
        // SAFETY: the pointer comes from `priority`, alive for the whole test.
        assert_eq!(unsafe { *infos[0].p_queue_priorities }, 1.0);
    }

    #[test]
    fn split_families_create_two_queues() {
        let families = QueueFamilies {
            graphics: 2,
            present: 0,
        }
        .unique();
        let priority = 1.0;
        let infos = queue_create_infos(&families, &priority);

        let indices: Vec<u32> = infos.iter().map(|i| i.queue_family_index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert!(infos.iter().all(|i| i.queue_count == 1));
    }

    #[test]
    fn anisotropy_is_always_enabled() {
        assert_eq!(required_features().sampler_anisotropy, vk::TRUE);
    }
}
