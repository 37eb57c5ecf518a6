//! Swapchain management.

use crate::capabilities::{
    query_swapchain_support, QueueFamilies, SwapchainSupportDetails, SWAPCHAIN_IMAGE_USAGE,
};
use crate::error::{GpuError, Result};
use crate::memory::create_image_view;
use ash::vk;

/// Surface format used when the surface has no preference.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Everything needed to build a swapchain, derived from the surface support.
#[derive(Debug, Clone)]
pub struct SwapchainParameters {
    pub support: SwapchainSupportDetails,
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
}

impl SwapchainParameters {
    /// Derive parameters from a support snapshot and a requested size.
    pub fn from_support(support: SwapchainSupportDetails, width: u32, height: u32) -> Self {
        let extent = choose_swap_extent(&support.capabilities, width, height);
        let surface_format = choose_swap_surface_format(&support.formats);
        let present_mode = choose_swap_present_mode(&support.present_modes);
        let image_count = swapchain_image_count(&support.capabilities);

        Self {
            support,
            extent,
            surface_format,
            present_mode,
            image_count,
        }
    }
}

/// Query the surface and derive swapchain parameters for `width` x `height`.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn build_swapchain_parameters(
    surface_loader: &ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    width: u32,
    height: u32,
) -> Result<SwapchainParameters> {
    let support = query_swapchain_support(surface_loader, physical_device, surface)?;
    tracing::info!(
        "Swapchain can have between {} and {} images",
        support.capabilities.min_image_count,
        support.capabilities.max_image_count
    );
    Ok(SwapchainParameters::from_support(support, width, height))
}

/// Pick the swapchain extent.
///
/// A surface reporting a current extent dictates the size; otherwise the
/// requested size is clamped into the supported range per axis.
pub fn choose_swap_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width
            .min(capabilities.max_image_extent.width)
            .max(capabilities.min_image_extent.width),
        height: height
            .min(capabilities.max_image_extent.height)
            .max(capabilities.min_image_extent.height),
    }
}

/// Pick the surface format.
pub fn choose_swap_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // A lone UNDEFINED entry means the surface takes anything.
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return PREFERRED_SURFACE_FORMAT;
        }
    }

    available
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| available.first())
        .copied()
        .unwrap_or(PREFERRED_SURFACE_FORMAT)
}

/// Pick the present mode: mailbox when offered, FIFO otherwise.
///
/// Immediate mode is never chosen, even when offered.
pub fn choose_swap_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    let mode = if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    };
    tracing::info!("Swapchain using {mode:?} mode");
    mode
}

/// One image more than the minimum, bounded by the maximum when there is one.
pub fn swapchain_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    clamp_image_count(capabilities.min_image_count + 1, capabilities)
}

/// Fail unless the surface accepts [`SWAPCHAIN_IMAGE_USAGE`] for its images.
pub fn check_image_usage(support: &SwapchainSupportDetails) -> Result<()> {
    if support.supports_image_usage() {
        return Ok(());
    }
    tracing::error!(
        "Surface images support {:?}, need {:?}",
        support.capabilities.supported_usage_flags,
        SWAPCHAIN_IMAGE_USAGE
    );
    Err(GpuError::SwapchainCreationFailed(
        vk::Result::ERROR_FEATURE_NOT_PRESENT,
    ))
}

fn clamp_image_count(count: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    // max_image_count == 0 means unbounded.
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// The creation-time decisions for one swapchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub sharing_mode: vk::SharingMode,
    /// Empty for exclusive sharing.
    pub queue_family_indices: Vec<u32>,
    /// Handed to the driver for resource reuse, never destroyed here.
    pub old_swapchain: vk::SwapchainKHR,
}

impl SwapchainPlan {
    pub fn new(
        params: &SwapchainParameters,
        queues: QueueFamilies,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Self {
        // Parameters may be stale, so the count is bounded again.
        let image_count = clamp_image_count(params.image_count, &params.support.capabilities);

        let (sharing_mode, queue_family_indices) = if queues.is_split() {
            (
                vk::SharingMode::CONCURRENT,
                vec![queues.graphics, queues.present],
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        };

        Self {
            image_count,
            sharing_mode,
            queue_family_indices,
            old_swapchain: old_swapchain.unwrap_or_default(),
        }
    }

    /// Fill the create info for `surface`.
    pub fn create_info<'a>(
        &'a self,
        params: &SwapchainParameters,
        surface: vk::SurfaceKHR,
    ) -> vk::SwapchainCreateInfoKHR<'a> {
        vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(self.image_count)
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .image_sharing_mode(self.sharing_mode)
            .queue_family_indices(&self.queue_family_indices)
            .pre_transform(params.support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true)
            .old_swapchain(self.old_swapchain)
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain, one color view per image.
    ///
    /// `old_swapchain` is only passed to the driver; the caller still owns it
    /// and must destroy it once this returns.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn create(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        params: &SwapchainParameters,
        surface: vk::SurfaceKHR,
        queues: QueueFamilies,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        check_image_usage(&params.support)?;
        let plan = SwapchainPlan::new(params, queues, old_swapchain);
        let create_info = plan.create_info(params, surface);

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| {
                tracing::error!("Unable to create swap chain: {e}");
                GpuError::SwapchainCreationFailed(e)
            })?;

        let images = match swapchain_loader.get_swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                swapchain_loader.destroy_swapchain(swapchain, None);
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_image_view(
                device,
                image,
                params.surface_format.format,
                vk::ImageAspectFlags::COLOR,
                false,
                1,
            ) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for &view in &image_views {
                        device.destroy_image_view(view, None);
                    }
                    swapchain_loader.destroy_swapchain(swapchain, None);
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            "Swapchain {:?}: {}x{}, {} images, {:?}",
            swapchain,
            params.extent.width,
            params.extent.height,
            images.len(),
            plan.sharing_mode
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: params.surface_format.format,
            extent: params.extent,
            present_mode: params.present_mode,
        })
    }

    /// Acquire the next image.
    ///
    /// Returns the image index and whether the swapchain is suboptimal. An
    /// out-of-date swapchain yields an error for which
    /// [`GpuError::is_out_of_date`] holds.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        swapchain_loader
            .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
            .map_err(GpuError::from)
    }

    /// Present an image. Returns `true` when the swapchain should be rebuilt.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match swapchain_loader.queue_present(queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the views and the swapchain.
    ///
    /// # Safety
    /// All handles must be valid and swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 32,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_usage_flags: SWAPCHAIN_IMAGE_USAGE,
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn parameters(min: u32, max: u32) -> SwapchainParameters {
        SwapchainParameters::from_support(
            SwapchainSupportDetails {
                capabilities: capabilities(min, max),
                formats: vec![PREFERRED_SURFACE_FORMAT],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            },
            1280,
            720,
        )
    }

    #[test]
    fn mailbox_preferred_when_offered() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_swap_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_without_mailbox_and_never_immediate() {
        let cases: [&[vk::PresentModeKHR]; 4] = [
            &[vk::PresentModeKHR::IMMEDIATE],
            &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO],
            &[vk::PresentModeKHR::FIFO_RELAXED, vk::PresentModeKHR::FIFO],
            &[],
        ];
        for modes in cases {
            assert_eq!(choose_swap_present_mode(modes), vk::PresentModeKHR::FIFO);
        }
    }

    #[test]
    fn fixed_extent_is_used_verbatim() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 2560,
            height: 1440,
        };

        for (w, h) in [(1, 1), (800, 600), (10_000, 10_000)] {
            assert_eq!(choose_swap_extent(&caps, w, h), caps.current_extent);
        }
    }

    #[test]
    fn free_extent_is_clamped_per_axis() {
        let caps = capabilities(2, 3);

        let small = choose_swap_extent(&caps, 10, 10);
        assert_eq!((small.width, small.height), (64, 32));

        let large = choose_swap_extent(&caps, 8000, 100);
        assert_eq!((large.width, large.height), (4096, 100));

        let inside = choose_swap_extent(&caps, 1280, 720);
        assert_eq!((inside.width, inside.height), (1280, 720));
    }

    #[test]
    fn undefined_format_means_no_preference() {
        let offered = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(choose_swap_surface_format(&offered), PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn preferred_format_picked_when_offered() {
        let offered = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            PREFERRED_SURFACE_FORMAT,
        ];
        assert_eq!(choose_swap_surface_format(&offered), PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn first_format_as_fallback() {
        let offered = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_swap_surface_format(&offered), offered[0]);
    }

    #[test]
    fn image_count_is_bounded() {
        assert_eq!(swapchain_image_count(&capabilities(2, 3)), 3);
        assert_eq!(swapchain_image_count(&capabilities(1, 0)), 2);
        assert_eq!(swapchain_image_count(&capabilities(3, 3)), 3);
        assert_eq!(swapchain_image_count(&capabilities(2, 8)), 3);
    }

    #[test]
    fn plan_reclamps_stale_count() {
        let mut params = parameters(2, 3);
        params.image_count = 7;
        let queues = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        assert_eq!(SwapchainPlan::new(&params, queues, None).image_count, 3);
    }

    #[test]
    fn shared_family_uses_exclusive_sharing() {
        let params = parameters(2, 0);
        let queues = QueueFamilies {
            graphics: 1,
            present: 1,
        };
        let plan = SwapchainPlan::new(&params, queues, None);
        assert_eq!(plan.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(plan.queue_family_indices.is_empty());

        let info = plan.create_info(&params, vk::SurfaceKHR::null());
        assert_eq!(info.queue_family_index_count, 0);
        assert_eq!(info.min_image_count, 3);
    }

    #[test]
    fn split_families_use_concurrent_sharing() {
        let params = parameters(2, 0);
        let queues = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        let plan = SwapchainPlan::new(&params, queues, None);
        assert_eq!(plan.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(plan.queue_family_indices, vec![0, 2]);

        let info = plan.create_info(&params, vk::SurfaceKHR::null());
        assert_eq!(info.queue_family_index_count, 2);
        assert_eq!(info.image_sharing_mode, vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn old_swapchain_is_passed_through() {
        let params = parameters(2, 3);
        let queues = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        let old = vk::SwapchainKHR::from_raw(0xdead_beef);

        let plan = SwapchainPlan::new(&params, queues, Some(old));
        assert_eq!(plan.old_swapchain, old);
        let info = plan.create_info(&params, vk::SurfaceKHR::null());
        assert_eq!(info.old_swapchain, old);

        let fresh = SwapchainPlan::new(&params, queues, None);
        assert_eq!(fresh.old_swapchain, vk::SwapchainKHR::null());
    }

    #[test]
    fn create_info_carries_fixed_settings() {
        let params = parameters(2, 3);
        let queues = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        let plan = SwapchainPlan::new(&params, queues, None);
        let info = plan.create_info(&params, vk::SurfaceKHR::null());

        assert_eq!(info.composite_alpha, vk::CompositeAlphaFlagsKHR::OPAQUE);
        assert_eq!(info.clipped, vk::TRUE);
        assert_eq!(info.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
        assert_eq!(info.image_array_layers, 1);
        assert_eq!(info.image_extent, params.extent);
        assert_eq!(info.image_usage, SWAPCHAIN_IMAGE_USAGE);
        assert!(params
            .support
            .capabilities
            .supported_usage_flags
            .contains(info.image_usage));
    }

    #[test]
    fn color_attachment_only_surface_is_rejected() {
        let mut params = parameters(2, 3);
        params.support.capabilities.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;

        let err = check_image_usage(&params.support).unwrap_err();
        assert!(matches!(
            err,
            GpuError::SwapchainCreationFailed(vk::Result::ERROR_FEATURE_NOT_PRESENT)
        ));
        assert!(check_image_usage(&parameters(2, 3).support).is_ok());
    }
}
