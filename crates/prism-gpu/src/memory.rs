//! Image resources backed by dedicated device memory.

use crate::error::{GpuError, Result};
use ash::vk;

/// Number of array layers: six faces for a cube, one otherwise.
pub fn layer_count(cube: bool) -> u32 {
    if cube {
        6
    } else {
        1
    }
}

/// Find a memory type allowed by `type_filter` that has all of `properties`.
///
/// Returns the lowest matching index. A miss means the requested properties
/// cannot be satisfied by this device at all.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = memory_properties.memory_type_count as usize;

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_filter & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
        .ok_or_else(|| {
            tracing::error!(
                "Unable to find proper memory: filter {type_filter:#b}, {properties:?}"
            );
            GpuError::MemoryTypeNotFound {
                type_filter,
                properties,
            }
        })
}

/// Description of a 2D (or cube) image to create.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_properties: vk::MemoryPropertyFlags,
    pub cube: bool,
}

impl ImageDesc {
    /// Single-mip, optimally tiled, device-local 2D image.
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            cube: false,
        }
    }

    /// Builder-style cube flag.
    pub fn cube(mut self, cube: bool) -> Self {
        self.cube = cube;
        self
    }

    /// Builder-style mip count.
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Create info for this description. Starts in `UNDEFINED` layout.
    pub fn create_info(&self) -> vk::ImageCreateInfo<'static> {
        let flags = if self.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .mip_levels(self.mip_levels)
            .array_layers(layer_count(self.cube))
            .format(self.format)
            .tiling(self.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1)
    }
}

/// An image and the memory bound to it.
///
/// Owned exclusively by whoever created it and released with
/// [`ImageResource::destroy`]. The current layout is the caller's business.
#[derive(Debug)]
pub struct ImageResource {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub layer_count: u32,
}

impl ImageResource {
    /// Whether this is a six-layer cube image.
    pub fn is_cube(&self) -> bool {
        self.layer_count == 6
    }

    /// Destroy the image, then free its memory.
    ///
    /// # Safety
    /// The image must not be in use and `device` must be the one it was created on.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

/// Create an image with its own memory allocation and bind them.
///
/// On failure nothing created by this call is left behind.
///
/// # Safety
/// All handles must be valid and `device` must belong to `physical_device`.
pub unsafe fn create_image(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
    desc: &ImageDesc,
) -> Result<ImageResource> {
    let image = device.create_image(&desc.create_info(), None).map_err(|e| {
        tracing::error!("Unable to create texture image: {e}");
        GpuError::ImageCreationFailed(e)
    })?;

    let requirements = device.get_image_memory_requirements(image);
    let memory_properties = instance.get_physical_device_memory_properties(physical_device);

    let memory_type = match find_memory_type(
        &memory_properties,
        requirements.memory_type_bits,
        desc.memory_properties,
    ) {
        Ok(index) => index,
        Err(e) => {
            device.destroy_image(image, None);
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);

    let memory = match device.allocate_memory(&alloc_info, None) {
        Ok(memory) => memory,
        Err(e) => {
            tracing::error!("Unable to allocate texture memory: {e}");
            device.destroy_image(image, None);
            return Err(GpuError::MemoryAllocationFailed(e.to_string()));
        }
    };

    if let Err(e) = device.bind_image_memory(image, memory, 0) {
        tracing::error!("Unable to bind texture memory: {e}");
        device.destroy_image(image, None);
        device.free_memory(memory, None);
        return Err(GpuError::MemoryAllocationFailed(e.to_string()));
    }

    Ok(ImageResource {
        image,
        memory,
        format: desc.format,
        extent: vk::Extent2D {
            width: desc.width,
            height: desc.height,
        },
        mip_levels: desc.mip_levels,
        layer_count: layer_count(desc.cube),
    })
}

/// Create info for a view over every mip and layer of `image`.
pub fn image_view_create_info(
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    cube: bool,
    mip_levels: u32,
) -> vk::ImageViewCreateInfo<'static> {
    let view_type = if cube {
        vk::ImageViewType::CUBE
    } else {
        vk::ImageViewType::TYPE_2D
    };

    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(layer_count(cube)),
        )
}

/// Create an image view.
///
/// # Safety
/// The device and image must be valid.
pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    cube: bool,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let view_info = image_view_create_info(image, format, aspect_mask, cube, mip_levels);

    device.create_image_view(&view_info, None).map_err(|e| {
        tracing::error!("Unable to create image view: {e}");
        GpuError::ImageViewCreationFailed(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        props
    }

    #[test]
    fn filter_bit_and_properties_must_both_match() {
        let a = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let b = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let props = memory_properties(&[a, b, a | b]);

        // Bit 1 is excluded, so index 1 is skipped even though it has B.
        assert_eq!(find_memory_type(&props, 0b101, b).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b111, b).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b101, a).unwrap(), 0);
    }

    #[test]
    fn missing_memory_type_is_an_error() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let err = find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .unwrap_err();
        assert!(matches!(err, GpuError::MemoryTypeNotFound { type_filter: 0b01, .. }));
        assert!(err.is_defect());
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
    }

    #[test]
    fn plain_image_has_one_layer() {
        let desc = ImageDesc::new_2d(
            640,
            480,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        )
        .mip_levels(4);
        let info = desc.create_info();

        assert_eq!(info.array_layers, 1);
        assert_eq!(info.mip_levels, 4);
        assert!(info.flags.is_empty());
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(info.extent.depth, 1);
        assert_eq!(info.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn cube_image_has_six_layers() {
        let desc = ImageDesc::new_2d(
            256,
            256,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::SAMPLED,
        )
        .cube(true);
        let info = desc.create_info();

        assert_eq!(info.array_layers, 6);
        assert!(info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
    }

    #[test]
    fn view_covers_all_mips_and_layers() {
        let view = image_view_create_info(
            vk::Image::null(),
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageAspectFlags::COLOR,
            true,
            5,
        );
        assert_eq!(view.view_type, vk::ImageViewType::CUBE);
        assert_eq!(view.subresource_range.base_mip_level, 0);
        assert_eq!(view.subresource_range.level_count, 5);
        assert_eq!(view.subresource_range.base_array_layer, 0);
        assert_eq!(view.subresource_range.layer_count, 6);

        let flat = image_view_create_info(
            vk::Image::null(),
            vk::Format::D32_SFLOAT,
            vk::ImageAspectFlags::DEPTH,
            false,
            1,
        );
        assert_eq!(flat.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(flat.subresource_range.layer_count, 1);
        assert_eq!(flat.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }
}
