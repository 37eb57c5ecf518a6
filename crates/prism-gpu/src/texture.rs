//! Sampled texture upload through a staging buffer.

use crate::command::{copy_buffer_to_image, CommandPool};
use crate::context::GraphicsContext;
use crate::error::{GpuError, Result};
use crate::memory::{ImageDesc, ImageResource};
use crate::transition::transition_image_layout;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Bytes per texel for the uncompressed formats textures are uploaded in.
pub fn texel_size(format: vk::Format) -> Option<u64> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Check that `len` bytes describe exactly one `width` x `height` image.
pub fn validate_pixel_data(len: usize, width: u32, height: u32, format: vk::Format) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(GpuError::InvalidState(format!(
            "Texture size {width}x{height} is empty"
        )));
    }

    let texel = texel_size(format)
        .ok_or_else(|| GpuError::InvalidState(format!("Unsupported texture format {format:?}")))?;
    let expected = u64::from(width) * u64::from(height) * texel;

    if len as u64 != expected {
        return Err(GpuError::InvalidState(format!(
            "Expected {expected} bytes for a {width}x{height} {format:?} texture, got {len}"
        )));
    }
    Ok(())
}

/// Upload tightly packed pixels into a new device-local sampled image.
///
/// The returned image is in `SHADER_READ_ONLY_OPTIMAL` and may also be used
/// as a transfer source. Blocks until the upload is complete.
pub fn upload_texture(
    ctx: &GraphicsContext,
    pool: &CommandPool,
    pixels: &[u8],
    width: u32,
    height: u32,
    format: vk::Format,
) -> Result<ImageResource> {
    validate_pixel_data(pixels.len(), width, height, format)?;

    let mut staging = ctx.allocator().lock().create_buffer(
        pixels.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "texture staging",
    )?;

    let result = staging
        .write(pixels)
        .and_then(|()| upload_from_staging(ctx, pool, staging.buffer, width, height, format));

    ctx.allocator().lock().free_buffer(&mut staging)?;
    result
}

fn upload_from_staging(
    ctx: &GraphicsContext,
    pool: &CommandPool,
    staging: vk::Buffer,
    width: u32,
    height: u32,
    format: vk::Format,
) -> Result<ImageResource> {
    let desc = ImageDesc::new_2d(
        width,
        height,
        format,
        vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::SAMPLED,
    );
    let texture = ctx.create_image(&desc)?;

    let device = ctx.device();
    let queue = ctx.graphics_queue();

    let uploaded = unsafe {
        transition_image_layout(
            device,
            pool,
            queue,
            texture.image,
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            false,
            1,
        )
        .and_then(|()| {
            copy_buffer_to_image(device, pool, queue, staging, texture.image, width, height)
        })
        .and_then(|()| {
            transition_image_layout(
                device,
                pool,
                queue,
                texture.image,
                format,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                false,
                1,
            )
        })
    };

    match uploaded {
        Ok(()) => {
            tracing::debug!("Uploaded {width}x{height} {format:?} texture");
            Ok(texture)
        }
        Err(e) => {
            unsafe { texture.destroy(device) };
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_size_matches() {
        assert!(validate_pixel_data(16, 2, 2, vk::Format::R8G8B8A8_UNORM).is_ok());
        assert!(validate_pixel_data(15, 2, 2, vk::Format::R8G8B8A8_UNORM).is_err());
        assert!(validate_pixel_data(128, 2, 2, vk::Format::R32G32B32A32_SFLOAT).is_err());
        assert!(validate_pixel_data(64, 2, 2, vk::Format::R32G32B32A32_SFLOAT).is_ok());
    }

    #[test]
    fn empty_or_unknown_textures_are_rejected() {
        assert!(validate_pixel_data(0, 0, 4, vk::Format::R8G8B8A8_UNORM).is_err());
        assert!(validate_pixel_data(16, 2, 2, vk::Format::BC1_RGB_UNORM_BLOCK).is_err());
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8_UNORM), Some(1));
        assert_eq!(texel_size(vk::Format::B8G8R8A8_SRGB), Some(4));
        assert_eq!(texel_size(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(texel_size(vk::Format::D32_SFLOAT), None);
    }
}
