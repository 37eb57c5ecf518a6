//! Decoded images turned into upload-ready texels.

use ash::vk;
use image::DynamicImage;

/// Texel data in the layout `upload_texture` expects.
#[derive(Debug, Clone, PartialEq)]
pub struct TexturePixels {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
}

impl TexturePixels {
    /// Float images (Radiance HDR, OpenEXR) keep full precision as
    /// `R32G32B32A32_SFLOAT`; everything else becomes `R8G8B8A8_UNORM`.
    pub fn from_image(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());

        if is_float(&image) {
            let rgba = image.into_rgba32f();
            Self {
                bytes: bytemuck::cast_slice(rgba.as_raw()).to_vec(),
                width,
                height,
                format: vk::Format::R32G32B32A32_SFLOAT,
            }
        } else {
            Self {
                bytes: image.into_rgba8().into_raw(),
                width,
                height,
                format: vk::Format::R8G8B8A8_UNORM,
            }
        }
    }

    pub fn is_hdr(&self) -> bool {
        self.format == vk::Format::R32G32B32A32_SFLOAT
    }
}

fn is_float(image: &DynamicImage) -> bool {
    matches!(
        image,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)
    )
}

/// Blit filter for a source format: linear only where the format supports it.
pub fn blit_filter(requested: vk::Filter, features: vk::FormatFeatureFlags) -> vk::Filter {
    if requested == vk::Filter::LINEAR
        && !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        vk::Filter::NEAREST
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgb32FImage, RgbImage};

    #[test]
    fn ldr_images_become_rgba8() {
        let image = RgbImage::from_pixel(3, 2, Rgb([255, 128, 0]));
        let pixels = TexturePixels::from_image(DynamicImage::ImageRgb8(image));

        assert_eq!(pixels.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!((pixels.width, pixels.height), (3, 2));
        assert_eq!(pixels.bytes.len(), 3 * 2 * 4);
        assert_eq!(&pixels.bytes[..4], &[255, 128, 0, 255]);
        assert!(!pixels.is_hdr());
    }

    #[test]
    fn float_images_keep_values_above_one() {
        let image = Rgb32FImage::from_pixel(2, 1, Rgb([4.5, 0.25, 0.0]));
        let pixels = TexturePixels::from_image(DynamicImage::ImageRgb32F(image));

        assert_eq!(pixels.format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(pixels.bytes.len(), 2 * 16);
        assert!(pixels.is_hdr());

        let texels: &[f32] = bytemuck::cast_slice(&pixels.bytes);
        assert_eq!(&texels[..4], &[4.5, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn byte_size_matches_upload_expectation() {
        let image = Rgb32FImage::from_pixel(5, 3, Rgb([1.0, 1.0, 1.0]));
        let pixels = TexturePixels::from_image(DynamicImage::ImageRgb32F(image));

        assert!(prism_gpu::texture::validate_pixel_data(
            pixels.bytes.len(),
            pixels.width,
            pixels.height,
            pixels.format
        )
        .is_ok());
    }

    #[test]
    fn linear_falls_back_without_filter_support() {
        let none = vk::FormatFeatureFlags::BLIT_SRC;
        let linear = none | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;

        assert_eq!(blit_filter(vk::Filter::LINEAR, none), vk::Filter::NEAREST);
        assert_eq!(blit_filter(vk::Filter::LINEAR, linear), vk::Filter::LINEAR);
        assert_eq!(blit_filter(vk::Filter::NEAREST, linear), vk::Filter::NEAREST);
    }
}
