//! Aspect-preserving placement of the image on screen.

use ash::vk;
use glam::Vec2;

/// Where the image lands on screen, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitRect {
    pub offset: Vec2,
    pub size: Vec2,
}

impl FitRect {
    /// Blit destination corners, rounded to whole pixels.
    pub fn dst_offsets(&self) -> [vk::Offset3D; 2] {
        let min = self.offset.round();
        let max = (self.offset + self.size).round();
        [
            vk::Offset3D {
                x: min.x as i32,
                y: min.y as i32,
                z: 0,
            },
            vk::Offset3D {
                x: max.x as i32,
                y: max.y as i32,
                z: 1,
            },
        ]
    }

    /// Whether the rounded rectangle covers at least one pixel.
    pub fn is_visible(&self) -> bool {
        let [min, max] = self.dst_offsets();
        max.x > min.x && max.y > min.y
    }
}

/// Scale `image` uniformly to fit inside `screen` and centre it.
///
/// The scale is `min(screen_w / image_w, screen_h / image_h)`, so the image
/// touches two opposite edges and is letterboxed along the other axis.
pub fn fit_image(image: vk::Extent2D, screen: vk::Extent2D) -> FitRect {
    let image = Vec2::new(image.width as f32, image.height as f32);
    let screen = Vec2::new(screen.width as f32, screen.height as f32);

    if image.x <= 0.0 || image.y <= 0.0 {
        return FitRect {
            offset: screen * 0.5,
            size: Vec2::ZERO,
        };
    }

    let scale = (screen / image).min_element();
    let size = image * scale;

    FitRect {
        offset: (screen - size) * 0.5,
        size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn wide_image_is_letterboxed() {
        let rect = fit_image(extent(2000, 1000), extent(1000, 1000));
        assert_relative_eq!(rect.size.x, 1000.0);
        assert_relative_eq!(rect.size.y, 500.0);
        assert_relative_eq!(rect.offset.x, 0.0);
        assert_relative_eq!(rect.offset.y, 250.0);
    }

    #[test]
    fn tall_image_is_pillarboxed() {
        let rect = fit_image(extent(300, 600), extent(1280, 720));
        assert_relative_eq!(rect.size.x, 360.0);
        assert_relative_eq!(rect.size.y, 720.0);
        assert_relative_eq!(rect.offset.x, 460.0);
        assert_relative_eq!(rect.offset.y, 0.0);
    }

    #[test]
    fn small_image_is_scaled_up() {
        let rect = fit_image(extent(16, 9), extent(1920, 1080));
        assert_relative_eq!(rect.size.x, 1920.0);
        assert_relative_eq!(rect.size.y, 1080.0);
        assert_relative_eq!(rect.offset.x, 0.0);
        assert_relative_eq!(rect.offset.y, 0.0);
    }

    #[test]
    fn aspect_ratio_is_preserved() {
        let rect = fit_image(extent(640, 480), extent(1000, 700));
        assert_relative_eq!(rect.size.x / rect.size.y, 640.0 / 480.0, epsilon = 1e-5);
        assert!(rect.size.x <= 1000.0 && rect.size.y <= 700.0);
    }

    #[test]
    fn blit_offsets_are_rounded() {
        let rect = fit_image(extent(3, 2), extent(100, 100));
        let [min, max] = rect.dst_offsets();
        assert_eq!((min.x, min.y, min.z), (0, 17, 0));
        assert_eq!((max.x, max.y, max.z), (100, 83, 1));
        assert!(rect.is_visible());
    }

    #[test]
    fn empty_image_draws_nothing() {
        let rect = fit_image(extent(0, 10), extent(800, 600));
        assert_relative_eq!(rect.size.x, 0.0);
        assert!(!rect.is_visible());
    }
}
