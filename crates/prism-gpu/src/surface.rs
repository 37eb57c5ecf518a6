//! Window surface creation.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// A presentation surface and the loader that owns its entry points.
pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Create a surface for a native window.
    ///
    /// # Safety
    /// The instance must have been created with the extensions required for
    /// `display`, and the window must outlive the surface.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let surface = ash_window::create_surface(entry, instance, display, window, None)
            .map_err(|e| {
                tracing::error!("Unable to create window surface: {e}");
                GpuError::SurfaceCreationFailed(e.to_string())
            })?;

        let loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self { surface, loader })
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain may still reference the surface.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_surface(self.surface, None);
    }
}
