//! The graphics context: instance, surface, device and queues for one window.

use crate::allocator::GpuAllocator;
use crate::capabilities::{find_depth_format, DeviceInfo, QueueFamilies};
use crate::debug::DebugMessenger;
use crate::device::{create_logical_device, required_features, select_physical_device};
use crate::error::{GpuError, Result};
use crate::instance::{check_validation_layer_support, create_instance};
use crate::memory::{create_image, ImageDesc, ImageResource};
use crate::surface::Surface;
use crate::swapchain::{build_swapchain_parameters, Swapchain};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Vulkan state shared by everything rendering into one window.
///
/// Dropping the context waits for the device and releases everything it
/// owns. Swapchains, images and pools created from it must be destroyed first.
pub struct GraphicsContext {
    // Keeps the loader library alive.
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: Surface,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    queue_families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    info: DeviceInfo,
    allocator: Mutex<GpuAllocator>,
}

impl GraphicsContext {
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.surface
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface.loader
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Properties of the selected GPU.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Buffer allocator used for staging.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Whether validation messages are being forwarded.
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }

    /// Build a swapchain for the surface at the requested size.
    ///
    /// Pass the swapchain being replaced as `old`; the caller destroys it
    /// once the new one exists.
    pub fn build_swapchain(
        &self,
        width: u32,
        height: u32,
        old: Option<&Swapchain>,
    ) -> Result<Swapchain> {
        unsafe {
            let params = build_swapchain_parameters(
                &self.surface.loader,
                self.physical_device,
                self.surface.surface,
                width,
                height,
            )?;

            Swapchain::create(
                &self.device,
                &self.swapchain_loader,
                &params,
                self.surface.surface,
                self.queue_families,
                old.map(|s| s.swapchain),
            )
        }
    }

    /// Create an image with dedicated memory on this device.
    pub fn create_image(&self, desc: &ImageDesc) -> Result<ImageResource> {
        unsafe { create_image(&self.instance, self.physical_device, &self.device, desc) }
    }

    /// Best depth format the device supports as an attachment.
    pub fn depth_format(&self) -> Result<vk::Format> {
        unsafe { find_depth_format(&self.instance, self.physical_device) }
    }

    /// Block until the device has no work pending.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Pooled memory must go before the device.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface.destroy();
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Graphics context destroyed");
    }
}

/// Objects created so far during [`GraphicsContextBuilder::build`].
///
/// Torn down in reverse order if the build fails part way.
struct Partial {
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: Option<Surface>,
    device: Option<ash::Device>,
    armed: bool,
}

impl Drop for Partial {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        unsafe {
            if let Some(device) = &self.device {
                device.destroy_device(None);
            }
            if let Some(surface) = &self.surface {
                surface.destroy();
            }
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for a [`GraphicsContext`].
pub struct GraphicsContextBuilder {
    app_name: String,
    validation: bool,
}

impl Default for GraphicsContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl GraphicsContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name reported to the driver.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Request validation layers. Silently downgraded (with a warning) when
    /// the layers are not installed.
    pub fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    /// Create the context for `window`.
    pub fn build<W>(self, window: &W) -> Result<GraphicsContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreationFailed(format!("No display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreationFailed(format!("No window handle: {e}")))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            tracing::error!("Failed to load Vulkan: {e}");
            GpuError::Loading(e.to_string())
        })?;

        let validation = self.validation && unsafe { check_validation_layer_support(&entry)? };
        if self.validation && !validation {
            tracing::warn!("Validation layers requested but not available; continuing without");
        }

        let instance = unsafe { create_instance(&entry, &self.app_name, display, validation)? };

        let mut partial = Partial {
            instance,
            debug: None,
            surface: None,
            device: None,
            armed: true,
        };

        if validation {
            partial.debug = Some(unsafe { DebugMessenger::new(&entry, &partial.instance)? });
        }

        let surface =
            unsafe { Surface::new(&entry, &partial.instance, display, window_handle)? };
        let (surface_handle, surface_loader) = (surface.surface, surface.loader.clone());
        partial.surface = Some(surface);

        let selected =
            unsafe { select_physical_device(&partial.instance, &surface_loader, surface_handle)? };
        let queue_families = selected.queue_families;

        let device = unsafe {
            create_logical_device(
                &partial.instance,
                selected.physical_device,
                &queue_families.unique(),
                &required_features(),
                validation,
            )?
        };
        partial.device = Some(device.clone());

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        if queue_families.is_split() {
            tracing::info!(
                "Graphics on family {}, presentation on family {}",
                queue_families.graphics,
                queue_families.present
            );
        }

        let allocator =
            unsafe { GpuAllocator::new(&partial.instance, &device, selected.physical_device)? };

        let swapchain_loader = ash::khr::swapchain::Device::new(&partial.instance, &device);

        partial.armed = false;
        let surface = partial
            .surface
            .take()
            .ok_or_else(|| GpuError::InvalidState("Surface missing after build".to_string()))?;

        Ok(GraphicsContext {
            entry,
            instance: partial.instance.clone(),
            debug: partial.debug.take(),
            surface,
            physical_device: selected.physical_device,
            device,
            swapchain_loader,
            queue_families,
            graphics_queue,
            present_queue,
            info: selected.info,
            allocator: Mutex::new(allocator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let builder = GraphicsContextBuilder::new();
        assert_eq!(builder.app_name, "Prism");
        assert_eq!(builder.validation, cfg!(debug_assertions));
    }

    #[test]
    fn builder_overrides() {
        let builder = GraphicsContextBuilder::new()
            .app_name("Viewer")
            .validation(true);
        assert_eq!(builder.app_name, "Viewer");
        assert!(builder.validation);
    }
}
