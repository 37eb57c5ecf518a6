//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

/// Validation layers enabled when debugging.
pub fn validation_layers() -> [&'static CStr; 1] {
    [c"VK_LAYER_KHRONOS_validation"]
}

/// Names of every instance layer the loader exposes.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn list_instance_layers(entry: &ash::Entry) -> Result<HashSet<String>> {
    let layers = entry.enumerate_instance_layer_properties()?;

    Ok(layers
        .iter()
        .filter_map(|props| {
            props
                .layer_name_as_c_str()
                .ok()
                .and_then(|name| name.to_str().ok())
                .map(String::from)
        })
        .collect())
}

/// Validation layers absent from `available`.
pub fn missing_layers(available: &HashSet<String>) -> Vec<&'static CStr> {
    validation_layers()
        .into_iter()
        .filter(|layer| layer.to_str().map_or(true, |name| !available.contains(name)))
        .collect()
}

/// Check that all validation layers are available.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn check_validation_layer_support(entry: &ash::Entry) -> Result<bool> {
    let missing = missing_layers(&list_instance_layers(entry)?);
    for layer in &missing {
        tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
    }
    Ok(missing.is_empty())
}

/// Append the debug extension to the windowing extensions when debugging.
pub fn with_debug_extension(
    mut extensions: Vec<&'static CStr>,
    debug_enabled: bool,
) -> Vec<&'static CStr> {
    if debug_enabled && !extensions.contains(&ash::ext::debug_utils::NAME) {
        extensions.push(ash::ext::debug_utils::NAME);
    }
    extensions
}

/// Instance extensions the windowing system requires for `display`, plus the
/// debug extension when `debug_enabled`.
pub fn required_instance_extensions(
    display: RawDisplayHandle,
    debug_enabled: bool,
) -> Result<Vec<&'static CStr>> {
    let window_extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::SurfaceCreationFailed(format!("Unsupported display: {e}")))?;

    // SAFETY: ash-window hands out pointers to static, NUL-terminated names.
    #[allow(unused_mut)]
    let mut extensions: Vec<&'static CStr> = window_extensions
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME);

    Ok(with_debug_extension(extensions, debug_enabled))
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidState("Application name contains NUL".to_string()))?;
    let engine_name = c"Prism";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    let extensions = required_instance_extensions(display, enable_validation)?;
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let layers: Vec<&CStr> = if enable_validation {
        validation_layers().to_vec()
    } else {
        Vec::new()
    };
    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    entry.create_instance(&create_info, None).map_err(|e| {
        tracing::error!("Unable to create a Vulkan instance: {e}");
        GpuError::InstanceCreationFailed(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_extension_only_when_enabled() {
        let base = vec![ash::khr::surface::NAME];

        let release = with_debug_extension(base.clone(), false);
        assert_eq!(release, vec![ash::khr::surface::NAME]);

        let debug = with_debug_extension(base, true);
        assert_eq!(debug, vec![ash::khr::surface::NAME, ash::ext::debug_utils::NAME]);
    }

    #[test]
    fn debug_extension_not_duplicated() {
        let base = vec![ash::ext::debug_utils::NAME];
        assert_eq!(with_debug_extension(base, true).len(), 1);
    }

    #[test]
    fn missing_validation_layer_detected() {
        let mut available: HashSet<String> = HashSet::new();
        available.insert("VK_LAYER_MESA_device_select".to_string());
        assert_eq!(missing_layers(&available), validation_layers().to_vec());

        available.insert("VK_LAYER_KHRONOS_validation".to_string());
        assert!(missing_layers(&available).is_empty());
    }
}
