//! Validation message forwarding.
//!
//! Messages from the validation layers are routed into `tracing` so they show
//! up next to the engine's own logs, filtered by the same `RUST_LOG` rules.

use crate::error::{GpuError, Result};
use ash::ext::debug_utils;
use ash::vk;
use std::borrow::Cow;
use std::ffi::c_void;

/// Registered debug messenger. Owned by the graphics context.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Severities and message kinds forwarded to the log.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

impl DebugMessenger {
    /// Register the callback on `instance`.
    ///
    /// # Safety
    /// The instance must have been created with the debug utils extension.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let messenger = loader
            .create_debug_utils_messenger(&messenger_create_info(), None)
            .map_err(|e| {
                tracing::error!("Unable to register the debug callback: {e}");
                GpuError::DebugCallbackRegistrationFailed(e)
            })?;

        Ok(Self { loader, messenger })
    }

    /// Unregister the callback.
    ///
    /// # Safety
    /// Must be called before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.messenger, None);
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() {
        Cow::Borrowed("(no message)")
    } else {
        // SAFETY: the loader passes a valid callback data pointer for the call.
        match unsafe { (*data).message_as_c_str() } {
            Some(msg) => msg.to_string_lossy(),
            None => Cow::Borrowed("(no message)"),
        }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "prism_gpu::validation", ?kind, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "prism_gpu::validation", ?kind, "{message}");
    } else {
        tracing::debug!(target: "prism_gpu::validation", ?kind, "{message}");
    }

    // The application should always return `VK_FALSE`.
    vk::FALSE
}
