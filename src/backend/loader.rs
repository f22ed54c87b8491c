// Function loader
//
// Instance-level and device-level function tables. Loaded once per renderer
// and shared by reference through `VulkanDevice`; nothing here is global.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_void, CStr, CString};

use crate::error::{FatalError, VkCheck};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Loaded library, instance, surface table and (optionally) the debug messenger.
///
/// Dropping it destroys the messenger and the instance. Everything created
/// from the instance must already be gone by then.
pub struct InstanceFns {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface: ash::khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    validation: bool,
}

impl InstanceFns {
    pub fn load(app_name: &str, display: RawDisplayHandle, validation: bool) -> Result<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            FatalError::Platform(format!("cannot load the Vulkan library ({}). Is Vulkan installed?", e))
        })?;

        let validation = validation && Self::validation_layer_available(&entry)?;

        let app_name_cstr = application_name(app_name)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkforge")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .check("vkEnumerateInstanceExtensionProperties")?
            .to_vec();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .check("vkCreateInstance")
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface = ash::khr::surface::Instance::new(&entry, &instance);

        log::info!(
            "Vulkan instance created (validation {})",
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            surface,
            debug_utils,
            validation,
        })
    }

    /// Whether the Khronos validation layer ended up enabled
    pub fn validation(&self) -> bool {
        self.validation
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .check("vkEnumerateInstanceLayerProperties")?;

        let found = layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if !found {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        Ok(found)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .check("vkCreateDebugUtilsMessengerEXT")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for InstanceFns {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

/// Device-level tables: core entry points plus the swapchain extension.
pub struct DeviceFns {
    pub device: ash::Device,
    pub swapchain: ash::khr::swapchain::Device,
}

impl DeviceFns {
    pub fn load(instance: &ash::Instance, device: ash::Device) -> Self {
        let swapchain = ash::khr::swapchain::Device::new(instance, &device);
        Self { device, swapchain }
    }
}

fn application_name(app_name: &str) -> Result<CString, FatalError> {
    CString::new(app_name).map_err(|e| {
        FatalError::Platform(format!(
            "application name has a NUL byte at {}",
            e.nul_position()
        ))
    })
}

// Routes validation messages into the log facade
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[Vulkan] {}", message),
        _ => log::trace!("[Vulkan] {}", message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_fatal;

    #[test]
    fn application_name_is_passed_through() {
        assert_eq!(application_name("vkforge demo").unwrap().as_bytes(), b"vkforge demo");
    }

    #[test]
    fn nul_in_application_name_is_fatal() {
        let err = application_name("bad\0name").unwrap_err();
        assert!(matches!(&err, FatalError::Platform(message) if message.contains("at 3")));
        assert!(is_fatal(&err.into()));
    }
}
