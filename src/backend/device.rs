// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance + surface creation (through the function loader)
// - Physical device selection (discrete GPU with graphics + present support)
// - Logical device + queue creation
// - Shared command pool for one-shot submissions

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::loader::{DeviceFns, InstanceFns, VALIDATION_LAYER};
use crate::error::{FatalError, VkCheck};

/// Knobs for device bring-up
#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    pub validation: bool,
    pub allow_integrated_gpu: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            allow_integrated_gpu: false,
        }
    }
}

/// Graphics and present queue family indices (may be the same family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Families to request queues from, deduplicated
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// What device selection needs to know about one queue family
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilySummary {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

/// Snapshot of a physical device, gathered up front so selection is pure
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilySummary>,
    pub has_swapchain_extension: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

/// Graphics family is the first with GRAPHICS. A family that can also present
/// is preferred so both queues come from one family.
pub fn find_queue_families(families: &[QueueFamilySummary]) -> Option<QueueFamilyIndices> {
    let usable = |f: &QueueFamilySummary| f.queue_count > 0;
    let graphics = |f: &QueueFamilySummary| usable(f) && f.flags.contains(vk::QueueFlags::GRAPHICS);
    let present = |f: &QueueFamilySummary| usable(f) && f.supports_present;

    if let Some(both) = families.iter().position(|f| graphics(f) && present(f)) {
        return Some(QueueFamilyIndices {
            graphics: both as u32,
            present: both as u32,
        });
    }

    Some(QueueFamilyIndices {
        graphics: families.iter().position(|f| graphics(f))? as u32,
        present: families.iter().position(|f| present(f))? as u32,
    })
}

/// Accepts a candidate or explains why it was rejected
pub fn is_suitable(
    candidate: &DeviceCandidate,
    allow_integrated_gpu: bool,
) -> Result<QueueFamilyIndices, String> {
    let type_ok = candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
        || (allow_integrated_gpu
            && candidate.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU);
    if !type_ok {
        return Err(format!("{:?} is not an accepted device type", candidate.device_type));
    }
    if !candidate.has_swapchain_extension {
        return Err("missing VK_KHR_swapchain".to_string());
    }
    if candidate.surface_format_count == 0 || candidate.present_mode_count == 0 {
        return Err("surface reports no formats or present modes".to_string());
    }
    find_queue_families(&candidate.queue_families)
        .ok_or_else(|| "no graphics and present capable queue families".to_string())
}

/// Vulkan device wrapper with automatic cleanup
///
/// Owns the surface as well: device selection depends on it, and it must be
/// destroyed before the instance.
pub struct VulkanDevice {
    pub fns: DeviceFns,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,

    /// Pool for the short-lived command buffers every transfer and draw uses
    pub command_pool: vk::CommandPool,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub wireframe_supported: bool,

    // Dropped last
    pub instance: InstanceFns,
}

impl VulkanDevice {
    /// Bring up instance, surface, physical and logical device
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        options: DeviceOptions,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let instance = InstanceFns::load(app_name, display, options.validation)?;

        let surface = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .check("vkCreateSurfaceKHR")?;

        let selected = Self::select_physical_device(&instance, surface, options.allow_integrated_gpu)
            .and_then(|(physical_device, families)| {
                Self::create_logical_device(&instance, physical_device, families)
                    .map(|created| (physical_device, families, created))
            });
        let (physical_device, queue_families, (device, wireframe_supported)) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { instance.surface.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            )
            .queue_family_index(queue_families.graphics);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(result) => {
                unsafe {
                    device.destroy_device(None);
                    instance.surface.destroy_surface(surface, None);
                }
                return Err(FatalError::Vulkan {
                    call: "vkCreateCommandPool",
                    result,
                }
                .into());
            }
        };

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        let fns = DeviceFns::load(&instance.instance, device);

        Ok(Arc::new(Self {
            fns,
            surface,
            physical_device,
            graphics_queue,
            present_queue,
            queue_families,
            command_pool,
            properties,
            memory_properties,
            wireframe_supported,
            instance,
        }))
    }

    /// Core device entry points
    pub fn raw(&self) -> &ash::Device {
        &self.fns.device
    }

    pub fn swapchain_fns(&self) -> &ash::khr::swapchain::Device {
        &self.fns.swapchain
    }

    fn select_physical_device(
        instance: &InstanceFns,
        surface: vk::SurfaceKHR,
        allow_integrated_gpu: bool,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .check("vkEnumeratePhysicalDevices")?;

        if devices.is_empty() {
            return Err(FatalError::NoSuitableDevice("no Vulkan-capable GPU found".into()).into());
        }

        let mut rejections = Vec::new();
        for physical_device in devices {
            let candidate = Self::describe(instance, physical_device, surface)?;
            match is_suitable(&candidate, allow_integrated_gpu) {
                Ok(families) => {
                    log::debug!("Accepted {}", candidate.name);
                    return Ok((physical_device, families));
                }
                Err(reason) => {
                    log::debug!("Rejected {}: {}", candidate.name, reason);
                    rejections.push(format!("{} ({})", candidate.name, reason));
                }
            }
        }

        Err(FatalError::NoSuitableDevice(rejections.join(", ")).into())
    }

    fn describe(
        instance: &InstanceFns,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<DeviceCandidate> {
        let props = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_string());

        let queue_families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(physical_device)
        }
        .iter()
        .enumerate()
        .map(|(index, family)| {
            let supports_present = unsafe {
                instance.surface.get_physical_device_surface_support(
                    physical_device,
                    index as u32,
                    surface,
                )
            }
            .check("vkGetPhysicalDeviceSurfaceSupportKHR")?;
            Ok::<_, anyhow::Error>(QueueFamilySummary {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                supports_present,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let extensions = unsafe {
            instance
                .instance
                .enumerate_device_extension_properties(physical_device)
        }
        .check("vkEnumerateDeviceExtensionProperties")?;
        let has_swapchain_extension = extensions.iter().any(|ext| {
            ext.extension_name_as_c_str()
                .is_ok_and(|name| name == ash::khr::swapchain::NAME)
        });

        // Only meaningful once the extension is known to exist
        let (surface_format_count, present_mode_count) = if has_swapchain_extension {
            let formats = unsafe {
                instance
                    .surface
                    .get_physical_device_surface_formats(physical_device, surface)
            }
            .check("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
            let modes = unsafe {
                instance
                    .surface
                    .get_physical_device_surface_present_modes(physical_device, surface)
            }
            .check("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
            (formats.len(), modes.len())
        } else {
            (0, 0)
        };

        Ok(DeviceCandidate {
            name,
            device_type: props.device_type,
            queue_families,
            has_swapchain_extension,
            surface_format_count,
            present_mode_count,
        })
    }

    fn create_logical_device(
        instance: &InstanceFns,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilyIndices,
    ) -> Result<(ash::Device, bool)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let supported = unsafe {
            instance
                .instance
                .get_physical_device_features(physical_device)
        };
        let wireframe_supported = supported.fill_mode_non_solid == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::default().fill_mode_non_solid(wireframe_supported);

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let layers = if instance.validation() {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        // Device layers are ignored by modern loaders but older ones still read them
        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .check("vkCreateDevice")
        .context("Failed to create logical device")?;

        Ok((device, wireframe_supported))
    }

    /// Surface capabilities, formats and present modes as of now
    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        let surface_fns = &self.instance.surface;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: surface_fns
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                    .check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: surface_fns
                    .get_physical_device_surface_formats(self.physical_device, self.surface)
                    .check("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: surface_fns
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                    .check("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw().device_wait_idle() }.check("vkDeviceWaitIdle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.raw().destroy_command_pool(self.command_pool, None);
            self.raw().destroy_device(None);
            self.instance.surface.destroy_surface(self.surface, None);
        }
        // `instance` drops after this, taking the messenger and instance with it
    }
}

/// Raw surface query results
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, supports_present: bool) -> QueueFamilySummary {
        QueueFamilySummary {
            flags,
            queue_count: 1,
            supports_present,
        }
    }

    fn discrete(families: Vec<QueueFamilySummary>) -> DeviceCandidate {
        DeviceCandidate {
            name: "test gpu".into(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_families: families,
            has_swapchain_extension: true,
            surface_format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        let found = find_queue_families(&families).unwrap();
        assert_eq!(found, QueueFamilyIndices { graphics: 2, present: 2 });
        assert_eq!(found.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::TRANSFER, true),
        ];
        let found = find_queue_families(&families).unwrap();
        assert_eq!(found, QueueFamilyIndices { graphics: 0, present: 1 });
        assert!(!found.is_shared());
        assert_eq!(found.unique(), vec![0, 1]);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [
            QueueFamilySummary {
                flags: vk::QueueFlags::GRAPHICS,
                queue_count: 0,
                supports_present: true,
            },
            family(vk::QueueFlags::GRAPHICS, true),
        ];
        let found = find_queue_families(&families).unwrap();
        assert_eq!(found.graphics, 1);
    }

    #[test]
    fn no_present_family_is_none() {
        let families = [family(vk::QueueFlags::GRAPHICS, false)];
        assert!(find_queue_families(&families).is_none());
    }

    #[test]
    fn integrated_gpu_needs_opt_in() {
        let mut candidate = discrete(vec![family(vk::QueueFlags::GRAPHICS, true)]);
        candidate.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;

        assert!(is_suitable(&candidate, false).is_err());
        assert!(is_suitable(&candidate, true).is_ok());
    }

    #[test]
    fn software_devices_are_never_accepted() {
        let mut candidate = discrete(vec![family(vk::QueueFlags::GRAPHICS, true)]);
        candidate.device_type = vk::PhysicalDeviceType::CPU;
        assert!(is_suitable(&candidate, true).is_err());
    }

    #[test]
    fn rejects_missing_swapchain_or_surface_support() {
        let mut candidate = discrete(vec![family(vk::QueueFlags::GRAPHICS, true)]);
        candidate.has_swapchain_extension = false;
        assert!(is_suitable(&candidate, false).is_err());

        let mut candidate = discrete(vec![family(vk::QueueFlags::GRAPHICS, true)]);
        candidate.present_mode_count = 0;
        assert!(is_suitable(&candidate, false).is_err());
    }
}
