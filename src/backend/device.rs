// Vulkan device - core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layer
// - Surface creation (connection to the window system)
// - Adapter selection: first suitable device in enumeration order
// - Logical device + queue creation

use ash::{khr, vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;
use winit::window::Window;

use super::swapchain::SwapchainSupport;
use crate::config::Config;
use crate::error::RenderError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Graphics and presentation queue family indices. The two roles may be
/// served by the same family or by different ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Capability summary for one adapter, gathered by `query_adapter`.
#[derive(Debug, Clone, Copy, Default)]
struct Suitability {
    graphics: Option<u32>,
    present: Option<u32>,
    swapchain_ext: bool,
    surface_formats: usize,
    present_modes: usize,
}

impl Suitability {
    /// Queue families to use if the adapter qualifies, or the first
    /// requirement it fails.
    fn qualify(&self) -> Result<QueueFamilies, &'static str> {
        let graphics = self.graphics.ok_or("graphics queue family")?;
        let present = self.present.ok_or("presentation queue family")?;
        if !self.swapchain_ext {
            return Err("swapchain extension");
        }
        if self.surface_formats == 0 {
            return Err("surface formats");
        }
        if self.present_modes == 0 {
            return Err("present modes");
        }
        Ok(QueueFamilies { graphics, present })
    }
}

/// First adapter satisfying every requirement wins; ties are broken by
/// enumeration order, not by scoring.
fn select_adapter(profiles: &[Suitability]) -> Option<(usize, QueueFamilies)> {
    profiles
        .iter()
        .enumerate()
        .find_map(|(index, profile)| profile.qualify().ok().map(|families| (index, families)))
}

/// Owns the instance, surface, and logical device. Everything else in the
/// renderer borrows this through an `Arc` and is destroyed before it.
pub struct RenderDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    _entry: Entry,
}

impl RenderDevice {
    pub fn new(window: &Window, config: &Config) -> Result<Arc<Self>, RenderError> {
        let entry = unsafe { Entry::load() }?;

        let enable_validation = config.debug.validation_layers;
        if enable_validation {
            Self::check_validation_layer(&entry)?;
        }

        let instance = Self::create_instance(&entry, window, &config.window.title, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )
        }?;
        log::info!("Window surface created");

        let (physical_device, families) =
            Self::pick_adapter(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, families)?;
        log::info!("Logical device created");

        Ok(Arc::new(Self {
            device,
            physical_device,
            families,
            graphics_queue,
            present_queue,
            surface,
            surface_loader,
            debug_utils,
            instance,
            _entry: entry,
        }))
    }

    fn check_validation_layer(entry: &Entry) -> Result<(), RenderError> {
        let available = unsafe { entry.enumerate_instance_layer_properties() }?;
        let found = available
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if found {
            Ok(())
        } else {
            Err(RenderError::ValidationUnavailable)
        }
    }

    fn create_instance(
        entry: &Entry,
        window: &Window,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance, RenderError> {
        let app_name = CString::new(app_name).unwrap_or_default();
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // The windowing helper knows which surface extensions this platform
        // needs.
        let mut extensions =
            ash_window::enumerate_required_extensions(window.display_handle()?.as_raw())?.to_vec();

        let layers = if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        log::info!("Vulkan instance created");

        Ok(instance)
    }

    fn create_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT), RenderError> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_adapter(
        instance: &ash::Instance,
        surface_loader: &khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies), RenderError> {
        let adapters = unsafe { instance.enumerate_physical_devices() }?;
        log::trace!("{} Vulkan adapter(s) available", adapters.len());

        let profiles = adapters
            .iter()
            .map(|&adapter| Self::query_adapter(instance, surface_loader, surface, adapter))
            .collect::<Result<Vec<_>, _>>()?;

        for (adapter, profile) in adapters.iter().zip(&profiles) {
            if let Err(missing) = profile.qualify() {
                let properties = unsafe { instance.get_physical_device_properties(*adapter) };
                let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
                log::debug!(
                    "Skipping adapter {:?}: missing {}",
                    name.to_string_lossy(),
                    missing
                );
            }
        }

        let (index, families) =
            select_adapter(&profiles).ok_or(RenderError::NoSuitableDevice)?;
        let physical_device = adapters[index];

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!("Selected adapter: {}", name.to_string_lossy());
        log::trace!(
            "Queue families: graphics {}, present {}",
            families.graphics,
            families.present
        );

        Ok((physical_device, families))
    }

    fn query_adapter(
        instance: &ash::Instance,
        surface_loader: &khr::surface::Instance,
        surface: vk::SurfaceKHR,
        adapter: vk::PhysicalDevice,
    ) -> Result<Suitability, RenderError> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(adapter) };

        let graphics = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|index| index as u32);

        let mut present = None;
        for index in 0..queue_families.len() as u32 {
            let supported = unsafe {
                surface_loader.get_physical_device_surface_support(adapter, index, surface)
            }?;
            if supported {
                present = Some(index);
                break;
            }
        }

        let extensions = unsafe { instance.enumerate_device_extension_properties(adapter) }?;
        let swapchain_ext = extensions.iter().any(|ext| {
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == khr::swapchain::NAME
        });

        // Surface capabilities are only meaningful once the swapchain
        // extension is known to be present.
        let (surface_formats, present_modes) = if swapchain_ext {
            let support = SwapchainSupport::query(surface_loader, surface, adapter)?;
            (support.formats.len(), support.present_modes.len())
        } else {
            (0, 0)
        };

        Ok(Suitability {
            graphics,
            present,
            swapchain_ext,
            surface_formats,
            present_modes,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue), RenderError> {
        let queue_priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions = [khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Block until all submitted GPU work has finished.
    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suitable() -> Suitability {
        Suitability {
            graphics: Some(0),
            present: Some(0),
            swapchain_ext: true,
            surface_formats: 1,
            present_modes: 1,
        }
    }

    #[test]
    fn first_suitable_adapter_wins() {
        let profiles = [
            Suitability {
                graphics: None,
                ..suitable()
            },
            suitable(),
            suitable(),
        ];
        let (index, families) = select_adapter(&profiles).unwrap();
        assert_eq!(index, 1);
        assert_eq!(families, QueueFamilies { graphics: 0, present: 0 });
    }

    #[test]
    fn selection_is_idempotent() {
        let profiles = [
            suitable(),
            Suitability {
                graphics: Some(1),
                present: Some(2),
                ..suitable()
            },
        ];
        assert_eq!(
            select_adapter(&profiles).map(|(i, _)| i),
            select_adapter(&profiles).map(|(i, _)| i)
        );
        assert_eq!(select_adapter(&profiles).map(|(i, _)| i), Some(0));
    }

    #[test]
    fn no_adapters_means_no_selection() {
        assert!(select_adapter(&[]).is_none());
    }

    #[test]
    fn missing_presentation_family_disqualifies() {
        let profiles = [Suitability {
            present: None,
            ..suitable()
        }];
        assert!(select_adapter(&profiles).is_none());
    }

    #[test]
    fn missing_swapchain_extension_disqualifies() {
        let profiles = [Suitability {
            swapchain_ext: false,
            ..suitable()
        }];
        assert!(select_adapter(&profiles).is_none());
    }

    #[test]
    fn empty_surface_capabilities_disqualify() {
        let no_formats = Suitability {
            surface_formats: 0,
            ..suitable()
        };
        let no_modes = Suitability {
            present_modes: 0,
            ..suitable()
        };
        assert!(select_adapter(&[no_formats]).is_none());
        assert!(select_adapter(&[no_modes]).is_none());
    }

    #[test]
    fn distinct_graphics_and_present_families_qualify() {
        let profiles = [Suitability {
            graphics: Some(0),
            present: Some(3),
            ..suitable()
        }];
        let (_, families) = select_adapter(&profiles).unwrap();
        assert_eq!(families.unique(), vec![0, 3]);
    }

    #[test]
    fn aliased_families_collapse_to_one_queue() {
        let families = QueueFamilies {
            graphics: 2,
            present: 2,
        };
        assert_eq!(families.unique(), vec![2]);
    }
}
