use crate::debug::{
    check_validation_layer_support, get_layer_names_and_pointers, setup_debug_messenger,
};
use crate::deletion::DeletionQueue;
use crate::error::{EngineError, Result, VkResultExt};
use crate::swapchain::SwapchainSupportDetails;
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Device, Entry, Instance};
use itertools::Itertools;
use std::cmp::Reverse;
use std::ffi::CStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Everything a deferred deletion may need to release a device object.
#[derive(Clone)]
pub(crate) struct Gpu {
    pub(crate) device: Device,
    pub(crate) allocator: Arc<Mutex<vk_mem::Allocator>>,
}

impl Gpu {
    pub(crate) fn allocator(&self) -> MutexGuard<'_, vk_mem::Allocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct QueueData {
    pub(crate) queue: vk::Queue,
    pub(crate) family_index: u32,
}

/// Device-lifetime state.
///
/// Dropping it waits for the GPU and flushes `deletion_queue` before the allocator and the
/// device go, so anything registered there is released even when initialization stops
/// half way.
pub(crate) struct DeviceCore {
    pub(crate) deletion_queue: DeletionQueue<Gpu>,
    pub(crate) graphics_queue: QueueData,
    pub(crate) gpu: Gpu,
    pub(crate) context: VkContext,
}

impl DeviceCore {
    pub(crate) fn initialize(window: &Window, validation: bool) -> Result<Self> {
        let (context, graphics_queue) = VkContext::initialize(window, validation)?;
        let gpu = Gpu {
            device: context.device.clone(),
            allocator: context.create_allocator()?,
        };
        Ok(Self {
            deletion_queue: DeletionQueue::new(),
            graphics_queue,
            gpu,
            context,
        })
    }

    pub(crate) fn wait_idle(&self) -> Result<()> {
        unsafe { self.gpu.device.device_wait_idle() }.check("vkDeviceWaitIdle")
    }
}

impl Drop for DeviceCore {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::error!("{err}, destroying resources anyway");
        }
        self.deletion_queue.flush(&self.gpu);
    }
}

pub(crate) struct VkContext {
    _entry: Entry,
    pub(crate) instance: Instance,
    debug_messenger: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) surface_fn: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Device,
}

impl VkContext {
    pub(crate) fn initialize(window: &Window, validation: bool) -> Result<(Self, QueueData)> {
        log::debug!("Creating vulkan context");
        let entry = unsafe { Entry::load()? };

        match unsafe { entry.try_enumerate_instance_version() } {
            Ok(Some(version)) => {
                log::info!("Vulkan loader version {}", format_api_version(version))
            }
            Ok(None) => log::info!("Vulkan loader version 1.0"),
            Err(err) => log::warn!("Could not query loader version: {err}"),
        }

        let validation = validation && check_validation_layer_support(&entry);
        let instance = Self::create_instance(&entry, window, validation)?;

        let debug_messenger = if validation {
            Some(setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_fn = surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )
        }
        .check("vkCreateSurfaceKHR")?;
        log::debug!("Surface created");

        let selected = Self::select_physical_device(&instance, &surface_fn, surface)
            .and_then(|(physical_device, family_index)| {
                let device =
                    Self::create_logical_device(&instance, physical_device, family_index)?;
                Ok((physical_device, family_index, device))
            });
        let (physical_device, family_index, device) = match selected {
            Ok(selected) => selected,
            Err(err) => {
                unsafe {
                    surface_fn.destroy_surface(surface, None);
                    if let Some((debug_utils, messenger)) = debug_messenger {
                        debug_utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(err);
            }
        };

        let graphics_queue = QueueData {
            queue: unsafe { device.get_device_queue(family_index, 0) },
            family_index,
        };

        let context = Self {
            _entry: entry,
            instance,
            debug_messenger,
            surface_fn,
            surface,
            physical_device,
            device,
        };
        context.print_vulkan_info();

        Ok((context, graphics_queue))
    }

    fn create_instance(entry: &Entry, window: &Window, validation: bool) -> Result<Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Vx Engine")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Vx Engine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(MIN_API_VERSION);

        let mut extension_names =
            ash_window::enumerate_required_extensions(window.display_handle()?.as_raw())
                .check("vkEnumerateInstanceExtensionProperties")?
                .to_vec();

        if validation {
            extension_names.push(debug_utils::NAME.as_ptr());
        }

        let (_layer_names, layer_names_ptrs) = get_layer_names_and_pointers();

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names);

        if validation {
            instance_create_info = instance_create_info.enabled_layer_names(&layer_names_ptrs);
        }

        let instance = unsafe { entry.create_instance(&instance_create_info, None) }
            .check("vkCreateInstance")?;
        log::debug!("Instance created (validation: {validation})");
        Ok(instance)
    }

    fn select_physical_device(
        instance: &Instance,
        surface_fn: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let available_devices = unsafe { instance.enumerate_physical_devices() }
            .check("vkEnumeratePhysicalDevices")?;

        let candidates = available_devices
            .into_iter()
            .filter_map(|device| {
                let family = Self::check_device(instance, surface_fn, surface, device)?;
                let props = unsafe { instance.get_physical_device_properties(device) };
                Some(((device, family), props.device_type))
            })
            .collect_vec();

        let selected = pick_preferred(candidates).ok_or(EngineError::NoSuitableDevice)?;

        let props = unsafe { instance.get_physical_device_properties(selected.0) };
        log::debug!("Selected physical device: {:?}", device_name(&props));
        Ok(selected)
    }

    /// Returns the graphics/present queue family if `physical_device` meets every requirement.
    fn check_device(
        instance: &Instance,
        surface_fn: &surface::Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Option<u32> {
        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = device_name(&props);

        if props.api_version < MIN_API_VERSION {
            log::debug!(
                "{name:?}: API {} is older than 1.3",
                format_api_version(props.api_version)
            );
            return None;
        }

        if !Self::supports_required_features(instance, physical_device) {
            log::debug!("{name:?}: missing required Vulkan 1.2/1.3 features");
            return None;
        }

        if !Self::check_device_extension_support(instance, physical_device) {
            log::debug!("{name:?}: missing swapchain extension");
            return None;
        }

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let family = find_queue_family(&families, |index| {
            unsafe {
                surface_fn.get_physical_device_surface_support(physical_device, index, surface)
            }
            .unwrap_or(false)
        });
        let Some(family) = family else {
            log::debug!("{name:?}: no queue family with graphics and present support");
            return None;
        };

        let swapchain_usable =
            match SwapchainSupportDetails::query(physical_device, surface_fn, surface) {
                Ok(details) => !details.formats.is_empty() && !details.present_modes.is_empty(),
                Err(err) => {
                    log::debug!("{name:?}: {err}");
                    false
                }
            };
        swapchain_usable.then_some(family)
    }

    fn supports_required_features(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
    ) -> bool {
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut features12)
                .push_next(&mut features13);
            unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
        }

        features13.dynamic_rendering == vk::TRUE
            && features13.synchronization2 == vk::TRUE
            && features12.buffer_device_address == vk::TRUE
            && features12.descriptor_indexing == vk::TRUE
    }

    fn check_device_extension_support(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
    ) -> bool {
        let Ok(extension_properties) =
            (unsafe { instance.enumerate_device_extension_properties(physical_device) })
        else {
            return false;
        };

        Self::get_required_device_extensions().iter().all(|extension| {
            extension_properties.iter().any(|ext| {
                let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                *extension == ext_name
            })
        })
    }

    // Dynamic rendering, sync2, buffer device address and descriptor indexing are core in 1.3.
    fn get_required_device_extensions() -> [&'static CStr; 1] {
        [ash::khr::swapchain::NAME]
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> Result<Device> {
        let queue_priorities = [1.0_f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(family_index)
            .queue_priorities(&queue_priorities)];

        let device_extensions_ptrs = Self::get_required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect_vec();

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .descriptor_indexing(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extensions_ptrs)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
            .check("vkCreateDevice")?;
        log::debug!("Logical device created (queue family {family_index})");
        Ok(device)
    }

    /// Shared with the UI renderer, which allocates its own buffers and textures.
    pub(crate) fn create_allocator(&self) -> Result<Arc<Mutex<vk_mem::Allocator>>> {
        let mut info =
            vk_mem::AllocatorCreateInfo::new(&self.instance, &self.device, self.physical_device);
        info.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        info.vulkan_api_version = MIN_API_VERSION;

        let allocator = unsafe { vk_mem::Allocator::new(info) }.check("vmaCreateAllocator")?;
        log::debug!("Memory allocator created");
        Ok(Arc::new(Mutex::new(allocator)))
    }

    pub(crate) fn print_vulkan_info(&self) {
        let props = unsafe {
            self.instance
                .get_physical_device_properties(self.physical_device)
        };
        log::info!(
            "GPU: {} ({:?}), Vulkan {}, driver {}",
            device_name(&props).to_string_lossy(),
            props.device_type,
            format_api_version(props.api_version),
            format_api_version(props.driver_version),
        );
    }
}

impl Drop for VkContext {
    fn drop(&mut self) {
        log::debug!("Start: Dropping context");
        unsafe {
            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("End: Dropping context");
    }
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> &CStr {
    unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
}

pub(crate) fn format_api_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Highest scoring device type wins; ties keep enumeration order.
fn pick_preferred<T>(candidates: Vec<(T, vk::PhysicalDeviceType)>) -> Option<T> {
    candidates
        .into_iter()
        .min_by_key(|(_, device_type)| Reverse(device_type_score(*device_type)))
        .map(|(candidate, _)| candidate)
}

/// First queue family that supports graphics and can present. Indices refer to the
/// unfiltered family list.
fn find_queue_family<F>(families: &[vk::QueueFamilyProperties], supports_present: F) -> Option<u32>
where
    F: Fn(u32) -> bool,
{
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|(index, _)| index as u32)
        .find(|index| supports_present(*index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn queue_family_index_survives_empty_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 0),
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        assert_eq!(find_queue_family(&families, |_| true), Some(2));
    }

    #[test]
    fn queue_family_must_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert_eq!(find_queue_family(&families, |index| index == 1), Some(1));
        assert_eq!(find_queue_family(&families, |_| false), None);
    }

    #[test]
    fn graphics_family_without_queues_is_skipped() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0)];
        assert_eq!(find_queue_family(&families, |_| true), None);
    }

    #[test]
    fn discrete_gpu_is_preferred() {
        let picked = pick_preferred(vec![
            ("cpu", vk::PhysicalDeviceType::CPU),
            ("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
            ("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU),
            ("vgpu", vk::PhysicalDeviceType::VIRTUAL_GPU),
        ]);
        assert_eq!(picked, Some("dgpu"));
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let picked = pick_preferred(vec![
            ("first", vk::PhysicalDeviceType::INTEGRATED_GPU),
            ("second", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ]);
        assert_eq!(picked, Some("first"));
        assert_eq!(pick_preferred::<&str>(vec![]), None);
    }

    #[test]
    fn device_type_ordering() {
        use vk::PhysicalDeviceType as T;
        let scores = [T::DISCRETE_GPU, T::INTEGRATED_GPU, T::VIRTUAL_GPU, T::CPU, T::OTHER]
            .map(device_type_score);
        assert!(scores.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn api_versions_are_formatted() {
        assert_eq!(format_api_version(vk::make_api_version(0, 1, 3, 275)), "1.3.275");
        assert_eq!(format_api_version(vk::API_VERSION_1_2), "1.2.0");
    }
}
