//! Instance setup, physical device selection, logical device creation.

use ash::vk;
use std::ffi::CStr;

use ember_render::device::{DeviceOptions, WindowHandle};
use ember_render::error::{ErrorKind, GraphicsError, Result};

use crate::map_vk_error;

pub(crate) const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Result of scoring one physical device.
pub(crate) struct PickedDevice {
    pub device: vk::PhysicalDevice,
    pub graphics_queue_family: u32,
    pub has_ray_tracing_ext: bool,
    pub has_mesh_shader_ext: bool,
}

fn device_type_score(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

/// Picks the most capable device that offers a graphics queue.
pub(crate) fn pick_physical_device(
    instance: &ash::Instance,
    devices: &[vk::PhysicalDevice],
) -> Option<PickedDevice> {
    let mut best: Option<(u32, PickedDevice)> = None;
    for &device in devices {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let graphics_queue_family = queue_families.iter().position(|qf| {
            qf.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && qf.queue_flags.contains(vk::QueueFlags::COMPUTE)
        });
        let Some(graphics_queue_family) = graphics_queue_family else {
            continue;
        };

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .unwrap_or_default();
        let has_ext = |name: &CStr| {
            extensions.iter().any(|e| {
                e.extension_name_as_c_str()
                    .map(|n| n == name)
                    .unwrap_or(false)
            })
        };

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let score = device_type_score(properties.device_type);
        let picked = PickedDevice {
            device,
            graphics_queue_family: graphics_queue_family as u32,
            has_ray_tracing_ext: has_ext(ash::khr::ray_tracing_pipeline::NAME),
            has_mesh_shader_ext: has_ext(ash::ext::mesh_shader::NAME),
        };
        if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((score, picked));
        }
    }
    best.map(|(_, picked)| picked)
}

/// Everything created during init that must be destroyed in reverse order.
pub(crate) struct VkContext {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub device: ash::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub surface_loader: Option<ash::khr::surface::Instance>,
    pub surface: Option<vk::SurfaceKHR>,
    pub has_ray_tracing_ext: bool,
    pub has_mesh_shader_ext: bool,
}

impl VkContext {
    /// Creates the instance, surface (when a window was supplied), logical
    /// device and queue. On any failure everything already created is
    /// destroyed before the error propagates.
    pub(crate) fn new(options: &DeviceOptions) -> Result<VkContext> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::new(
                ErrorKind::BackendNotAvailable,
                format!("Vulkan loader not present: {}", e),
            )
        })?;

        let app_info = vk::ApplicationInfo::default()
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions: Vec<*const i8> = Vec::new();
        if let Some(window) = &options.window {
            let required = ash_window::enumerate_required_extensions(window.display)
                .map_err(|e| map_vk_error(e, "enumerate surface extensions"))?;
            extensions.extend_from_slice(required);
        }

        let mut layers: Vec<*const i8> = Vec::new();
        if options.validation && has_validation_layer(&entry) {
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| map_vk_error(e, "create instance"))?;

        // from here on, failures must unwind the created handles
        match Self::init_device(entry.clone(), instance.clone(), options) {
            Ok(context) => Ok(context),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn init_device(
        entry: ash::Entry,
        instance: ash::Instance,
        options: &DeviceOptions,
    ) -> Result<VkContext> {
        let mut surface_loader = None;
        let mut surface = None;
        if let Some(window) = &options.window {
            let loader = ash::khr::surface::Instance::new(&entry, &instance);
            let created = create_surface(&entry, &instance, window)?;
            surface_loader = Some(loader);
            surface = Some(created);
        }

        let destroy_surface = |surface_loader: &Option<ash::khr::surface::Instance>,
                               surface: &Option<vk::SurfaceKHR>| {
            if let (Some(loader), Some(surface)) = (surface_loader, surface) {
                unsafe { loader.destroy_surface(*surface, None) };
            }
        };

        let devices = match unsafe { instance.enumerate_physical_devices() } {
            Ok(devices) => devices,
            Err(e) => {
                destroy_surface(&surface_loader, &surface);
                return Err(map_vk_error(e, "enumerate physical devices"));
            }
        };
        let picked = match pick_physical_device(&instance, &devices) {
            Some(picked) => picked,
            None => {
                destroy_surface(&surface_loader, &surface);
                return Err(GraphicsError::new(
                    ErrorKind::BackendNotAvailable,
                    "no Vulkan device with a graphics queue",
                ));
            }
        };

        // presentation support when a surface exists
        if let (Some(loader), Some(surface_handle)) = (&surface_loader, &surface) {
            let supported = unsafe {
                loader.get_physical_device_surface_support(
                    picked.device,
                    picked.graphics_queue_family,
                    *surface_handle,
                )
            }
            .unwrap_or(false);
            if !supported {
                destroy_surface(&surface_loader, &surface);
                return Err(GraphicsError::new(
                    ErrorKind::DeviceCreationFailed,
                    "graphics queue cannot present to the window surface",
                ));
            }
        }

        let queue_priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(picked.graphics_queue_family)
            .queue_priorities(&queue_priorities)];

        let mut device_extensions: Vec<*const i8> = Vec::new();
        if surface.is_some() {
            device_extensions.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::default();
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features);

        let device =
            match unsafe { instance.create_device(picked.device, &device_info, None) } {
                Ok(device) => device,
                Err(e) => {
                    destroy_surface(&surface_loader, &surface);
                    return Err(map_vk_error(e, "create logical device"));
                }
            };

        let queue = unsafe { device.get_device_queue(picked.graphics_queue_family, 0) };
        let properties = unsafe { instance.get_physical_device_properties(picked.device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(picked.device) };

        Ok(VkContext {
            entry,
            instance,
            physical: picked.device,
            properties,
            memory_properties,
            device,
            queue_family: picked.graphics_queue_family,
            queue,
            surface_loader,
            surface,
            has_ray_tracing_ext: picked.has_ray_tracing_ext,
            has_mesh_shader_ext: picked.has_mesh_shader_ext,
        })
    }

    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        for i in 0..self.memory_properties.memory_type_count {
            if type_bits & (1 << i) != 0
                && self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(required)
            {
                return Ok(i);
            }
        }
        Err(GraphicsError::new(
            ErrorKind::AllocationFailed,
            format!("no memory type matches {:?}", required),
        ))
    }

    /// Reverse-order teardown; the device must already be idle.
    pub(crate) fn destroy(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            if let (Some(loader), Some(surface)) = (&self.surface_loader, self.surface.take()) {
                loader.destroy_surface(surface, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers.iter().any(|l| {
                l.layer_name_as_c_str()
                    .map(|n| n == VALIDATION_LAYER)
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &WindowHandle,
) -> Result<vk::SurfaceKHR> {
    unsafe { ash_window::create_surface(entry, instance, window.display, window.window, None) }
        .map_err(|e| map_vk_error(e, "create window surface"))
}
