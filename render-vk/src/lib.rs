//! Vulkan backend.
//!
//! Built on `ash`. The device consumes SPIR-V shader modules (textual
//! languages go through an external compiler before they reach this layer),
//! records command streams into native command buffers at submit time, and
//! maps the contract's barriers onto image layout transitions.

mod instance;
mod resources;
mod swapchain;
mod device;

pub use self::device::VulkanDevice;

use ash::vk;

use ember_render::error::{ErrorKind, GraphicsError};
use ember_render::Capabilities;

/// Translates a native result into the shared taxonomy.
pub(crate) fn map_vk_error(result: vk::Result, context: &str) -> GraphicsError {
    let kind = match result {
        vk::Result::ERROR_DEVICE_LOST => ErrorKind::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
            ErrorKind::SwapChainOutOfDate
        }
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            ErrorKind::OutOfMemory
        }
        vk::Result::ERROR_MEMORY_MAP_FAILED => ErrorKind::InvalidMemoryAccess,
        vk::Result::ERROR_INITIALIZATION_FAILED => ErrorKind::InitializationFailed,
        vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_FEATURE_NOT_PRESENT
        | vk::Result::ERROR_LAYER_NOT_PRESENT => ErrorKind::FeatureNotSupported,
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED => ErrorKind::UnsupportedFormat,
        vk::Result::TIMEOUT => ErrorKind::TimeoutExpired,
        _ => ErrorKind::ResourceCreationFailed,
    };
    GraphicsError::new(kind, format!("{}: {:?}", context, result))
}

/// Derives the capability record from physical device properties and
/// features plus the instance-level extension view.
pub(crate) fn capabilities_from_device(
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
    has_ray_tracing_ext: bool,
    has_mesh_shader_ext: bool,
) -> Capabilities {
    let limits = &properties.limits;
    Capabilities {
        supports_ray_tracing: has_ray_tracing_ext,
        supports_mesh_shaders: has_mesh_shader_ext,
        supports_compute: true,
        supports_geometry: features.geometry_shader == vk::TRUE,
        supports_tessellation: features.tessellation_shader == vk::TRUE,
        supports_bindless: features.shader_sampled_image_array_dynamic_indexing == vk::TRUE,
        supports_async_compute: true,
        max_texture_size: limits.max_image_dimension2_d,
        max_render_targets: limits.max_color_attachments.min(8),
        max_vertex_attributes: limits.max_vertex_input_attributes,
        max_uniform_bindings: limits
            .max_descriptor_set_uniform_buffers
            .min(limits.max_per_stage_descriptor_uniform_buffers),
        max_texture_bindings: limits.max_per_stage_descriptor_sampled_images,
    }
}

/// Side-effect-free availability check: loads the loader, spins up a
/// throwaway instance, inspects the best physical device and tears
/// everything down again.
pub fn probe() -> ember_render::Result<Capabilities> {
    let entry = unsafe { ash::Entry::load() }.map_err(|e| {
        GraphicsError::new(
            ErrorKind::BackendNotAvailable,
            format!("Vulkan loader not present: {}", e),
        )
    })?;

    let app_info = vk::ApplicationInfo::default().api_version(vk::API_VERSION_1_1);
    let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(|e| map_vk_error(e, "create probe instance"))?;

    let result = (|| {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| map_vk_error(e, "enumerate physical devices"))?;
        let best = instance::pick_physical_device(&instance, &devices).ok_or_else(|| {
            GraphicsError::new(
                ErrorKind::BackendNotAvailable,
                "no Vulkan device with a graphics queue",
            )
        })?;
        let properties = unsafe { instance.get_physical_device_properties(best.device) };
        let features = unsafe { instance.get_physical_device_features(best.device) };
        Ok(capabilities_from_device(
            &properties,
            &features,
            best.has_ray_tracing_ext,
            best.has_mesh_shader_ext,
        ))
    })();

    unsafe { instance.destroy_instance(None) };
    result
}
