//! Software rasteriser backend.
//!
//! A pure-CPU implementation of the graphics device contract. It keeps every
//! resource in host memory, executes command streams synchronously at submit,
//! and produces deterministic placeholder output. It has no host
//! requirements at all, which makes it the unconditional last entry of the
//! fallback chain; correctness of the contract, not rendering quality, is
//! the goal.

mod device;
mod exec;
mod resources;

pub use self::device::SoftwareDevice;

use ember_render::{BackendInfo, BackendKind, Capabilities};

/// Capability record of the rasteriser. Everything optional is off; limits
/// are whatever host memory tolerates.
pub fn capabilities() -> Capabilities {
    Capabilities {
        supports_ray_tracing: false,
        supports_mesh_shaders: false,
        supports_compute: true,
        supports_geometry: false,
        supports_tessellation: false,
        supports_bindless: false,
        supports_async_compute: false,
        max_texture_size: 16384,
        max_render_targets: 8,
        max_vertex_attributes: 16,
        max_uniform_bindings: 16,
        max_texture_bindings: 32,
    }
}

pub fn backend_info() -> BackendInfo {
    BackendInfo {
        kind: BackendKind::Software,
        api_version: "software 1.0".to_owned(),
        vendor: "ember".to_owned(),
        device_name: "cpu rasteriser".to_owned(),
    }
}
