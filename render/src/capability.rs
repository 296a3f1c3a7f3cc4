//! Backend identities and per-device capability records.

use std::fmt;

/// Identifies one concrete implementation of the graphics device contract.
///
/// A `BackendKind` names an API, not a device: the same kind can be probed,
/// selected, and instantiated independently. Kinds that the current build does
/// not compile in are still representable here so that selection policy and
/// diagnostics can talk about them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum BackendKind {
    Vulkan,
    Direct3D12,
    Metal,
    Direct3D11,
    WebGpu,
    OpenGl,
    OpenGlEs,
    Software,
}

impl BackendKind {
    /// Fixed preference order used by the capability probe: most capable
    /// first, the software rasteriser as the unconditional last resort.
    pub const PREFERENCE_ORDER: [BackendKind; 8] = [
        BackendKind::Vulkan,
        BackendKind::Direct3D12,
        BackendKind::Metal,
        BackendKind::Direct3D11,
        BackendKind::WebGpu,
        BackendKind::OpenGl,
        BackendKind::OpenGlEs,
        BackendKind::Software,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Vulkan => "Vulkan",
            BackendKind::Direct3D12 => "Direct3D 12",
            BackendKind::Metal => "Metal",
            BackendKind::Direct3D11 => "Direct3D 11",
            BackendKind::WebGpu => "WebGPU",
            BackendKind::OpenGl => "OpenGL",
            BackendKind::OpenGlEs => "OpenGL ES",
            BackendKind::Software => "Software",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Feature flags and numeric limits of one live device.
///
/// Derived once at device init and never mutated afterwards. Upper layers
/// branch on these instead of naming a backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Capabilities {
    pub supports_ray_tracing: bool,
    pub supports_mesh_shaders: bool,
    pub supports_compute: bool,
    pub supports_geometry: bool,
    pub supports_tessellation: bool,
    pub supports_bindless: bool,
    pub supports_async_compute: bool,
    pub max_texture_size: u32,
    pub max_render_targets: u32,
    pub max_vertex_attributes: u32,
    pub max_uniform_bindings: u32,
    pub max_texture_bindings: u32,
}

impl Capabilities {
    /// Conservative baseline every conformant backend can satisfy.
    pub const BASELINE: Capabilities = Capabilities {
        supports_ray_tracing: false,
        supports_mesh_shaders: false,
        supports_compute: false,
        supports_geometry: false,
        supports_tessellation: false,
        supports_bindless: false,
        supports_async_compute: false,
        max_texture_size: 4096,
        max_render_targets: 4,
        max_vertex_attributes: 16,
        max_uniform_bindings: 12,
        max_texture_bindings: 16,
    };
}

impl Default for Capabilities {
    fn default() -> Capabilities {
        Capabilities::BASELINE
    }
}

/// Identification strings reported by a backend at init, for logs and
/// diagnostics. The capability record is the authoritative feature source;
/// these are informational only.
#[derive(Clone, Debug)]
pub struct BackendInfo {
    pub kind: BackendKind,
    /// API version string, e.g. `"Vulkan 1.3.280"` or `"OpenGL 4.5 core"`.
    pub api_version: String,
    /// Driver vendor, when the API reports one.
    pub vendor: String,
    /// Device or renderer name, when the API reports one.
    pub device_name: String,
}

impl BackendInfo {
    pub fn new(kind: BackendKind) -> BackendInfo {
        BackendInfo {
            kind,
            api_version: String::new(),
            vendor: String::new(),
            device_name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_order_ends_with_software() {
        assert_eq!(
            *BackendKind::PREFERENCE_ORDER.last().unwrap(),
            BackendKind::Software
        );
        for kind in BackendKind::PREFERENCE_ORDER {
            assert_eq!(
                BackendKind::PREFERENCE_ORDER
                    .iter()
                    .filter(|k| **k == kind)
                    .count(),
                1
            );
        }
    }
}
