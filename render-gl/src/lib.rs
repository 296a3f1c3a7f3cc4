//! OpenGL / OpenGL ES backend.
//!
//! The host owns the context and the window: it hands the layer a
//! proc-address loader (and keeps the context current on the thread that
//! drives the device). Everything else lives here: object lifetime,
//! program linking, state caching, frame pacing.

mod api;
mod device;
mod format;
mod resources;
mod state;
mod sync;

pub use self::device::OpenGlDevice;

use std::ffi::CStr;
use std::os::raw::c_char;

use ember_render::error::{ErrorKind, GraphicsError, Result};
use ember_render::{BackendKind, Capabilities, GlProcLoader};

use crate::api as gl;
use crate::api::Gl;

/// Parsed `GL_VERSION` answer.
#[derive(Clone, Debug)]
pub struct GlVersion {
    pub raw: String,
    pub major: u32,
    pub minor: u32,
    pub es: bool,
}

/// Reads and parses the current context's version string. `None` when no
/// context is current on this thread (GetString is then a null pointer or
/// unreachable).
pub(crate) fn context_version(gl: &Gl) -> Option<GlVersion> {
    if !gl.GetString.is_loaded() {
        return None;
    }
    let raw = unsafe {
        let ptr = gl.GetString(gl::VERSION) as *const c_char;
        if ptr.is_null() {
            return None;
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    };

    // desktop: "4.6.0 NVIDIA 550.54"; ES: "OpenGL ES 3.2 Mesa 24.0"
    let es = raw.starts_with("OpenGL ES");
    let digits = raw
        .trim_start_matches("OpenGL ES")
        .trim_start_matches("OpenGL ES-CM")
        .trim_start();
    let mut parts = digits.split(|c: char| c == '.' || c == ' ');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some(GlVersion {
        raw,
        major,
        minor,
        es,
    })
}

pub(crate) fn check_kind_matches(kind: BackendKind, version: &GlVersion) -> Result<()> {
    let ok = match kind {
        BackendKind::OpenGl => !version.es,
        BackendKind::OpenGlEs => version.es,
        _ => false,
    };
    if !ok {
        return Err(GraphicsError::new(
            ErrorKind::BackendNotAvailable,
            format!("context reports {:?}, wanted {}", version.raw, kind),
        ));
    }
    let min_ok = if version.es {
        (version.major, version.minor) >= (3, 0)
    } else {
        (version.major, version.minor) >= (3, 3)
    };
    if !min_ok {
        return Err(GraphicsError::new(
            ErrorKind::BackendNotAvailable,
            format!("context {} is below the supported minimum", version.raw),
        ));
    }
    Ok(())
}

pub(crate) fn capabilities_from_context(gl: &Gl, version: &GlVersion) -> Capabilities {
    let getint = |param| {
        let mut v = 0;
        unsafe { gl.GetIntegerv(param, &mut v) };
        v.max(0) as u32
    };
    let at_least = |major, minor| (version.major, version.minor) >= (major, minor);

    Capabilities {
        supports_ray_tracing: false,
        supports_mesh_shaders: false,
        supports_compute: if version.es {
            at_least(3, 1)
        } else {
            at_least(4, 3)
        },
        supports_geometry: !version.es && at_least(3, 2),
        supports_tessellation: !version.es && at_least(4, 0),
        supports_bindless: false,
        supports_async_compute: false,
        max_texture_size: getint(gl::MAX_TEXTURE_SIZE),
        max_render_targets: getint(gl::MAX_COLOR_ATTACHMENTS).min(8),
        max_vertex_attributes: getint(gl::MAX_VERTEX_ATTRIBS),
        max_uniform_bindings: getint(gl::MAX_UNIFORM_BUFFER_BINDINGS),
        max_texture_bindings: getint(gl::MAX_TEXTURE_IMAGE_UNITS),
    }
}

/// Side-effect-free availability check: loads entry points through the
/// host's loader and inspects the current context. Nothing is created.
pub fn probe(loader: &GlProcLoader, kind: BackendKind) -> Result<Capabilities> {
    let load = loader.as_ref();
    let gl = Gl::load_with(|symbol| load(symbol));
    let version = context_version(&gl).ok_or_else(|| {
        GraphicsError::new(
            ErrorKind::BackendNotAvailable,
            "no current GL context on this thread",
        )
    })?;
    check_kind_matches(kind, &version)?;
    Ok(capabilities_from_context(&gl, &version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(raw: &str) -> GlVersion {
        let es = raw.starts_with("OpenGL ES");
        let digits = raw.trim_start_matches("OpenGL ES").trim_start();
        let mut parts = digits.split(|c: char| c == '.' || c == ' ');
        GlVersion {
            raw: raw.to_owned(),
            major: parts.next().unwrap().parse().unwrap(),
            minor: parts.next().unwrap().parse().unwrap(),
            es,
        }
    }

    #[test]
    fn kind_matching() {
        let desktop = version("4.6.0 NVIDIA 550.54");
        assert!(check_kind_matches(BackendKind::OpenGl, &desktop).is_ok());
        assert!(check_kind_matches(BackendKind::OpenGlEs, &desktop).is_err());

        let es = version("OpenGL ES 3.2 Mesa 24.0.5");
        assert!(check_kind_matches(BackendKind::OpenGlEs, &es).is_ok());
        assert!(check_kind_matches(BackendKind::OpenGl, &es).is_err());
    }

    #[test]
    fn minimum_versions_enforced() {
        let old = version("2.1 some driver");
        assert_eq!(
            check_kind_matches(BackendKind::OpenGl, &old).unwrap_err().kind,
            ErrorKind::BackendNotAvailable
        );
        let old_es = version("OpenGL ES 2.0 something");
        assert!(check_kind_matches(BackendKind::OpenGlEs, &old_es).is_err());
    }
}
