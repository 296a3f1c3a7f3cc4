//! Host capability probing.
//!
//! The probe answers one question per backend kind: could a device of this
//! kind be created on this host, with these options, right now? Probing is
//! side-effect-free: no device, context or window survives a probe, and a
//! failed probe leaves nothing half-initialised.

use ember_render::device::DeviceOptions;
use ember_render::{BackendKind, Capabilities};

/// Backend kinds this build compiles in, preferred-first.
pub const SUPPORTED: &[BackendKind] = &[
    BackendKind::Vulkan,
    BackendKind::OpenGl,
    BackendKind::OpenGlEs,
    BackendKind::Software,
];

/// Outcome of probing one backend kind.
#[derive(Clone, Debug)]
pub struct ProbeReport {
    pub kind: BackendKind,
    pub available: bool,
    /// Why the backend is unavailable, when it is.
    pub reason: Option<String>,
    /// Capability record the backend would advertise, when available.
    pub capabilities: Option<Capabilities>,
}

impl ProbeReport {
    fn available(kind: BackendKind, capabilities: Capabilities) -> ProbeReport {
        ProbeReport {
            kind,
            available: true,
            reason: None,
            capabilities: Some(capabilities),
        }
    }

    fn unavailable(kind: BackendKind, reason: impl Into<String>) -> ProbeReport {
        ProbeReport {
            kind,
            available: false,
            reason: Some(reason.into()),
            capabilities: None,
        }
    }
}

/// Probes a single backend kind.
pub fn probe_backend(kind: BackendKind, options: &DeviceOptions) -> ProbeReport {
    match kind {
        BackendKind::Vulkan => match ember_render_vk::probe() {
            Ok(capabilities) => ProbeReport::available(kind, capabilities),
            Err(e) => ProbeReport::unavailable(kind, e.message),
        },
        BackendKind::OpenGl | BackendKind::OpenGlEs => match &options.gl_proc_loader {
            Some(loader) => match ember_render_gl::probe(loader, kind) {
                Ok(capabilities) => ProbeReport::available(kind, capabilities),
                Err(e) => ProbeReport::unavailable(kind, e.message),
            },
            None => ProbeReport::unavailable(kind, "no GL proc loader supplied by the host"),
        },
        BackendKind::Software => {
            ProbeReport::available(kind, ember_render_soft::capabilities())
        }
        other => ProbeReport::unavailable(
            other,
            format!("{} backend is not compiled into this build", other),
        ),
    }
}

/// Kinds a device could be created for right now, preferred-first per
/// [`BackendKind::PREFERENCE_ORDER`]. Never empty: the software backend is
/// always present.
pub fn available_backends(options: &DeviceOptions) -> Vec<BackendKind> {
    BackendKind::PREFERENCE_ORDER
        .iter()
        .copied()
        .filter(|kind| probe_backend(*kind, options).available)
        .collect()
}

/// Full report over the preference order, for diagnostics.
pub fn probe_all(options: &DeviceOptions) -> Vec<ProbeReport> {
    BackendKind::PREFERENCE_ORDER
        .iter()
        .map(|kind| probe_backend(*kind, options))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_is_always_available() {
        let options = DeviceOptions::default();
        let available = available_backends(&options);
        assert!(!available.is_empty());
        assert_eq!(*available.last().unwrap(), BackendKind::Software);
    }

    #[test]
    fn gl_unavailable_without_loader() {
        let options = DeviceOptions::default();
        let report = probe_backend(BackendKind::OpenGl, &options);
        assert!(!report.available);
    }

    #[test]
    fn uncompiled_backends_report_unsupported() {
        let options = DeviceOptions::default();
        for kind in [
            BackendKind::Direct3D12,
            BackendKind::Direct3D11,
            BackendKind::Metal,
            BackendKind::WebGpu,
        ] {
            let report = probe_backend(kind, &options);
            assert!(!report.available);
            assert!(report.reason.as_ref().unwrap().contains("not compiled"));
        }
    }

    #[test]
    fn probing_is_repeatable() {
        let options = DeviceOptions::default();
        let a = available_backends(&options);
        let b = available_backends(&options);
        assert_eq!(a, b);
    }
}
