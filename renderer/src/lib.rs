//! Backend selection and the frame driver.
//!
//! This crate is the only place concrete backends are named: the probe asks
//! each compiled backend whether the host can run it, the manager owns the
//! selected device and handles fallback and runtime switching, and the
//! adaptive renderer pushes per-frame payloads through whichever device is
//! currently primary.

pub mod adaptive;
pub mod manager;
pub mod probe;

pub use self::adaptive::{AdaptiveRenderer, FramePayload};
pub use self::manager::{BackendManager, ManagerOptions};
pub use self::probe::{available_backends, probe_all, probe_backend, ProbeReport, SUPPORTED};

pub use ember_render as render;
