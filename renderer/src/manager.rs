//! Backend selection, ownership, fallback and runtime switching.

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use ember_render::device::{DeviceOptions, GraphicsDevice};
use ember_render::error::{ErrorKind, GraphicsError, Result, Severity};
use ember_render::swapchain::SwapchainDesc;
use ember_render::BackendKind;

use crate::probe;

/// Policy options layered over the per-device [`DeviceOptions`].
#[derive(Clone, Debug)]
pub struct ManagerOptions {
    pub preferred_backend: Option<BackendKind>,
    /// Walk the probe order when the preferred backend fails.
    pub auto_fallback: bool,
    pub debug_mode: bool,
    /// Probe every candidate before attempting creation; failures become log
    /// entries instead of creation attempts.
    pub validate_backends: bool,
    pub enable_backend_switching: bool,
    pub device: DeviceOptions,
}

impl Default for ManagerOptions {
    fn default() -> ManagerOptions {
        ManagerOptions {
            preferred_backend: None,
            auto_fallback: true,
            debug_mode: false,
            validate_backends: true,
            enable_backend_switching: true,
            device: DeviceOptions::default(),
        }
    }
}

/// Timeout used when quiescing in-flight GPU work before disruptive
/// operations.
const QUIESCE_TIMEOUT: Duration = Duration::from_millis(500);

//--------------------------------------------------------------------------------------------------

/// Owns the primary device (and optionally a secondary one for async work),
/// and is the only place a concrete backend is ever named.
pub struct BackendManager {
    options: ManagerOptions,
    primary: RwLock<Box<dyn GraphicsDevice>>,
    secondary: Mutex<Option<Box<dyn GraphicsDevice>>>,
    /// Swap chain the upper layer asked for; recreated on the new device
    /// after a backend switch.
    swapchain_desc: Mutex<Option<SwapchainDesc>>,
    switch_request: Mutex<Option<BackendKind>>,
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn create_device(kind: BackendKind, options: &ManagerOptions) -> Result<Box<dyn GraphicsDevice>> {
    let mut device_options = options.device.clone();
    device_options.debug_mode = options.debug_mode;
    device_options.validation = device_options.validation || options.debug_mode;
    match kind {
        BackendKind::Vulkan => Ok(Box::new(ember_render_vk::VulkanDevice::new(&device_options)?)),
        BackendKind::OpenGl | BackendKind::OpenGlEs => Ok(Box::new(
            ember_render_gl::OpenGlDevice::new(kind, &device_options)?,
        )),
        BackendKind::Software => Ok(Box::new(ember_render_soft::SoftwareDevice::new(
            &device_options,
        )?)),
        other => Err(GraphicsError::new(
            ErrorKind::BackendNotSupported,
            format!("{} backend is not compiled into this build", other),
        )),
    }
}

impl BackendManager {
    /// Selects and creates the primary device.
    ///
    /// Candidates are the preferred backend (if any) followed by the probe
    /// order; the first successful creation wins. Without `auto_fallback` a
    /// failing preferred backend surfaces `BackendNotAvailable` instead of
    /// walking the rest of the list. The software backend terminates the
    /// list and cannot fail.
    pub fn new(options: ManagerOptions) -> Result<BackendManager> {
        let mut candidates: Vec<BackendKind> = Vec::new();
        if let Some(preferred) = options.preferred_backend {
            candidates.push(preferred);
        }
        for kind in BackendKind::PREFERENCE_ORDER {
            if !candidates.contains(&kind) {
                candidates.push(kind);
            }
        }

        let mut failures: Vec<(BackendKind, GraphicsError)> = Vec::new();
        for kind in candidates {
            if options.validate_backends {
                let report = probe::probe_backend(kind, &options.device);
                if !report.available {
                    log::debug!(
                        "skipping {}: {}",
                        kind,
                        report.reason.as_deref().unwrap_or("unavailable")
                    );
                    failures.push((
                        kind,
                        GraphicsError::new(
                            ErrorKind::BackendNotAvailable,
                            report.reason.unwrap_or_default(),
                        ),
                    ));
                    if Some(kind) == options.preferred_backend && !options.auto_fallback {
                        break;
                    }
                    continue;
                }
            }
            match create_device(kind, &options) {
                Ok(device) => {
                    log::info!("selected {} backend", kind);
                    // surface earlier candidate failures in the winner's log
                    for (failed, error) in &failures {
                        device.base().errors.record(
                            Severity::Warning,
                            ErrorKind::BackendNotAvailable,
                            format!("{} unavailable: {}", failed, error.message),
                        );
                    }
                    return Ok(BackendManager {
                        options,
                        primary: RwLock::new(device),
                        secondary: Mutex::new(None),
                        swapchain_desc: Mutex::new(None),
                        switch_request: Mutex::new(None),
                    });
                }
                Err(e) => {
                    log::warn!("{} backend failed to initialise: {}", kind, e);
                    failures.push((kind, e));
                    if Some(kind) == options.preferred_backend && !options.auto_fallback {
                        break;
                    }
                }
            }
        }

        let preferred = options
            .preferred_backend
            .map(|k| k.to_string())
            .unwrap_or_else(|| "any".to_owned());
        Err(GraphicsError::new(
            ErrorKind::BackendNotAvailable,
            format!("no usable backend (preferred: {})", preferred),
        ))
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Kinds a device could currently be created for, preferred-first.
    pub fn available_backends(&self) -> Vec<BackendKind> {
        probe::available_backends(&self.options.device)
    }

    /// Shared access to the primary device. Callers hold the guard for the
    /// duration of a frame; `switch_backend` takes the write side, so a
    /// switch waits for all frames to drain.
    pub fn device(&self) -> RwLockReadGuard<'_, Box<dyn GraphicsDevice>> {
        self.primary.read()
    }

    pub fn primary_kind(&self) -> BackendKind {
        self.primary.read().kind()
    }

    //----------------------------------------------------------------------------------------------
    // Swap chain lifecycle. Routed through the manager so the descriptor
    // survives backend switches and resizes are quiesced.

    pub fn create_swap_chain(&self, desc: &SwapchainDesc) -> Result<()> {
        let device = self.primary.read();
        device.create_swap_chain(desc)?;
        *self.swapchain_desc.lock() = Some(desc.clone());
        Ok(())
    }

    /// Waits for in-flight submissions, then resizes.
    pub fn resize_swap_chain(&self, width: u32, height: u32) -> Result<()> {
        let device = self.primary.read();
        if !device.wait_for_fence(QUIESCE_TIMEOUT.as_nanos() as u64)? {
            return Err(GraphicsError::new(
                ErrorKind::TimeoutExpired,
                "in-flight work did not finish before resize",
            ));
        }
        device.resize_swap_chain(width, height)?;
        let mut desc = self.swapchain_desc.lock();
        if let Some(desc) = desc.as_mut() {
            if width > 0 && height > 0 {
                desc.width = width;
                desc.height = height;
            }
        }
        Ok(())
    }

    /// Rebuilds the swap chain on the current device from the remembered
    /// descriptor; the recovery path for `SwapChainOutOfDate`.
    pub fn recreate_swap_chain(&self) -> Result<()> {
        let desc = self.swapchain_desc.lock().clone().ok_or_else(|| {
            GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain to recreate")
        })?;
        let device = self.primary.read();
        device.wait_idle()?;
        device.create_swap_chain(&desc)
    }

    //----------------------------------------------------------------------------------------------
    // Runtime switching

    /// Asks the adaptive renderer to switch between frames.
    pub fn request_switch(&self, target: BackendKind) -> Result<()> {
        if !self.options.enable_backend_switching {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "backend switching is disabled",
            ));
        }
        *self.switch_request.lock() = Some(target);
        Ok(())
    }

    /// Whether a switch request is waiting. The adaptive renderer polls this
    /// between frames.
    pub fn should_switch_backend(&self) -> bool {
        self.switch_request.lock().is_some()
    }

    /// Claims the pending switch request, if any.
    pub fn take_switch_request(&self) -> Option<BackendKind> {
        self.switch_request.lock().take()
    }

    /// Replaces the primary device with a freshly created `target` device.
    ///
    /// Returns `Ok(true)` on success. A creation failure is recoverable: the
    /// old device stays primary, a warning lands in its error log, and
    /// `Ok(false)` is returned. Valid only when no command buffer is
    /// recording or pending; taking the primary write lock and draining the
    /// old device enforces that here.
    pub fn switch_backend(&self, target: BackendKind) -> Result<bool> {
        if !self.options.enable_backend_switching {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "backend switching is disabled",
            ));
        }
        if self.primary_kind() == target {
            return Ok(true);
        }

        let new_device = match create_device(target, &self.options) {
            Ok(device) => device,
            Err(e) => {
                let device = self.primary.read();
                device.base().errors.record(
                    Severity::Warning,
                    ErrorKind::BackendNotAvailable,
                    format!("switch to {} failed: {}; keeping {}", target, e.message, device.kind()),
                );
                return Ok(false);
            }
        };

        // carry the presentation surface over before the old device goes away
        if let Some(desc) = self.swapchain_desc.lock().clone() {
            if let Err(e) = new_device.create_swap_chain(&desc) {
                let device = self.primary.read();
                device.base().errors.record(
                    Severity::Warning,
                    ErrorKind::SwapChainCreationFailed,
                    format!("switch to {} failed: {}; keeping {}", target, e.message, device.kind()),
                );
                return Ok(false);
            }
        }

        // no frames in flight once the write lock is held
        let mut primary = self.primary.write();
        let mut old = std::mem::replace(&mut *primary, new_device);
        drop(primary);

        old.wait_idle()?;
        // destroys every registered resource before the device goes away
        old.deinit()?;
        drop(old);

        log::info!("switched primary backend to {}", target);
        Ok(true)
    }

    //----------------------------------------------------------------------------------------------
    // Recovery, called by the adaptive renderer on recoverable frame errors.

    pub fn recover(&self, kind: ErrorKind) -> Result<()> {
        match kind {
            ErrorKind::SwapChainOutOfDate => self.recreate_swap_chain(),
            ErrorKind::DeviceLost => {
                // the device is gone; move to the best other backend
                let current = self.primary_kind();
                let target = self
                    .available_backends()
                    .into_iter()
                    .find(|k| *k != current)
                    .unwrap_or(BackendKind::Software);
                match self.switch_backend(target)? {
                    true => Ok(()),
                    false => Err(GraphicsError::new(
                        ErrorKind::DeviceLost,
                        "no backend available to recover onto",
                    )),
                }
            }
            other => Err(GraphicsError::new(
                other,
                "error kind is not recoverable by the manager",
            )),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Secondary device for async work. Shares nothing with the primary.

    pub fn create_secondary(&self, kind: BackendKind) -> Result<()> {
        let device = create_device(kind, &self.options)?;
        *self.secondary.lock() = Some(device);
        Ok(())
    }

    pub fn with_secondary<R>(
        &self,
        f: impl FnOnce(&dyn GraphicsDevice) -> R,
    ) -> Option<R> {
        self.secondary.lock().as_ref().map(|d| f(d.as_ref()))
    }

    pub fn destroy_secondary(&self) -> Result<()> {
        if let Some(mut device) = self.secondary.lock().take() {
            device.wait_idle()?;
            device.deinit()?;
        }
        Ok(())
    }

    //----------------------------------------------------------------------------------------------

    /// Tears down every owned device.
    pub fn deinit(&self) -> Result<()> {
        self.destroy_secondary()?;
        let mut primary = self.primary.write();
        primary.wait_idle()?;
        primary.deinit()
    }
}

impl Drop for BackendManager {
    fn drop(&mut self) {
        let live = self.primary.read().state() == ember_render::DeviceState::Live;
        if live {
            if let Err(e) = self.deinit() {
                log::error!("backend manager teardown failed: {}", e);
            }
        }
    }
}
