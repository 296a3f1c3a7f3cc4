//! The unified graphics device contract.
//!
//! Every backend implements [`GraphicsDevice`]; everything above the layer
//! talks to `dyn GraphicsDevice` and never names a concrete API. Native
//! handles stay behind the trait as backend-private registry payloads.

use downcast_rs::{impl_downcast, Downcast};
use std::os::raw::c_void;
use std::sync::Arc;

use crate::base::BackendBase;
use crate::buffer::BufferDesc;
use crate::capability::{BackendInfo, BackendKind, Capabilities};
use crate::command::CommandBuffer;
use crate::error::{ErrorKind, GraphicsError, Result};
use crate::profiler::FrameRecord;
use crate::registry::{
    BufferId, PipelineId, RenderTargetId, ResourceId, ResourceStats, SamplerId, ShaderId,
    TextureId,
};
use crate::renderpass::{RenderPass, RenderPassDesc, RenderTargetDesc};
use crate::shader::ShaderDesc;
use crate::swapchain::{SwapchainDesc, SwapchainState};
use crate::texture::{SamplerDesc, TextureDesc};
use crate::pipeline::PipelineDesc;

/// Opaque host window, as raw platform handles. The host guarantees the
/// window outlives the device.
#[derive(Copy, Clone, Debug)]
pub struct WindowHandle {
    pub window: raw_window_handle::RawWindowHandle,
    pub display: raw_window_handle::RawDisplayHandle,
}

// The raw handles are plain pointers/ids owned by the host's windowing
// layer; the contract above makes moving them between threads sound.
unsafe impl Send for WindowHandle {}
unsafe impl Sync for WindowHandle {}

/// Loader for OpenGL-family entry points, supplied by the host that owns the
/// GL context. Required for the GL backends to probe as available.
pub type GlProcLoader = Arc<dyn Fn(&str) -> *const c_void + Send + Sync>;

/// Options for device creation.
#[derive(Clone)]
pub struct DeviceOptions {
    pub window: Option<WindowHandle>,
    /// Enable native validation (Vulkan validation layers, GL debug output).
    pub validation: bool,
    /// Debug mode: full-severity validation records, debug naming.
    pub debug_mode: bool,
    pub vsync: bool,
    /// Swap chain images; 2 or 3.
    pub buffer_count: u32,
    pub multisample_count: u32,
    /// Initial surface extent, used until a swap chain exists.
    pub width: u32,
    pub height: u32,
    pub gl_proc_loader: Option<GlProcLoader>,
}

impl Default for DeviceOptions {
    fn default() -> DeviceOptions {
        DeviceOptions {
            window: None,
            validation: false,
            debug_mode: false,
            vsync: true,
            buffer_count: 2,
            multisample_count: 1,
            width: 1280,
            height: 720,
            gl_proc_loader: None,
        }
    }
}

impl std::fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("window", &self.window.is_some())
            .field("validation", &self.validation)
            .field("debug_mode", &self.debug_mode)
            .field("vsync", &self.vsync)
            .field("buffer_count", &self.buffer_count)
            .field("multisample_count", &self.multisample_count)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("gl_proc_loader", &self.gl_proc_loader.is_some())
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------

/// Lifecycle of a device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceState {
    Uninitialised,
    Live,
    /// Driver-surfaced fatal event; only `deinit` is allowed.
    Lost,
    Destroyed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceEvent {
    Init,
    Lose,
    Destroy,
}

impl DeviceState {
    pub fn transition(self, event: DeviceEvent) -> Result<DeviceState> {
        use DeviceEvent as E;
        use DeviceState as S;
        let next = match (self, event) {
            (S::Uninitialised, E::Init) => S::Live,
            (S::Live, E::Lose) => S::Lost,
            (S::Live | S::Lost, E::Destroy) => S::Destroyed,
            (state, event) => {
                return Err(GraphicsError::new(
                    ErrorKind::InvalidOperation,
                    format!("device cannot {:?} while {:?}", event, state),
                ))
            }
        };
        Ok(next)
    }

    pub fn ensure_live(self) -> Result<()> {
        match self {
            DeviceState::Live => Ok(()),
            DeviceState::Lost => Err(GraphicsError::new(
                ErrorKind::DeviceLost,
                "device is lost; only deinit is allowed",
            )),
            state => Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                format!("device is {:?}", state),
            )),
        }
    }
}

//--------------------------------------------------------------------------------------------------

/// The device contract every backend implements.
///
/// Operations with a default body are implemented entirely over the shared
/// [`BackendBase`]; backends override only what their native API requires.
pub trait GraphicsDevice: Downcast + Send + Sync {
    fn base(&self) -> &BackendBase;

    fn kind(&self) -> BackendKind {
        self.base().info.kind
    }

    fn info(&self) -> &BackendInfo {
        &self.base().info
    }

    fn capabilities(&self) -> Capabilities {
        self.base().capabilities
    }

    fn state(&self) -> DeviceState {
        self.base().state()
    }

    fn dimensions(&self) -> (u32, u32) {
        self.base().dimensions()
    }

    fn resource_stats(&self) -> ResourceStats {
        self.base().resource_stats()
    }

    //----------------------------------------------------------------------------------------------
    // Frame boundaries

    fn begin_frame(&self) -> Result<()> {
        self.base().begin_frame()
    }

    fn end_frame(&self) -> Result<FrameRecord> {
        self.base().end_frame()
    }

    //----------------------------------------------------------------------------------------------
    // Resource factories

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId>;
    fn destroy_texture(&self, texture: TextureId) -> Result<()>;
    /// Replaces the full contents of one mip level.
    fn update_texture(&self, texture: TextureId, mip_level: u32, data: &[u8]) -> Result<()>;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId>;
    fn destroy_buffer(&self, buffer: BufferId) -> Result<()>;
    /// Writes `data` at `offset`. Host-visible buffers are written directly;
    /// device-local buffers go through the backend's staging path.
    fn update_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId>;
    fn destroy_sampler(&self, sampler: SamplerId) -> Result<()>;

    fn create_shader(&self, desc: &ShaderDesc) -> Result<ShaderId>;
    fn destroy_shader(&self, shader: ShaderId) -> Result<()>;

    /// Round-trips through the pipeline cache: a byte-equal descriptor
    /// returns the previously created pipeline.
    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId>;
    fn destroy_pipeline(&self, pipeline: PipelineId) -> Result<()>;

    /// Validates a pass descriptor into a reusable [`RenderPass`]. Backends
    /// with native pass objects cache them keyed on the compat hash.
    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPass> {
        self.base().ensure_live()?;
        RenderPass::new(desc.clone())
    }

    fn create_render_target(&self, desc: &RenderTargetDesc) -> Result<RenderTargetId>;
    fn destroy_render_target(&self, target: RenderTargetId) -> Result<()>;

    //----------------------------------------------------------------------------------------------
    // Swap chain

    /// Idempotent per device: an existing swap chain is destroyed first.
    fn create_swap_chain(&self, desc: &SwapchainDesc) -> Result<()>;
    /// Invalidates all swap chain images. In-flight work must have completed;
    /// the manager quiesces by waiting on the last submission before calling.
    /// A zero extent parks the swap chain in the minimised state.
    fn resize_swap_chain(&self, width: u32, height: u32) -> Result<()>;
    fn swap_chain_state(&self) -> SwapchainState;
    /// May fail with `DeviceLost` or `SwapChainOutOfDate`; both are
    /// recoverable by recreation. In the minimised state this succeeds
    /// without GPU work.
    fn present(&self) -> Result<()>;

    //----------------------------------------------------------------------------------------------
    // Command recording

    fn create_command_buffer(&self) -> Result<CommandBuffer>;
    /// Atomically enqueues; returns once the driver accepted the work, not
    /// once the GPU finished it.
    fn submit_command_buffer(&self, cb: &mut CommandBuffer) -> Result<()>;

    /// Waits for the most recent submission's fence. Returns `false` on
    /// timeout.
    fn wait_for_fence(&self, timeout_ns: u64) -> Result<bool>;
    /// Drains all queues.
    fn wait_idle(&self) -> Result<()>;

    //----------------------------------------------------------------------------------------------
    // Debug

    /// Best-effort; never fails, even on backends without object naming.
    fn set_debug_name(&self, resource: ResourceId, name: &str) {
        self.base().set_debug_name(resource, name)
    }

    //----------------------------------------------------------------------------------------------

    /// Destroys every resource still registered (render targets, pipelines,
    /// shaders, buffers, textures, then the swap chain) and releases the
    /// native device. After this only `state()` is meaningful.
    fn deinit(&mut self) -> Result<()>;
}

impl_downcast!(GraphicsDevice);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_state_machine() {
        let s = DeviceState::Uninitialised;
        assert!(s.ensure_live().is_err());
        let s = s.transition(DeviceEvent::Init).unwrap();
        assert_eq!(s, DeviceState::Live);
        assert!(s.ensure_live().is_ok());
        let s = s.transition(DeviceEvent::Lose).unwrap();
        assert_eq!(s.ensure_live().unwrap_err().kind, ErrorKind::DeviceLost);
        let s = s.transition(DeviceEvent::Destroy).unwrap();
        assert_eq!(s, DeviceState::Destroyed);
        assert!(s.transition(DeviceEvent::Init).is_err());
    }

    #[test]
    fn lost_device_cannot_reinit() {
        let s = DeviceState::Lost;
        assert!(s.transition(DeviceEvent::Init).is_err());
        assert!(s.transition(DeviceEvent::Destroy).is_ok());
    }
}
