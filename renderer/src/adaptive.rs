//! The adaptive renderer: drives frames through whichever backend is
//! currently primary.

use std::sync::Arc;

use ember_render::command::CommandBuffer;
use ember_render::device::GraphicsDevice;
use ember_render::error::Result;
use ember_render::profiler::FrameRecord;

use crate::manager::BackendManager;

/// Per-frame payload: a backend-neutral draw closure. It receives the device
/// for resource work and a command buffer already in the recording state.
pub trait FramePayload {
    fn record(&mut self, device: &dyn GraphicsDevice, cb: &mut CommandBuffer) -> Result<()>;
}

impl<F> FramePayload for F
where
    F: FnMut(&dyn GraphicsDevice, &mut CommandBuffer) -> Result<()>,
{
    fn record(&mut self, device: &dyn GraphicsDevice, cb: &mut CommandBuffer) -> Result<()> {
        self(device, cb)
    }
}

/// Drives `render` calls against the manager's primary device, recovering
/// once per frame from swap chain loss or device loss.
pub struct AdaptiveRenderer {
    manager: Arc<BackendManager>,
}

impl AdaptiveRenderer {
    pub fn new(manager: Arc<BackendManager>) -> AdaptiveRenderer {
        AdaptiveRenderer { manager }
    }

    pub fn manager(&self) -> &Arc<BackendManager> {
        &self.manager
    }

    /// Renders one frame: acquire a command buffer, record the payload,
    /// submit, present.
    ///
    /// A recoverable failure (`SwapChainOutOfDate`, `DeviceLost`) hands
    /// recovery to the manager and retries the frame once; a second failure
    /// in the same call surfaces to the caller. The tick that failed
    /// produces no frame, which reads as a one-frame hiccup upstream.
    pub fn render(&self, payload: &mut dyn FramePayload) -> Result<FrameRecord> {
        // honour a pending switch request between frames
        if let Some(target) = self.manager.take_switch_request() {
            self.manager.switch_backend(target)?;
        }

        match self.render_once(payload) {
            Ok(record) => Ok(record),
            Err(e) if e.kind.is_recoverable() => {
                log::warn!("frame failed ({}); recovering and retrying once", e);
                self.manager.recover(e.kind)?;
                self.render_once(payload)
            }
            Err(e) => Err(e),
        }
    }

    fn render_once(&self, payload: &mut dyn FramePayload) -> Result<FrameRecord> {
        let device = self.manager.device();
        let device = device.as_ref();

        device.begin_frame()?;
        let result = (|| -> Result<()> {
            let mut cb = device.create_command_buffer()?;
            cb.begin()?;
            payload.record(device, &mut cb)?;
            cb.end()?;
            device.submit_command_buffer(&mut cb)?;
            device.present()
        })();
        // the profiler frame closes whether or not the frame made it out
        let record = device.end_frame();
        result?;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerOptions;
    use ember_render::renderpass::RenderPassDesc;
    use ember_render::BackendKind;

    fn software_manager() -> Arc<BackendManager> {
        let options = ManagerOptions {
            preferred_backend: Some(BackendKind::Software),
            ..ManagerOptions::default()
        };
        Arc::new(BackendManager::new(options).unwrap())
    }

    #[test]
    fn renders_a_frame_through_the_payload() {
        let manager = software_manager();
        manager
            .create_swap_chain(&ember_render::SwapchainDesc::new(320, 240))
            .unwrap();
        let renderer = AdaptiveRenderer::new(manager);

        let mut touched = 0;
        let mut payload = |device: &dyn GraphicsDevice, cb: &mut CommandBuffer| {
            touched += 1;
            let pass = device
                .create_render_pass(&RenderPassDesc::clear_swap_chain([0.0, 0.0, 0.0, 1.0]))?;
            cb.begin_render_pass(&pass)?;
            cb.end_render_pass()
        };
        let record = renderer.render(&mut payload).unwrap();
        assert_eq!(touched, 1);
        assert_eq!(record.unbalanced_markers, 0);
    }
}
