//! Shared per-device state embedded by every concrete backend.
//!
//! A backend struct is its native API state plus one [`BackendBase`]: the
//! registry, profiler, error log, pipeline cache, memory accounting and
//! debug-group stack all live here, behind the guards the concurrency model
//! requires, together with convenience wrappers so backend code stays thin.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::capability::{BackendInfo, Capabilities};
use crate::device::{DeviceEvent, DeviceState};
use crate::error::{ErrorKind, ErrorLog, Result, Severity};
use crate::memory::{DeviceLocalTracker, LinearAllocator, MemoryStats};
use crate::pipeline::PipelineCache;
use crate::profiler::{FrameRecord, Profiler};
use crate::registry::{
    BufferHandle, ResourceId, ResourceRegistry, ResourceStats, TextureHandle, TextureId,
};
use crate::buffer::BufferDesc;
use crate::registry::BufferId;
use crate::texture::TextureDesc;

/// Staging slab size; matches the upload budget of a couple of full-screen
/// texture updates.
pub const DEFAULT_STAGING_CAPACITY: usize = 4 * 1024 * 1024;

pub struct BackendBase {
    pub info: BackendInfo,
    pub capabilities: Capabilities,
    pub registry: Mutex<ResourceRegistry>,
    pub pipeline_cache: PipelineCache,
    pub profiler: Mutex<Profiler>,
    /// Shared so backend-owned callbacks (driver debug relays) can file
    /// records after `BackendBase` has moved into its device.
    pub errors: Arc<ErrorLog>,
    pub memory_stats: Arc<MemoryStats>,
    pub device_local: DeviceLocalTracker,
    /// Frame-scoped staging memory for update paths that cannot write the
    /// destination directly.
    pub staging: Mutex<LinearAllocator>,
    /// Mirrors the command stream's debug groups at execution time; tags
    /// profiler markers and backend annotations together.
    pub debug_groups: Mutex<SmallVec<[String; 8]>>,
    state: Mutex<DeviceState>,
    dimensions: Mutex<(u32, u32)>,
    vsync: AtomicBool,
    next_command_buffer_id: AtomicU64,
}

impl BackendBase {
    pub fn new(info: BackendInfo, capabilities: Capabilities, debug_mode: bool) -> BackendBase {
        let memory_stats = MemoryStats::new();
        BackendBase {
            errors: Arc::new(ErrorLog::new(info.kind, debug_mode)),
            device_local: DeviceLocalTracker::new(memory_stats.clone()),
            info,
            capabilities,
            registry: Mutex::new(ResourceRegistry::new()),
            pipeline_cache: PipelineCache::new(),
            profiler: Mutex::new(Profiler::new()),
            staging: Mutex::new(LinearAllocator::new(
                DEFAULT_STAGING_CAPACITY,
                memory_stats.clone(),
            )),
            memory_stats,
            debug_groups: Mutex::new(SmallVec::new()),
            state: Mutex::new(DeviceState::Uninitialised),
            dimensions: Mutex::new((0, 0)),
            vsync: AtomicBool::new(true),
            next_command_buffer_id: AtomicU64::new(1),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Device state

    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    pub fn transition(&self, event: DeviceEvent) -> Result<()> {
        let mut state = self.state.lock();
        *state = state.transition(event)?;
        Ok(())
    }

    /// Every operation except `deinit` goes through this gate.
    pub fn ensure_live(&self) -> Result<()> {
        self.state.lock().ensure_live()
    }

    //----------------------------------------------------------------------------------------------
    // Dimensions / vsync

    pub fn dimensions(&self) -> (u32, u32) {
        *self.dimensions.lock()
    }

    pub fn set_dimensions(&self, width: u32, height: u32) {
        *self.dimensions.lock() = (width, height);
    }

    pub fn vsync(&self) -> bool {
        self.vsync.load(Ordering::Relaxed)
    }

    pub fn set_vsync(&self, vsync: bool) {
        self.vsync.store(vsync, Ordering::Relaxed)
    }

    pub fn next_command_buffer_id(&self) -> u64 {
        self.next_command_buffer_id.fetch_add(1, Ordering::Relaxed)
    }

    //----------------------------------------------------------------------------------------------
    // Frame boundaries

    pub fn begin_frame(&self) -> Result<()> {
        self.ensure_live()?;
        self.profiler.lock().begin_frame()
    }

    pub fn end_frame(&self) -> Result<FrameRecord> {
        self.ensure_live()?;
        // lock order: debug_groups strictly before profiler
        {
            let mut groups = self.debug_groups.lock();
            if !groups.is_empty() {
                self.errors.record(
                    Severity::Warning,
                    ErrorKind::InvalidOperation,
                    format!("{} debug group(s) left open at end of frame", groups.len()),
                );
                groups.clear();
            }
        }
        let mut profiler = self.profiler.lock();
        if !profiler.frame_open() {
            return self.errors.fail(
                Severity::Error,
                ErrorKind::InvalidOperation,
                "end_frame without a matching begin_frame",
            );
        }
        let mut record = profiler.end_frame()?;
        record.counters.memory_used = self.memory_stats.live_bytes();
        Ok(record)
    }

    //----------------------------------------------------------------------------------------------
    // Profiler / debug groups

    pub fn push_marker(&self, name: &str) {
        let mut profiler = self.profiler.lock();
        if profiler.frame_open() {
            let _ = profiler.push_marker(name);
        }
    }

    pub fn pop_marker(&self) {
        let mut profiler = self.profiler.lock();
        if profiler.frame_open() {
            let _ = profiler.pop_marker();
        }
    }

    /// Called by backends while executing a `begin_debug_group` command.
    pub fn enter_debug_group(&self, name: &str) {
        self.debug_groups.lock().push(name.to_owned());
        self.push_marker(name);
    }

    /// Called by backends while executing an `end_debug_group` command.
    pub fn leave_debug_group(&self) {
        let popped = self.debug_groups.lock().pop();
        if popped.is_some() {
            self.pop_marker();
        }
    }

    //----------------------------------------------------------------------------------------------
    // Errors

    #[track_caller]
    pub fn log_error(&self, severity: Severity, kind: ErrorKind, message: impl Into<String>) {
        self.errors.record(severity, kind, message)
    }

    //----------------------------------------------------------------------------------------------
    // Registry wrappers

    pub fn register_texture(&self, desc: TextureDesc, handle: Box<dyn TextureHandle>) -> TextureId {
        self.registry.lock().register_texture(desc, handle)
    }

    pub fn register_buffer(&self, desc: BufferDesc, handle: Box<dyn BufferHandle>) -> BufferId {
        self.registry.lock().register_buffer(desc, handle)
    }

    pub fn resource_stats(&self) -> ResourceStats {
        self.registry.lock().stats()
    }

    pub fn contains_resource(&self, id: ResourceId) -> bool {
        self.registry.lock().contains(id)
    }

    pub fn set_debug_name(&self, id: ResourceId, name: &str) {
        self.registry.lock().set_name(id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::BackendKind;

    fn base() -> BackendBase {
        BackendBase::new(
            BackendInfo::new(BackendKind::Software),
            Capabilities::BASELINE,
            true,
        )
    }

    #[test]
    fn frame_gate_requires_live_device() {
        let base = base();
        assert_eq!(
            base.begin_frame().unwrap_err().kind,
            ErrorKind::InvalidOperation
        );
        base.transition(DeviceEvent::Init).unwrap();
        base.begin_frame().unwrap();
        base.end_frame().unwrap();
    }

    #[test]
    fn debug_groups_tag_profiler_markers() {
        let base = base();
        base.transition(DeviceEvent::Init).unwrap();
        base.begin_frame().unwrap();
        base.enter_debug_group("shadow pass");
        base.leave_debug_group();
        let record = base.end_frame().unwrap();
        // root + the group marker
        assert_eq!(record.marker_count, 2);
        assert!(base.debug_groups.lock().is_empty());
    }

    #[test]
    fn end_frame_reports_memory_used() {
        let base = base();
        base.transition(DeviceEvent::Init).unwrap();
        let block = base.device_local.on_alloc(4096);
        base.begin_frame().unwrap();
        let record = base.end_frame().unwrap();
        assert_eq!(record.counters.memory_used, 4096);
        base.device_local.on_free(block);
    }
}
