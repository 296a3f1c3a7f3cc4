//! Fence-based frame timeline.

use std::collections::VecDeque;
use std::time::Duration;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;

struct SyncPoint {
    sync: GLsync,
    value: u64,
}

// GLsync is an opaque driver pointer; moving it between threads is allowed,
// waiting must happen with the context current.
unsafe impl Send for SyncPoint {}

/// Monotonic timeline over GL fence syncs: signal a value after a frame's
/// commands, client-wait to pace frames in flight.
pub struct Timeline {
    sync_points: VecDeque<SyncPoint>,
    current_value: u64,
}

impl Timeline {
    pub fn new(init_value: u64) -> Timeline {
        Timeline {
            sync_points: VecDeque::new(),
            current_value: init_value,
        }
    }

    pub fn signal(&mut self, gl: &Gl, value: u64) {
        let sync = unsafe { gl.FenceSync(gl::SYNC_GPU_COMMANDS_COMPLETE, 0) };
        self.sync_points.push_back(SyncPoint { sync, value });
    }

    pub fn reached(&self) -> u64 {
        self.current_value
    }

    /// Waits until `value` is reached. Returns false on timeout; panics are
    /// reserved for a wait that the driver reports as failed outright.
    pub fn client_sync(&mut self, gl: &Gl, value: u64, timeout: Duration) -> bool {
        while self.current_value < value {
            let target = match self.sync_points.front() {
                Some(target) => target,
                // nothing pending: the value can never be reached, which
                // only happens when signal/wait got out of step
                None => return false,
            };
            let timeout_ns = timeout.as_nanos().min(u128::from(u64::MAX)) as u64;
            let wait_result = unsafe {
                gl.ClientWaitSync(target.sync, gl::SYNC_FLUSH_COMMANDS_BIT, timeout_ns)
            };
            if wait_result == gl::CONDITION_SATISFIED || wait_result == gl::ALREADY_SIGNALED {
                self.current_value = target.value;
            } else {
                // WAIT_FAILED or timeout
                return false;
            }

            let sp = self.sync_points.pop_front().unwrap();
            unsafe {
                gl.DeleteSync(sp.sync);
            }
        }
        true
    }

    pub fn destroy(&mut self, gl: &Gl) {
        while let Some(sp) = self.sync_points.pop_front() {
            unsafe {
                gl.DeleteSync(sp.sync);
            }
        }
    }
}
