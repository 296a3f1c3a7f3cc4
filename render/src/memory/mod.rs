//! Host-side allocator strategies and memory accounting.
//!
//! Three host strategies (linear, pool, general) hand out opaque
//! [`MemoryBlock`]s over storage they own; device-local memory is allocated
//! by each backend's native allocator and only accounted for here, through
//! [`DeviceLocalTracker`]. All allocators feed a shared [`MemoryStats`] so
//! `total_allocated − total_freed` always equals live bytes.

pub mod general;
pub mod linear;
pub mod pool;

pub use self::general::GeneralAllocator;
pub use self::linear::LinearAllocator;
pub use self::pool::PoolAllocator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ErrorKind, GraphicsError, Result};

/// Which strategy produced a block.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AllocatorKind {
    Linear,
    Pool,
    General,
    DeviceLocal,
}

/// Opaque record of one allocation.
///
/// A block can be mapped at most once at a time and must be unmapped before
/// it is freed. Unmapping is idempotent. The zero-sized null block is a valid
/// result of a zero-byte allocation and is safe to free on any allocator.
#[derive(Debug)]
pub struct MemoryBlock {
    pub offset: usize,
    pub size: usize,
    pub origin: AllocatorKind,
    mapped: bool,
}

/// Offset value marking the null block.
const NULL_OFFSET: usize = usize::MAX;

impl MemoryBlock {
    pub(crate) fn new(offset: usize, size: usize, origin: AllocatorKind) -> MemoryBlock {
        MemoryBlock {
            offset,
            size,
            origin,
            mapped: false,
        }
    }

    /// The distinguished result of a zero-sized allocation.
    pub fn null(origin: AllocatorKind) -> MemoryBlock {
        MemoryBlock {
            offset: NULL_OFFSET,
            size: 0,
            origin,
            mapped: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.offset == NULL_OFFSET && self.size == 0
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub(crate) fn set_mapped(&mut self) -> Result<()> {
        if self.is_null() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "cannot map the null block",
            ));
        }
        if self.mapped {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block is already mapped",
            ));
        }
        self.mapped = true;
        Ok(())
    }

    /// Idempotent.
    pub fn unmap(&mut self) {
        self.mapped = false;
    }

    pub(crate) fn ensure_unmapped(&self) -> Result<()> {
        if self.mapped {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "block must be unmapped before it is freed",
            ));
        }
        Ok(())
    }
}

pub(crate) fn check_alignment(align: usize) -> Result<()> {
    if align == 0 || !align.is_power_of_two() {
        return Err(GraphicsError::new(
            ErrorKind::InvalidAlignment,
            format!("alignment {} is not a power of two", align),
        ));
    }
    Ok(())
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

//--------------------------------------------------------------------------------------------------

/// Shared allocation accounting. Lock-free: monotonic counters only.
#[derive(Debug, Default)]
pub struct MemoryStats {
    total_allocated: AtomicU64,
    total_freed: AtomicU64,
    allocation_count: AtomicU64,
}

impl MemoryStats {
    pub fn new() -> Arc<MemoryStats> {
        Arc::new(MemoryStats::default())
    }

    pub(crate) fn on_alloc(&self, bytes: usize) {
        self.total_allocated.fetch_add(bytes as u64, Ordering::AcqRel);
        self.allocation_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn on_free(&self, bytes: usize) {
        self.total_freed.fetch_add(bytes as u64, Ordering::AcqRel);
    }

    pub fn total_allocated(&self) -> u64 {
        self.total_allocated.load(Ordering::Acquire)
    }

    pub fn total_freed(&self) -> u64 {
        self.total_freed.load(Ordering::Acquire)
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.load(Ordering::Acquire)
    }

    /// `total_allocated − total_freed`.
    pub fn live_bytes(&self) -> u64 {
        self.total_allocated() - self.total_freed()
    }
}

/// Accounting shim for backend-native device memory. The backend calls
/// [`on_alloc`](DeviceLocalTracker::on_alloc) / [`on_free`](DeviceLocalTracker::on_free)
/// around its native allocator so device memory shows up in the shared
/// totals.
#[derive(Debug, Clone)]
pub struct DeviceLocalTracker {
    stats: Arc<MemoryStats>,
}

impl DeviceLocalTracker {
    pub fn new(stats: Arc<MemoryStats>) -> DeviceLocalTracker {
        DeviceLocalTracker { stats }
    }

    pub fn on_alloc(&self, bytes: u64) -> MemoryBlock {
        if bytes == 0 {
            return MemoryBlock::null(AllocatorKind::DeviceLocal);
        }
        self.stats.on_alloc(bytes as usize);
        MemoryBlock::new(0, bytes as usize, AllocatorKind::DeviceLocal)
    }

    pub fn on_free(&self, block: MemoryBlock) {
        if !block.is_null() {
            self.stats.on_free(block.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_block_roundtrip() {
        let stats = MemoryStats::new();
        let tracker = DeviceLocalTracker::new(stats.clone());
        let block = tracker.on_alloc(0);
        assert!(block.is_null());
        tracker.on_free(block);
        assert_eq!(stats.live_bytes(), 0);
        assert_eq!(stats.allocation_count(), 0);
    }

    #[test]
    fn device_local_accounting() {
        let stats = MemoryStats::new();
        let tracker = DeviceLocalTracker::new(stats.clone());
        let a = tracker.on_alloc(1024);
        let b = tracker.on_alloc(512);
        assert_eq!(stats.live_bytes(), 1536);
        tracker.on_free(a);
        assert_eq!(stats.live_bytes(), 512);
        tracker.on_free(b);
        assert_eq!(stats.total_allocated(), stats.total_freed());
    }

    #[test]
    fn map_discipline() {
        let mut block = MemoryBlock::new(0, 64, AllocatorKind::General);
        block.set_mapped().unwrap();
        assert!(block.set_mapped().is_err());
        assert!(block.ensure_unmapped().is_err());
        block.unmap();
        block.unmap(); // idempotent
        assert!(block.ensure_unmapped().is_ok());
    }

    #[test]
    fn alignment_checks() {
        assert!(check_alignment(16).is_ok());
        assert!(check_alignment(0).is_err());
        assert!(check_alignment(24).is_err());
        assert_eq!(align_up(13, 8), 16);
        assert_eq!(align_up(16, 8), 16);
    }
}
