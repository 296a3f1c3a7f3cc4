//! Frame-scoped linear allocator.
//!
//! Bumps a head pointer through one backing slab; individual blocks are not
//! freed, the whole tail is released at once by resetting to a marker taken
//! earlier (typically at frame start).

use std::sync::Arc;

use crate::error::{ErrorKind, GraphicsError, Result};
use crate::memory::{align_up, check_alignment, AllocatorKind, MemoryBlock, MemoryStats};

/// Position in the linear stream, taken with [`LinearAllocator::marker`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinearMarker(usize);

pub struct LinearAllocator {
    storage: Vec<u8>,
    head: usize,
    stats: Arc<MemoryStats>,
}

impl LinearAllocator {
    pub fn new(capacity: usize, stats: Arc<MemoryStats>) -> LinearAllocator {
        LinearAllocator {
            storage: vec![0; capacity],
            head: 0,
            stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn used(&self) -> usize {
        self.head
    }

    pub fn alloc(&mut self, size: usize, align: usize) -> Result<MemoryBlock> {
        check_alignment(align)?;
        if size == 0 {
            return Ok(MemoryBlock::null(AllocatorKind::Linear));
        }
        let offset = align_up(self.head, align);
        let end = offset.checked_add(size).ok_or_else(|| {
            GraphicsError::new(ErrorKind::AllocationFailed, "allocation size overflow")
        })?;
        if end > self.storage.len() {
            return Err(GraphicsError::new(
                ErrorKind::OutOfMemory,
                format!(
                    "linear allocator exhausted: {} of {} bytes used, {} requested",
                    self.head,
                    self.storage.len(),
                    size
                ),
            ));
        }
        self.head = end;
        self.stats.on_alloc(size);
        Ok(MemoryBlock::new(offset, size, AllocatorKind::Linear))
    }

    /// Maps the block's bytes. Fails when the block is already mapped or was
    /// invalidated by a reset.
    pub fn map<'a>(&'a mut self, block: &mut MemoryBlock) -> Result<&'a mut [u8]> {
        if block.origin != AllocatorKind::Linear {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block does not belong to this allocator",
            ));
        }
        if block.offset + block.size > self.head {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block was reclaimed by a reset",
            ));
        }
        block.set_mapped()?;
        Ok(&mut self.storage[block.offset..block.offset + block.size])
    }

    pub fn marker(&self) -> LinearMarker {
        LinearMarker(self.head)
    }

    /// Releases everything allocated after `marker`.
    pub fn reset_to(&mut self, marker: LinearMarker) {
        debug_assert!(marker.0 <= self.head);
        let released = self.head.saturating_sub(marker.0);
        if released > 0 {
            self.stats.on_free(released);
        }
        self.head = marker.0.min(self.head);
    }

    /// Releases everything.
    pub fn reset(&mut self) {
        self.reset_to(LinearMarker(0))
    }
}

impl Drop for LinearAllocator {
    fn drop(&mut self) {
        // outstanding bytes count as freed once the slab goes away
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_and_reset() {
        let stats = MemoryStats::new();
        let mut alloc = LinearAllocator::new(1024, stats.clone());

        let frame_start = alloc.marker();
        let a = alloc.alloc(100, 16).unwrap();
        let b = alloc.alloc(100, 16).unwrap();
        assert_eq!(a.offset % 16, 0);
        assert_eq!(b.offset % 16, 0);
        assert!(b.offset >= a.offset + 100);
        assert_eq!(stats.live_bytes(), 200);

        alloc.reset_to(frame_start);
        assert_eq!(alloc.used(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn exhaustion_is_out_of_memory() {
        let mut alloc = LinearAllocator::new(64, MemoryStats::new());
        alloc.alloc(64, 1).unwrap();
        let err = alloc.alloc(1, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfMemory);
    }

    #[test]
    fn zero_sized_alloc_is_null() {
        let mut alloc = LinearAllocator::new(64, MemoryStats::new());
        let block = alloc.alloc(0, 4).unwrap();
        assert!(block.is_null());
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn map_after_reset_fails() {
        let mut alloc = LinearAllocator::new(64, MemoryStats::new());
        let mut block = alloc.alloc(16, 4).unwrap();
        alloc.reset();
        assert!(alloc.map(&mut block).is_err());
    }

    #[test]
    fn map_write_readback() {
        let mut alloc = LinearAllocator::new(64, MemoryStats::new());
        let mut block = alloc.alloc(4, 4).unwrap();
        {
            let bytes = alloc.map(&mut block).unwrap();
            bytes.copy_from_slice(&[1, 2, 3, 4]);
        }
        block.unmap();
        let bytes = alloc.map(&mut block).unwrap();
        assert_eq!(bytes, &[1, 2, 3, 4]);
    }
}
