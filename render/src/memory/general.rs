//! General-purpose allocator: wraps the host allocator with bookkeeping.

use fxhash::FxHashMap;
use std::sync::Arc;

use crate::error::{ErrorKind, GraphicsError, Result};
use crate::memory::{check_alignment, AllocatorKind, MemoryBlock, MemoryStats};

pub struct GeneralAllocator {
    /// Keyed by the block's `offset` field, which is just a handle here.
    allocations: FxHashMap<usize, Box<[u8]>>,
    next_id: usize,
    stats: Arc<MemoryStats>,
}

impl GeneralAllocator {
    pub fn new(stats: Arc<MemoryStats>) -> GeneralAllocator {
        GeneralAllocator {
            allocations: FxHashMap::default(),
            next_id: 1,
            stats,
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn alloc(&mut self, size: usize, align: usize) -> Result<MemoryBlock> {
        check_alignment(align)?;
        if size == 0 {
            return Ok(MemoryBlock::null(AllocatorKind::General));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.allocations.insert(id, vec![0; size].into_boxed_slice());
        self.stats.on_alloc(size);
        Ok(MemoryBlock::new(id, size, AllocatorKind::General))
    }

    pub fn free(&mut self, block: MemoryBlock) -> Result<()> {
        if block.is_null() {
            return Ok(());
        }
        block.ensure_unmapped()?;
        match self.allocations.remove(&block.offset) {
            Some(bytes) => {
                self.stats.on_free(bytes.len());
                Ok(())
            }
            None => Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block is not live in this allocator",
            )),
        }
    }

    pub fn map<'a>(&'a mut self, block: &mut MemoryBlock) -> Result<&'a mut [u8]> {
        if block.origin != AllocatorKind::General {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block does not belong to this allocator",
            ));
        }
        let bytes = self.allocations.get_mut(&block.offset).ok_or_else(|| {
            GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block is not live in this allocator",
            )
        })?;
        block.set_mapped()?;
        Ok(bytes)
    }
}

impl Drop for GeneralAllocator {
    fn drop(&mut self) {
        for (_, bytes) in self.allocations.drain() {
            self.stats.on_free(bytes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_accounting() {
        let stats = MemoryStats::new();
        let mut alloc = GeneralAllocator::new(stats.clone());
        let a = alloc.alloc(100, 8).unwrap();
        let b = alloc.alloc(50, 8).unwrap();
        assert_eq!(stats.live_bytes(), 150);
        alloc.free(a).unwrap();
        alloc.free(b).unwrap();
        assert_eq!(stats.live_bytes(), 0);
        assert_eq!(alloc.live_allocations(), 0);
    }

    #[test]
    fn double_free_detected() {
        let mut alloc = GeneralAllocator::new(MemoryStats::new());
        let a = alloc.alloc(10, 1).unwrap();
        let fake = MemoryBlock::new(a.offset, a.size, AllocatorKind::General);
        alloc.free(a).unwrap();
        assert_eq!(
            alloc.free(fake).unwrap_err().kind,
            ErrorKind::InvalidMemoryAccess
        );
    }

    #[test]
    fn drop_releases_outstanding_bytes() {
        let stats = MemoryStats::new();
        {
            let mut alloc = GeneralAllocator::new(stats.clone());
            let _leaked = alloc.alloc(64, 1).unwrap();
        }
        assert_eq!(stats.live_bytes(), 0);
    }
}
