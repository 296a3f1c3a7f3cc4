//! Fixed-block pool allocator with O(1) acquire and release.

use std::sync::Arc;

use crate::error::{ErrorKind, GraphicsError, Result};
use crate::memory::{AllocatorKind, MemoryBlock, MemoryStats};

pub struct PoolAllocator {
    storage: Vec<u8>,
    block_size: usize,
    free: Vec<u32>,
    live: usize,
    stats: Arc<MemoryStats>,
}

impl PoolAllocator {
    pub fn new(block_size: usize, block_count: usize, stats: Arc<MemoryStats>) -> PoolAllocator {
        assert!(block_size > 0 && block_count > 0);
        PoolAllocator {
            storage: vec![0; block_size * block_count],
            block_size,
            free: (0..block_count as u32).rev().collect(),
            live: 0,
            stats,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    pub fn live_blocks(&self) -> usize {
        self.live
    }

    /// Hands out one fixed-size block. O(1).
    pub fn acquire(&mut self) -> Result<MemoryBlock> {
        let index = self.free.pop().ok_or_else(|| {
            GraphicsError::new(
                ErrorKind::OutOfMemory,
                format!("pool of {}-byte blocks exhausted", self.block_size),
            )
        })?;
        self.live += 1;
        self.stats.on_alloc(self.block_size);
        Ok(MemoryBlock::new(
            index as usize * self.block_size,
            self.block_size,
            AllocatorKind::Pool,
        ))
    }

    /// Returns a block to the pool. O(1). The block must be unmapped.
    pub fn release(&mut self, block: MemoryBlock) -> Result<()> {
        if block.is_null() {
            return Ok(());
        }
        if block.origin != AllocatorKind::Pool || block.size != self.block_size {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block does not belong to this pool",
            ));
        }
        block.ensure_unmapped()?;
        let index = (block.offset / self.block_size) as u32;
        debug_assert!(!self.free.contains(&index), "double release of pool block");
        self.free.push(index);
        self.live -= 1;
        self.stats.on_free(self.block_size);
        Ok(())
    }

    pub fn map<'a>(&'a mut self, block: &mut MemoryBlock) -> Result<&'a mut [u8]> {
        if block.origin != AllocatorKind::Pool || block.offset + block.size > self.storage.len() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                "block does not belong to this pool",
            ));
        }
        block.set_mapped()?;
        Ok(&mut self.storage[block.offset..block.offset + block.size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_cycle() {
        let stats = MemoryStats::new();
        let mut pool = PoolAllocator::new(64, 4, stats.clone());
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.offset, b.offset);
        assert_eq!(pool.live_blocks(), 2);
        assert_eq!(stats.live_bytes(), 128);

        pool.release(a).unwrap();
        assert_eq!(pool.free_blocks(), 3);
        assert_eq!(stats.live_bytes(), 64);
        pool.release(b).unwrap();
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn exhaustion() {
        let mut pool = PoolAllocator::new(16, 2, MemoryStats::new());
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.acquire().unwrap_err().kind, ErrorKind::OutOfMemory);
    }

    #[test]
    fn release_requires_unmapped() {
        let mut pool = PoolAllocator::new(16, 2, MemoryStats::new());
        let mut block = pool.acquire().unwrap();
        pool.map(&mut block).unwrap();
        assert!(pool.release(block).is_err());
    }

    #[test]
    fn reuses_released_blocks() {
        let mut pool = PoolAllocator::new(16, 1, MemoryStats::new());
        let a = pool.acquire().unwrap();
        let offset = a.offset;
        pool.release(a).unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(b.offset, offset);
    }
}
