//! Buffer descriptors.

use bitflags::bitflags;

use crate::error::{ErrorKind, GraphicsError, Result};

bitflags! {
    /// Ways a buffer may be used. Monotonic: once set at creation, never
    /// cleared.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX       = 0b0000_0001;
        const INDEX        = 0b0000_0010;
        const UNIFORM      = 0b0000_0100;
        const STORAGE      = 0b0000_1000;
        const TRANSFER_SRC = 0b0001_0000;
        const TRANSFER_DST = 0b0010_0000;
        const INDIRECT     = 0b0100_0000;
    }
}

/// Which memory a buffer lives in and how the host may reach it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemoryClass {
    /// Fastest for the GPU; not host-mappable. Updates go through staging.
    DeviceLocal,
    /// Host-mappable; flushes may be required.
    HostVisible,
    /// Host-mappable and coherent; no explicit flushes.
    HostCoherent,
    /// Host-mappable, cached for readback.
    HostCached,
}

impl MemoryClass {
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryClass::DeviceLocal)
    }
}

/// Description of a buffer to create.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryClass,
    pub debug_name: Option<String>,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage) -> BufferDesc {
        BufferDesc {
            size,
            usage,
            memory: MemoryClass::DeviceLocal,
            debug_name: None,
        }
    }

    pub fn host_visible(mut self) -> BufferDesc {
        self.memory = MemoryClass::HostVisible;
        self
    }

    pub fn with_memory(mut self, memory: MemoryClass) -> BufferDesc {
        self.memory = memory;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> BufferDesc {
        self.debug_name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "buffer size must be greater than zero",
            ));
        }
        if self.usage.is_empty() {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "buffer must declare at least one usage",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_buffer() {
        let desc = BufferDesc::new(0, BufferUsage::VERTEX);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn host_visibility() {
        assert!(!MemoryClass::DeviceLocal.is_host_visible());
        assert!(MemoryClass::HostVisible.is_host_visible());
        assert!(MemoryClass::HostCoherent.is_host_visible());
        assert!(MemoryClass::HostCached.is_host_visible());
    }
}
