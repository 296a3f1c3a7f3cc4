//! Barrier, fence and semaphore descriptors.
//!
//! These are the backend-neutral synchronisation vocabulary: backends with
//! explicit transitions (Vulkan, D3D12) map them to native barriers; the
//! OpenGL family and the software rasteriser treat transitions as identity.

use crate::registry::ResourceId;

/// Logical state a resource can be in, from the command stream's point of
/// view.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum ResourceState {
    /// No defined contents or usage yet.
    Undefined,
    /// Readable from any shader stage.
    ShaderRead,
    /// Bound as a color render target.
    RenderTarget,
    /// Bound as a depth/stencil target.
    DepthStencil,
    /// Source of a transfer operation.
    TransferSrc,
    /// Destination of a transfer operation.
    TransferDst,
    /// Presentable on the swap chain.
    Present,
    /// Anything; the backend inserts full barriers.
    General,
}

/// Subresource selection for a barrier. `None` ranges cover everything.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: Option<u32>,
    pub base_layer: u32,
    pub layer_count: Option<u32>,
}

impl SubresourceRange {
    pub const ALL: SubresourceRange = SubresourceRange {
        base_mip: 0,
        mip_count: None,
        base_layer: 0,
        layer_count: None,
    };
}

/// One resource transition, recorded into a command buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResourceBarrier {
    pub resource: ResourceId,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
    pub subresource: SubresourceRange,
}

impl ResourceBarrier {
    pub fn transition(
        resource: ResourceId,
        old_state: ResourceState,
        new_state: ResourceState,
    ) -> ResourceBarrier {
        ResourceBarrier {
            resource,
            old_state,
            new_state,
            subresource: SubresourceRange::ALL,
        }
    }

    /// Identical states need no work on any backend.
    pub fn is_noop(&self) -> bool {
        self.old_state == self.new_state
    }
}

//--------------------------------------------------------------------------------------------------

/// Description of a fence: CPU-visible completion of GPU work.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FenceDesc {
    pub signaled: bool,
}

/// Description of a semaphore: GPU-to-GPU ordering between queue submissions.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SemaphoreDesc {
    /// Timeline semaphores carry a monotonically increasing value; binary
    /// semaphores toggle.
    pub timeline: bool,
    pub initial_value: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ResourceId, TextureId};
    use slotmap::SlotMap;

    #[test]
    fn same_state_transition_is_noop() {
        let mut map: SlotMap<TextureId, ()> = SlotMap::with_key();
        let id = ResourceId::Texture(map.insert(()));
        let barrier =
            ResourceBarrier::transition(id, ResourceState::ShaderRead, ResourceState::ShaderRead);
        assert!(barrier.is_noop());
        let barrier =
            ResourceBarrier::transition(id, ResourceState::ShaderRead, ResourceState::RenderTarget);
        assert!(!barrier.is_noop());
    }
}
