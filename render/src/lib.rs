//! Backend-agnostic graphics layer.
//!
//! This crate is the contract between a renderer and whatever GPU API the
//! host machine actually has: a [`GraphicsDevice`] trait with resource
//! factories, command recording and presentation, plus the infrastructure
//! every backend shares: resource registry, memory allocators, pipeline
//! cache, hierarchical profiler, and the error taxonomy.
//!
//! Concrete backends live in sibling crates (`ember-render-vk`,
//! `ember-render-gl`, `ember-render-soft`); selection, fallback and runtime
//! switching live in `ember-renderer`. Upper layers only ever see this
//! crate's types.

pub mod base;
pub mod buffer;
pub mod capability;
pub mod command;
pub mod device;
pub mod error;
pub mod format;
pub mod memory;
pub mod pipeline;
pub mod profiler;
pub mod registry;
pub mod renderpass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use self::base::BackendBase;
pub use self::buffer::{BufferDesc, BufferUsage, MemoryClass};
pub use self::capability::{BackendInfo, BackendKind, Capabilities};
pub use self::command::{
    CommandBuffer, CommandBufferState, CommandSink, DrawIndexedParams, DrawParams, ScissorRect,
    Viewport,
};
pub use self::device::{
    DeviceEvent, DeviceOptions, DeviceState, GlProcLoader, GraphicsDevice, WindowHandle,
};
pub use self::error::{ErrorKind, ErrorLog, ErrorRecord, GraphicsError, Result, Severity};
pub use self::format::{IndexFormat, TextureFormat, VertexFormat};
pub use self::pipeline::{
    BlendState, CompareOp, DepthStencilState, PipelineCache, PipelineDesc, PrimitiveTopology,
    VertexAttribute, VertexBufferLayout, VertexStepMode,
};
pub use self::profiler::{FrameRecord, MarkerCounters, Profiler};
pub use self::registry::{
    BufferId, PipelineId, RenderTargetId, ResourceId, ResourceRegistry, ResourceStats, SamplerId,
    ShaderId, TextureId,
};
pub use self::renderpass::{
    AttachmentOps, LoadOp, PassTarget, RenderPass, RenderPassDesc, RenderTargetDesc, StoreOp,
};
pub use self::shader::{
    CompileOptions, ShaderDesc, ShaderReflection, ShaderSource, ShaderStage, SourceKind,
};
pub use self::swapchain::{SwapchainDesc, SwapchainEvent, SwapchainState};
pub use self::sync::{ResourceBarrier, ResourceState, SubresourceRange};
pub use self::texture::{Filter, MipmapMode, SamplerAddressMode, SamplerDesc, TextureDesc, TextureUsage};
