//! The device-owned index of live GPU resources.
//!
//! Every resource a device creates is registered here under a versioned key
//! before the caller sees it, and unregistered before its native handle is
//! released, so teardown iteration always sees a monotonically shrinking set.
//! Keys are slotmap keys: a destroyed key's slot may be reused but the version
//! differs, so a stale id never resolves within one device lifetime.

use downcast_rs::{impl_downcast, Downcast};
use slotmap::{new_key_type, SlotMap};
use std::fmt::Debug;

use crate::buffer::BufferDesc;
use crate::pipeline::PipelineDesc;
use crate::renderpass::RenderTargetDesc;
use crate::shader::{ShaderReflection, ShaderStage, SourceKind};
use crate::texture::{SamplerDesc, TextureDesc};

new_key_type! {
    pub struct TextureId;
    pub struct BufferId;
    pub struct ShaderId;
    pub struct PipelineId;
    pub struct RenderTargetId;
    pub struct SamplerId;
}

/// Any registry key, for operations that work across resource kinds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceId {
    Texture(TextureId),
    Buffer(BufferId),
    Shader(ShaderId),
    Pipeline(PipelineId),
    RenderTarget(RenderTargetId),
    Sampler(SamplerId),
}

//--------------------------------------------------------------------------------------------------
// Backend-private payloads.
//
// Native API handles never cross the device boundary: each backend attaches
// its own payload type and recovers it by downcast. The payloads are only
// required to be destroyable by their owning backend.

pub trait TextureHandle: Downcast + Debug + Send + Sync {}
pub trait BufferHandle: Downcast + Debug + Send + Sync {}
pub trait ShaderHandle: Downcast + Debug + Send + Sync {}
pub trait PipelineHandle: Downcast + Debug + Send + Sync {}
pub trait RenderTargetHandle: Downcast + Debug + Send + Sync {}
pub trait SamplerHandle: Downcast + Debug + Send + Sync {}

impl_downcast!(TextureHandle);
impl_downcast!(BufferHandle);
impl_downcast!(ShaderHandle);
impl_downcast!(PipelineHandle);
impl_downcast!(RenderTargetHandle);
impl_downcast!(SamplerHandle);

//--------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct TextureRecord {
    pub desc: TextureDesc,
    pub name: Option<String>,
    pub handle: Box<dyn TextureHandle>,
}

#[derive(Debug)]
pub struct BufferRecord {
    pub desc: BufferDesc,
    pub name: Option<String>,
    pub handle: Box<dyn BufferHandle>,
}

#[derive(Debug)]
pub struct ShaderRecord {
    pub stage: ShaderStage,
    pub kind: SourceKind,
    pub entry_point: String,
    pub reflection: Option<ShaderReflection>,
    pub name: Option<String>,
    pub handle: Box<dyn ShaderHandle>,
}

#[derive(Debug)]
pub struct PipelineRecord {
    pub desc: PipelineDesc,
    pub cache_key: u64,
    pub name: Option<String>,
    pub handle: Box<dyn PipelineHandle>,
}

#[derive(Debug)]
pub struct RenderTargetRecord {
    pub desc: RenderTargetDesc,
    /// Textures owned by this target; destroyed with it.
    pub color_textures: Vec<TextureId>,
    pub depth_texture: Option<TextureId>,
    pub name: Option<String>,
    pub handle: Box<dyn RenderTargetHandle>,
}

#[derive(Debug)]
pub struct SamplerRecord {
    pub desc: SamplerDesc,
    pub name: Option<String>,
    pub handle: Box<dyn SamplerHandle>,
}

/// O(1) snapshot of registry contents.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceStats {
    pub textures: usize,
    pub buffers: usize,
    pub shaders: usize,
    pub pipelines: usize,
    pub render_targets: usize,
    pub samplers: usize,
    pub texture_bytes: u64,
    pub buffer_bytes: u64,
}

impl ResourceStats {
    pub fn total_resources(&self) -> usize {
        self.textures
            + self.buffers
            + self.shaders
            + self.pipelines
            + self.render_targets
            + self.samplers
    }

    pub fn total_bytes(&self) -> u64 {
        self.texture_bytes + self.buffer_bytes
    }
}

//--------------------------------------------------------------------------------------------------

/// Identity-keyed maps of live resources, one per kind.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    textures: SlotMap<TextureId, TextureRecord>,
    buffers: SlotMap<BufferId, BufferRecord>,
    shaders: SlotMap<ShaderId, ShaderRecord>,
    pipelines: SlotMap<PipelineId, PipelineRecord>,
    render_targets: SlotMap<RenderTargetId, RenderTargetRecord>,
    samplers: SlotMap<SamplerId, SamplerRecord>,
    texture_bytes: u64,
    buffer_bytes: u64,
}

impl ResourceRegistry {
    pub fn new() -> ResourceRegistry {
        ResourceRegistry::default()
    }

    //----------------------------------------------------------------------------------------------
    // Registration

    pub fn register_texture(&mut self, desc: TextureDesc, handle: Box<dyn TextureHandle>) -> TextureId {
        self.texture_bytes += desc.byte_size();
        let name = desc.debug_name.clone();
        self.textures.insert(TextureRecord { desc, name, handle })
    }

    pub fn register_buffer(&mut self, desc: BufferDesc, handle: Box<dyn BufferHandle>) -> BufferId {
        self.buffer_bytes += desc.size;
        let name = desc.debug_name.clone();
        self.buffers.insert(BufferRecord { desc, name, handle })
    }

    pub fn register_shader(&mut self, record: ShaderRecord) -> ShaderId {
        self.shaders.insert(record)
    }

    pub fn register_pipeline(&mut self, record: PipelineRecord) -> PipelineId {
        self.pipelines.insert(record)
    }

    pub fn register_render_target(&mut self, record: RenderTargetRecord) -> RenderTargetId {
        self.render_targets.insert(record)
    }

    pub fn register_sampler(&mut self, desc: SamplerDesc, handle: Box<dyn SamplerHandle>) -> SamplerId {
        self.samplers.insert(SamplerRecord {
            desc,
            name: None,
            handle,
        })
    }

    //----------------------------------------------------------------------------------------------
    // Lookup

    pub fn texture(&self, id: TextureId) -> Option<&TextureRecord> {
        self.textures.get(id)
    }

    pub fn buffer(&self, id: BufferId) -> Option<&BufferRecord> {
        self.buffers.get(id)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut BufferRecord> {
        self.buffers.get_mut(id)
    }

    pub fn texture_mut(&mut self, id: TextureId) -> Option<&mut TextureRecord> {
        self.textures.get_mut(id)
    }

    pub fn shader(&self, id: ShaderId) -> Option<&ShaderRecord> {
        self.shaders.get(id)
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&PipelineRecord> {
        self.pipelines.get(id)
    }

    pub fn render_target(&self, id: RenderTargetId) -> Option<&RenderTargetRecord> {
        self.render_targets.get(id)
    }

    pub fn sampler(&self, id: SamplerId) -> Option<&SamplerRecord> {
        self.samplers.get(id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        match id {
            ResourceId::Texture(id) => self.textures.contains_key(id),
            ResourceId::Buffer(id) => self.buffers.contains_key(id),
            ResourceId::Shader(id) => self.shaders.contains_key(id),
            ResourceId::Pipeline(id) => self.pipelines.contains_key(id),
            ResourceId::RenderTarget(id) => self.render_targets.contains_key(id),
            ResourceId::Sampler(id) => self.samplers.contains_key(id),
        }
    }

    /// O(n) debug-name search across all kinds.
    pub fn find_by_name(&self, name: &str) -> Option<ResourceId> {
        let matches = |n: &Option<String>| n.as_deref() == Some(name);
        if let Some((id, _)) = self.textures.iter().find(|(_, r)| matches(&r.name)) {
            return Some(ResourceId::Texture(id));
        }
        if let Some((id, _)) = self.buffers.iter().find(|(_, r)| matches(&r.name)) {
            return Some(ResourceId::Buffer(id));
        }
        if let Some((id, _)) = self.shaders.iter().find(|(_, r)| matches(&r.name)) {
            return Some(ResourceId::Shader(id));
        }
        if let Some((id, _)) = self.pipelines.iter().find(|(_, r)| matches(&r.name)) {
            return Some(ResourceId::Pipeline(id));
        }
        if let Some((id, _)) = self.render_targets.iter().find(|(_, r)| matches(&r.name)) {
            return Some(ResourceId::RenderTarget(id));
        }
        if let Some((id, _)) = self.samplers.iter().find(|(_, r)| matches(&r.name)) {
            return Some(ResourceId::Sampler(id));
        }
        None
    }

    /// Renames a live resource. No-op when the id is stale.
    pub fn set_name(&mut self, id: ResourceId, name: &str) {
        match id {
            ResourceId::Texture(id) => {
                if let Some(r) = self.textures.get_mut(id) {
                    r.name = Some(name.to_owned());
                }
            }
            ResourceId::Buffer(id) => {
                if let Some(r) = self.buffers.get_mut(id) {
                    r.name = Some(name.to_owned());
                }
            }
            ResourceId::Shader(id) => {
                if let Some(r) = self.shaders.get_mut(id) {
                    r.name = Some(name.to_owned());
                }
            }
            ResourceId::Pipeline(id) => {
                if let Some(r) = self.pipelines.get_mut(id) {
                    r.name = Some(name.to_owned());
                }
            }
            ResourceId::RenderTarget(id) => {
                if let Some(r) = self.render_targets.get_mut(id) {
                    r.name = Some(name.to_owned());
                }
            }
            ResourceId::Sampler(id) => {
                if let Some(r) = self.samplers.get_mut(id) {
                    r.name = Some(name.to_owned());
                }
            }
        }
    }

    pub fn name_of(&self, id: ResourceId) -> Option<&str> {
        match id {
            ResourceId::Texture(id) => self.textures.get(id)?.name.as_deref(),
            ResourceId::Buffer(id) => self.buffers.get(id)?.name.as_deref(),
            ResourceId::Shader(id) => self.shaders.get(id)?.name.as_deref(),
            ResourceId::Pipeline(id) => self.pipelines.get(id)?.name.as_deref(),
            ResourceId::RenderTarget(id) => self.render_targets.get(id)?.name.as_deref(),
            ResourceId::Sampler(id) => self.samplers.get(id)?.name.as_deref(),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Unregistration. The record is handed back so the backend can release
    // the native handle after the registry no longer knows the resource.

    pub fn unregister_texture(&mut self, id: TextureId) -> Option<TextureRecord> {
        let record = self.textures.remove(id)?;
        self.texture_bytes -= record.desc.byte_size();
        Some(record)
    }

    pub fn unregister_buffer(&mut self, id: BufferId) -> Option<BufferRecord> {
        let record = self.buffers.remove(id)?;
        self.buffer_bytes -= record.desc.size;
        Some(record)
    }

    pub fn unregister_shader(&mut self, id: ShaderId) -> Option<ShaderRecord> {
        self.shaders.remove(id)
    }

    pub fn unregister_pipeline(&mut self, id: PipelineId) -> Option<PipelineRecord> {
        self.pipelines.remove(id)
    }

    pub fn unregister_render_target(&mut self, id: RenderTargetId) -> Option<RenderTargetRecord> {
        self.render_targets.remove(id)
    }

    pub fn unregister_sampler(&mut self, id: SamplerId) -> Option<SamplerRecord> {
        self.samplers.remove(id)
    }

    //----------------------------------------------------------------------------------------------
    // Teardown helpers. Drain in destruction order: render targets first,
    // textures last (see the device contract's deinit ordering).

    pub fn drain_render_targets(&mut self) -> Vec<(RenderTargetId, RenderTargetRecord)> {
        self.render_targets.drain().collect()
    }

    pub fn drain_pipelines(&mut self) -> Vec<(PipelineId, PipelineRecord)> {
        self.pipelines.drain().collect()
    }

    pub fn drain_shaders(&mut self) -> Vec<(ShaderId, ShaderRecord)> {
        self.shaders.drain().collect()
    }

    pub fn drain_buffers(&mut self) -> Vec<(BufferId, BufferRecord)> {
        self.buffer_bytes = 0;
        self.buffers.drain().collect()
    }

    pub fn drain_textures(&mut self) -> Vec<(TextureId, TextureRecord)> {
        self.texture_bytes = 0;
        self.textures.drain().collect()
    }

    pub fn drain_samplers(&mut self) -> Vec<(SamplerId, SamplerRecord)> {
        self.samplers.drain().collect()
    }

    //----------------------------------------------------------------------------------------------

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            textures: self.textures.len(),
            buffers: self.buffers.len(),
            shaders: self.shaders.len(),
            pipelines: self.pipelines.len(),
            render_targets: self.render_targets.len(),
            samplers: self.samplers.len(),
            texture_bytes: self.texture_bytes,
            buffer_bytes: self.buffer_bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stats().total_resources() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TextureFormat;

    #[derive(Debug)]
    struct NullTexture;
    impl TextureHandle for NullTexture {}

    #[derive(Debug)]
    struct NullBuffer;
    impl BufferHandle for NullBuffer {}

    fn texture_desc() -> TextureDesc {
        TextureDesc::new(16, 16, TextureFormat::Rgba8Unorm)
    }

    #[test]
    fn stale_key_does_not_resolve() {
        let mut registry = ResourceRegistry::new();
        let id = registry.register_texture(texture_desc(), Box::new(NullTexture));
        assert!(registry.texture(id).is_some());
        registry.unregister_texture(id).unwrap();
        assert!(registry.texture(id).is_none());

        // a new registration may reuse the slot but never the key
        let id2 = registry.register_texture(texture_desc(), Box::new(NullTexture));
        assert_ne!(id, id2);
        assert!(registry.texture(id).is_none());
    }

    #[test]
    fn byte_accounting_follows_lifecycle() {
        let mut registry = ResourceRegistry::new();
        let t = registry.register_texture(texture_desc(), Box::new(NullTexture));
        let b = registry.register_buffer(
            crate::buffer::BufferDesc::new(256, crate::buffer::BufferUsage::VERTEX),
            Box::new(NullBuffer),
        );
        let stats = registry.stats();
        assert_eq!(stats.texture_bytes, 16 * 16 * 4);
        assert_eq!(stats.buffer_bytes, 256);

        registry.unregister_texture(t).unwrap();
        registry.unregister_buffer(b).unwrap();
        assert_eq!(registry.stats().total_bytes(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn find_by_name() {
        let mut registry = ResourceRegistry::new();
        let desc = texture_desc().with_name("gbuffer.albedo");
        let id = registry.register_texture(desc, Box::new(NullTexture));
        assert_eq!(
            registry.find_by_name("gbuffer.albedo"),
            Some(ResourceId::Texture(id))
        );
        assert_eq!(registry.find_by_name("missing"), None);

        registry.set_name(ResourceId::Texture(id), "gbuffer.normal");
        assert_eq!(registry.name_of(ResourceId::Texture(id)), Some("gbuffer.normal"));
    }
}
