//! Pipeline descriptors, canonical hashing, and the per-device pipeline cache.

use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::format::{TextureFormat, VertexFormat};
use crate::registry::{PipelineId, ShaderId};

/// FNV-1a over a canonical byte string. This is the contract hash for
/// pipeline descriptors; internal maps are free to use faster hashers.
pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

//--------------------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

impl BlendState {
    pub const DISABLED: BlendState = BlendState {
        enabled: false,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::Zero,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
        alpha_op: BlendOp::Add,
    };

    pub const ALPHA: BlendState = BlendState {
        enabled: true,
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
        alpha_op: BlendOp::Add,
    };
}

impl Default for BlendState {
    fn default() -> BlendState {
        BlendState::DISABLED
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub stencil_test: bool,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
}

impl DepthStencilState {
    pub const DISABLED: DepthStencilState = DepthStencilState {
        depth_test: false,
        depth_write: false,
        depth_compare: CompareOp::Always,
        stencil_test: false,
        stencil_read_mask: 0xff,
        stencil_write_mask: 0xff,
    };

    pub const LESS_WRITE: DepthStencilState = DepthStencilState {
        depth_test: true,
        depth_write: true,
        depth_compare: CompareOp::Less,
        stencil_test: false,
        stencil_read_mask: 0xff,
        stencil_write_mask: 0xff,
    };
}

impl Default for DepthStencilState {
    fn default() -> DepthStencilState {
        DepthStencilState::DISABLED
    }
}

/// One attribute inside a vertex buffer layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

/// Layout of the vertex data in one bound buffer slot.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexBufferLayout {
    pub binding: u32,
    pub stride: u32,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

/// Full description of a pipeline. Byte-equal canonical forms yield the same
/// cache key, so field order and padding are fixed by
/// [`PipelineDesc::canonical_bytes`]; the debug name is cosmetic and excluded.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub vertex_shader: Option<ShaderId>,
    pub fragment_shader: Option<ShaderId>,
    pub geometry_shader: Option<ShaderId>,
    pub tess_control_shader: Option<ShaderId>,
    pub tess_eval_shader: Option<ShaderId>,
    pub compute_shader: Option<ShaderId>,
    pub vertex_layout: Vec<VertexBufferLayout>,
    pub topology: PrimitiveTopology,
    pub blend: BlendState,
    pub depth_stencil: DepthStencilState,
    pub sample_count: u32,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub debug_name: Option<String>,
}

impl Default for PipelineDesc {
    fn default() -> PipelineDesc {
        PipelineDesc {
            vertex_shader: None,
            fragment_shader: None,
            geometry_shader: None,
            tess_control_shader: None,
            tess_eval_shader: None,
            compute_shader: None,
            vertex_layout: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            blend: BlendState::DISABLED,
            depth_stencil: DepthStencilState::DISABLED,
            sample_count: 1,
            color_formats: Vec::new(),
            depth_format: None,
            debug_name: None,
        }
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_shader(out: &mut Vec<u8>, shader: Option<ShaderId>) {
    match shader {
        Some(id) => {
            out.push(1);
            put_u64(out, slotmap::Key::data(&id).as_ffi());
        }
        None => {
            out.push(0);
            put_u64(out, 0);
        }
    }
}

impl PipelineDesc {
    pub fn is_compute(&self) -> bool {
        self.compute_shader.is_some()
    }

    /// Serialises the descriptor into its canonical byte string: fixed field
    /// order, fixed-width little-endian scalars, explicit presence bytes for
    /// optionals, length-prefixed lists. No uninitialised padding is ever
    /// written, so byte-equality is exactly descriptor equality.
    pub fn canonical_bytes(&self, out: &mut Vec<u8>) {
        out.clear();
        put_shader(out, self.vertex_shader);
        put_shader(out, self.fragment_shader);
        put_shader(out, self.geometry_shader);
        put_shader(out, self.tess_control_shader);
        put_shader(out, self.tess_eval_shader);
        put_shader(out, self.compute_shader);

        put_u32(out, self.vertex_layout.len() as u32);
        for layout in &self.vertex_layout {
            put_u32(out, layout.binding);
            put_u32(out, layout.stride);
            put_u32(out, layout.step_mode as u32);
            put_u32(out, layout.attributes.len() as u32);
            for attr in &layout.attributes {
                put_u32(out, attr.location);
                put_u32(out, attr.format as u32);
                put_u32(out, attr.offset);
            }
        }

        put_u32(out, self.topology as u32);

        put_u32(out, self.blend.enabled as u32);
        put_u32(out, self.blend.src_color as u32);
        put_u32(out, self.blend.dst_color as u32);
        put_u32(out, self.blend.color_op as u32);
        put_u32(out, self.blend.src_alpha as u32);
        put_u32(out, self.blend.dst_alpha as u32);
        put_u32(out, self.blend.alpha_op as u32);

        put_u32(out, self.depth_stencil.depth_test as u32);
        put_u32(out, self.depth_stencil.depth_write as u32);
        put_u32(out, self.depth_stencil.depth_compare as u32);
        put_u32(out, self.depth_stencil.stencil_test as u32);
        put_u32(out, self.depth_stencil.stencil_read_mask);
        put_u32(out, self.depth_stencil.stencil_write_mask);

        put_u32(out, self.sample_count);

        put_u32(out, self.color_formats.len() as u32);
        for fmt in &self.color_formats {
            put_u32(out, *fmt as u32);
        }
        match self.depth_format {
            Some(fmt) => {
                out.push(1);
                put_u32(out, fmt as u32);
            }
            None => {
                out.push(0);
                put_u32(out, 0);
            }
        }
    }

    /// The 64-bit cache key: FNV-1a over [`Self::canonical_bytes`].
    pub fn cache_key(&self) -> u64 {
        let mut bytes = Vec::with_capacity(256);
        self.canonical_bytes(&mut bytes);
        fnv1a_hash(&bytes)
    }
}

//--------------------------------------------------------------------------------------------------

/// Hash-keyed cache of created pipelines.
///
/// Lookup-only: a hit returns the exact pipeline created for the first
/// byte-equal descriptor, nothing is ever evicted during the device's
/// lifetime. Cleared wholesale at device teardown.
pub struct PipelineCache {
    entries: Mutex<FxHashMap<u64, PipelineId>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PipelineCache {
    pub fn new() -> PipelineCache {
        PipelineCache {
            entries: Mutex::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached pipeline for `desc`, or invokes `create` and caches
    /// the result.
    pub fn get_or_create(
        &self,
        desc: &PipelineDesc,
        create: impl FnOnce(u64) -> Result<PipelineId>,
    ) -> Result<PipelineId> {
        let key = desc.cache_key();
        if let Some(&id) = self.entries.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(id);
        }
        // creation can take a while; don't hold the map lock across it
        let id = create(key)?;
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(key, id);
        Ok(id)
    }

    /// Drops the cache entry whose value is `id`, if any. Used when a
    /// pipeline is destroyed through the device before teardown.
    pub fn forget(&self, id: PipelineId) {
        self.entries.lock().retain(|_, v| *v != id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.lock().clear()
    }
}

impl Default for PipelineCache {
    fn default() -> PipelineCache {
        PipelineCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn sample_desc(shaders: &mut SlotMap<ShaderId, ()>) -> PipelineDesc {
        let vs = shaders.insert(());
        let fs = shaders.insert(());
        PipelineDesc {
            vertex_shader: Some(vs),
            fragment_shader: Some(fs),
            vertex_layout: vec![VertexBufferLayout {
                binding: 0,
                stride: 20,
                step_mode: VertexStepMode::Vertex,
                attributes: vec![
                    VertexAttribute {
                        location: 0,
                        format: VertexFormat::Float3,
                        offset: 0,
                    },
                    VertexAttribute {
                        location: 1,
                        format: VertexFormat::Float2,
                        offset: 12,
                    },
                ],
            }],
            color_formats: vec![TextureFormat::Bgra8Unorm],
            ..PipelineDesc::default()
        }
    }

    #[test]
    fn fnv1a_known_vectors() {
        // reference values for the 64-bit FNV-1a parameters
        assert_eq!(fnv1a_hash(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_hash(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn equal_descriptors_hash_equal() {
        let mut shaders: SlotMap<ShaderId, ()> = SlotMap::with_key();
        let d1 = sample_desc(&mut shaders);
        let mut d2 = d1.clone();
        d2.debug_name = Some("cosmetic".to_owned());
        assert_eq!(d1.cache_key(), d2.cache_key());

        let mut d3 = d1.clone();
        d3.topology = PrimitiveTopology::LineList;
        assert_ne!(d1.cache_key(), d3.cache_key());
    }

    #[test]
    fn cache_hit_returns_same_pipeline_and_creates_once() {
        let mut shaders: SlotMap<ShaderId, ()> = SlotMap::with_key();
        let mut pipelines: SlotMap<PipelineId, ()> = SlotMap::with_key();
        let desc = sample_desc(&mut shaders);

        let cache = PipelineCache::new();
        let p1 = cache.get_or_create(&desc, |_| Ok(pipelines.insert(()))).unwrap();
        let p2 = cache
            .get_or_create(&desc, |_| panic!("must not create twice"))
            .unwrap();
        assert_eq!(p1, p2);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }
}
