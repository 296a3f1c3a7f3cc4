//! Shader source handling: kind and stage detection, include preprocessing,
//! reflection records.
//!
//! Concrete compilation toolchains live behind the backends; this module owns
//! everything that can be decided by looking at the source alone.

pub mod preprocess;
pub mod reflect;

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

pub use self::preprocess::preprocess_includes;
pub use self::reflect::{
    reflect_glsl_source, PushConstantRange, ReflectedInput, ReflectedOutput, ReflectedTexture,
    ReflectedUniform, ShaderReflection,
};

/// Pipeline stage a shader module targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    TessControl,
    TessEval,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tess_control",
            ShaderStage::TessEval => "tess_eval",
        }
    }
}

/// The language or container a shader source arrives in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SourceKind {
    Glsl,
    Hlsl,
    SpirV,
    Metal,
    Wgsl,
    Binary,
}

/// SPIR-V magic number, as stored in the first word of a module.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader source: text for the high-level languages, bytes for SPIR-V and
/// opaque binaries.
#[derive(Clone, Debug)]
pub enum ShaderSource {
    Text(String),
    Binary(Vec<u8>),
}

impl ShaderSource {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ShaderSource::Text(s) => Some(s),
            ShaderSource::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ShaderSource::Text(s) => s.as_bytes(),
            ShaderSource::Binary(b) => b,
        }
    }
}

/// Options applied when a backend compiles a shader.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub entry_point: String,
    /// `(name, value)` macro definitions, injected ahead of the source.
    pub defines: Vec<(String, Option<String>)>,
    /// Search paths for `#include "…"` resolution.
    pub include_paths: Vec<PathBuf>,
    pub optimize: bool,
    /// Produce a [`ShaderReflection`] record alongside the module.
    pub reflect: bool,
}

impl Default for CompileOptions {
    fn default() -> CompileOptions {
        CompileOptions {
            entry_point: "main".to_owned(),
            defines: Vec::new(),
            include_paths: Vec::new(),
            optimize: true,
            reflect: false,
        }
    }
}

/// Description of a shader to create. `stage` and `kind` may be left out and
/// detected from the source and file name.
#[derive(Clone, Debug)]
pub struct ShaderDesc {
    pub source: ShaderSource,
    pub stage: Option<ShaderStage>,
    pub kind: Option<SourceKind>,
    /// Origin path, used for stage detection and include resolution.
    pub path: Option<PathBuf>,
    pub options: CompileOptions,
    pub debug_name: Option<String>,
}

impl ShaderDesc {
    pub fn from_text(source: impl Into<String>, stage: ShaderStage) -> ShaderDesc {
        ShaderDesc {
            source: ShaderSource::Text(source.into()),
            stage: Some(stage),
            kind: None,
            path: None,
            options: CompileOptions::default(),
            debug_name: None,
        }
    }

    pub fn from_bytes(source: Vec<u8>, stage: ShaderStage) -> ShaderDesc {
        ShaderDesc {
            source: ShaderSource::Binary(source),
            stage: Some(stage),
            kind: None,
            path: None,
            options: CompileOptions::default(),
            debug_name: None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Detection

lazy_static! {
    static ref RE_GLSL_VERSION: Regex = Regex::new(r"(?m)^\s*#version\s+\d+").unwrap();
    static ref RE_HLSL_CUE: Regex =
        Regex::new(r"(?m)\bcbuffer\b|\bSV_Position\b|\bSV_Target\d?\b|\bregister\s*\(").unwrap();
    static ref RE_METAL_CUE: Regex =
        Regex::new(r#"(?m)#include\s+<metal_stdlib>|\busing\s+namespace\s+metal\b"#).unwrap();
    static ref RE_PRAGMA_STAGE: Regex =
        Regex::new(r"(?m)^\s*#pragma\s+stage\s*\(\s*(?P<stage>\w+)\s*\)").unwrap();
    static ref RE_WGSL_STAGE_ATTR: Regex =
        Regex::new(r"(?m)@(?P<stage>compute|vertex|fragment)\b").unwrap();
}

/// Guesses the source kind from magic bytes, structural cues, and finally the
/// file extension. Returns `None` when nothing matches.
pub fn detect_source_kind(bytes: &[u8], path: Option<&Path>) -> Option<SourceKind> {
    if bytes.len() >= 4 && bytes.len() % 4 == 0 {
        let word_le = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let word_be = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if word_le == SPIRV_MAGIC || word_be == SPIRV_MAGIC {
            return Some(SourceKind::SpirV);
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        if RE_METAL_CUE.is_match(text) {
            return Some(SourceKind::Metal);
        }
        if RE_GLSL_VERSION.is_match(text) {
            return Some(SourceKind::Glsl);
        }
        if RE_HLSL_CUE.is_match(text) {
            return Some(SourceKind::Hlsl);
        }
        if RE_WGSL_STAGE_ATTR.is_match(text) {
            return Some(SourceKind::Wgsl);
        }
    }

    match path.and_then(|p| p.extension()).and_then(|e| e.to_str()) {
        Some("glsl") | Some("vert") | Some("frag") | Some("comp") | Some("geom") | Some("tesc")
        | Some("tese") => Some(SourceKind::Glsl),
        Some("hlsl") | Some("fx") => Some(SourceKind::Hlsl),
        Some("metal") => Some(SourceKind::Metal),
        Some("wgsl") => Some(SourceKind::Wgsl),
        Some("spv") => Some(SourceKind::SpirV),
        Some("bin") => Some(SourceKind::Binary),
        _ => None,
    }
}

fn stage_from_token(token: &str) -> Option<ShaderStage> {
    match token {
        "vert" | "vs" | "vertex" => Some(ShaderStage::Vertex),
        "frag" | "fs" | "ps" | "fragment" | "pixel" => Some(ShaderStage::Fragment),
        "comp" | "cs" | "compute" => Some(ShaderStage::Compute),
        "geom" | "gs" | "geometry" => Some(ShaderStage::Geometry),
        "tesc" | "hs" | "tess_control" => Some(ShaderStage::TessControl),
        "tese" | "ds" | "tess_eval" => Some(ShaderStage::TessEval),
        _ => None,
    }
}

/// Guesses the stage from an explicit `#pragma stage(…)` / WGSL entry
/// attribute in the source, then from file-name tokens.
pub fn detect_stage(source: Option<&str>, path: Option<&Path>) -> Option<ShaderStage> {
    if let Some(text) = source {
        if let Some(c) = RE_PRAGMA_STAGE.captures(text) {
            if let Some(stage) = stage_from_token(&c["stage"]) {
                return Some(stage);
            }
        }
        if let Some(c) = RE_WGSL_STAGE_ATTR.captures(text) {
            return stage_from_token(&c["stage"]);
        }
    }

    let name = path.and_then(|p| p.file_name()).and_then(|n| n.to_str())?;
    for token in name.split(|c: char| c == '.' || c == '_' || c == '-') {
        if let Some(stage) = stage_from_token(token) {
            return Some(stage);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_spirv_magic() {
        let words: [u32; 2] = [SPIRV_MAGIC, 0x0001_0000];
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        assert_eq!(detect_source_kind(&bytes, None), Some(SourceKind::SpirV));
    }

    #[test]
    fn detects_glsl_by_version() {
        let src = "#version 450\nvoid main() {}\n";
        assert_eq!(
            detect_source_kind(src.as_bytes(), None),
            Some(SourceKind::Glsl)
        );
    }

    #[test]
    fn detects_hlsl_by_cbuffer() {
        let src = "cbuffer Globals : register(b0) { float4x4 mvp; };\n";
        assert_eq!(
            detect_source_kind(src.as_bytes(), None),
            Some(SourceKind::Hlsl)
        );
    }

    #[test]
    fn detects_metal_by_stdlib_include() {
        let src = "#include <metal_stdlib>\nusing namespace metal;\n";
        assert_eq!(
            detect_source_kind(src.as_bytes(), None),
            Some(SourceKind::Metal)
        );
    }

    #[test]
    fn detects_wgsl_by_stage_attribute() {
        let src = "@vertex\nfn vs_main() -> @builtin(position) vec4<f32> { }\n";
        assert_eq!(
            detect_source_kind(src.as_bytes(), None),
            Some(SourceKind::Wgsl)
        );
    }

    #[test]
    fn extension_fallback() {
        assert_eq!(
            detect_source_kind(b"void main() {}", Some(Path::new("post.hlsl"))),
            Some(SourceKind::Hlsl)
        );
    }

    #[test]
    fn stage_from_filename_tokens() {
        assert_eq!(
            detect_stage(None, Some(Path::new("shadow.vert.glsl"))),
            Some(ShaderStage::Vertex)
        );
        assert_eq!(
            detect_stage(None, Some(Path::new("tonemap_ps.hlsl"))),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(
            detect_stage(None, Some(Path::new("cull-cs.hlsl"))),
            Some(ShaderStage::Compute)
        );
    }

    #[test]
    fn pragma_stage_beats_filename() {
        let src = "#pragma stage(fragment)\nvoid main() {}\n";
        assert_eq!(
            detect_stage(Some(src), Some(Path::new("thing.vert"))),
            Some(ShaderStage::Fragment)
        );
    }
}
