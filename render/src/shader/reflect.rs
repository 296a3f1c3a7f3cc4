//! Shader interface reflection.
//!
//! The record enumerates what a pipeline needs to bind; backends either fill
//! it from their native compiler or fall back to the source-level scan in
//! [`reflect_glsl_source`], which understands the `layout(...)` declarations
//! used across our shaders.

use lazy_static::lazy_static;
use regex::Regex;

use crate::format::VertexFormat;
use crate::shader::ShaderStage;

/// One uniform (or uniform-block member) visible to a stage.
#[derive(Clone, Debug, PartialEq)]
pub struct ReflectedUniform {
    pub name: String,
    pub type_name: String,
    pub byte_size: u32,
    pub offset: u32,
    pub set: u32,
    pub binding: u32,
}

/// One texture/sampler binding.
#[derive(Clone, Debug, PartialEq)]
pub struct ReflectedTexture {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    /// 1, 2 or 3, plus 4 for cube maps.
    pub dimension: u32,
}

/// One vertex-stage input attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct ReflectedInput {
    pub name: String,
    pub location: u32,
    pub format: VertexFormat,
}

/// One stage output.
#[derive(Clone, Debug, PartialEq)]
pub struct ReflectedOutput {
    pub name: String,
    pub location: u32,
}

/// One push-constant range.
#[derive(Clone, Debug, PartialEq)]
pub struct PushConstantRange {
    pub name: String,
    pub offset: u32,
    pub byte_size: u32,
}

/// Everything a pipeline needs to know about one shader module's interface.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderReflection {
    pub uniforms: Vec<ReflectedUniform>,
    pub textures: Vec<ReflectedTexture>,
    pub inputs: Vec<ReflectedInput>,
    pub outputs: Vec<ReflectedOutput>,
    pub push_constants: Vec<PushConstantRange>,
}

//--------------------------------------------------------------------------------------------------

lazy_static! {
    static ref RE_LAYOUT_IO: Regex = Regex::new(
        r"(?m)^\s*layout\s*\(\s*location\s*=\s*(?P<location>\d+)\s*\)\s*(?P<dir>in|out)\s+(?P<type>\w+)\s+(?P<name>\w+)\s*;"
    )
    .unwrap();
    static ref RE_LAYOUT_UNIFORM: Regex = Regex::new(
        r"(?m)^\s*layout\s*\(\s*(?:set\s*=\s*(?P<set>\d+)\s*,\s*)?binding\s*=\s*(?P<binding>\d+)\s*\)\s*uniform\s+(?P<rest>[^;{]+)(?P<block>\{)?"
    )
    .unwrap();
    static ref RE_PUSH_CONSTANT: Regex = Regex::new(
        r"(?m)^\s*layout\s*\(\s*push_constant\s*\)\s*uniform\s+(?P<name>\w+)"
    )
    .unwrap();
}

fn glsl_type_info(type_name: &str) -> (u32, Option<VertexFormat>) {
    match type_name {
        "float" => (4, Some(VertexFormat::Float1)),
        "vec2" => (8, Some(VertexFormat::Float2)),
        "vec3" => (12, Some(VertexFormat::Float3)),
        "vec4" => (16, Some(VertexFormat::Float4)),
        "int" => (4, Some(VertexFormat::Int1)),
        "ivec2" => (8, Some(VertexFormat::Int2)),
        "ivec3" => (12, Some(VertexFormat::Int3)),
        "ivec4" => (16, Some(VertexFormat::Int4)),
        "uint" => (4, Some(VertexFormat::Uint1)),
        "uvec2" => (8, Some(VertexFormat::Uint2)),
        "uvec3" => (12, Some(VertexFormat::Uint3)),
        "uvec4" => (16, Some(VertexFormat::Uint4)),
        "mat3" => (36, None),
        "mat4" => (64, None),
        _ => (0, None),
    }
}

fn sampler_dimension(type_name: &str) -> Option<u32> {
    match type_name {
        "sampler1D" => Some(1),
        "sampler2D" | "sampler2DArray" | "sampler2DShadow" => Some(2),
        "sampler3D" => Some(3),
        "samplerCube" => Some(4),
        _ => None,
    }
}

/// Scans GLSL source for interface declarations. Best-effort: declarations
/// the scan does not understand are skipped, never an error.
pub fn reflect_glsl_source(src: &str, stage: ShaderStage) -> ShaderReflection {
    let mut reflection = ShaderReflection::default();

    for c in RE_LAYOUT_IO.captures_iter(src) {
        let location: u32 = c["location"].parse().unwrap_or(0);
        let type_name = &c["type"];
        let name = c["name"].to_owned();
        match &c["dir"] {
            "in" => {
                // only vertex-stage inputs describe the vertex layout
                if stage == ShaderStage::Vertex {
                    if let (_, Some(format)) = glsl_type_info(type_name) {
                        reflection.inputs.push(ReflectedInput {
                            name,
                            location,
                            format,
                        });
                    }
                }
            }
            "out" => reflection.outputs.push(ReflectedOutput { name, location }),
            _ => unreachable!(),
        }
    }

    for c in RE_LAYOUT_UNIFORM.captures_iter(src) {
        let set: u32 = c.name("set").map_or(0, |m| m.as_str().parse().unwrap_or(0));
        let binding: u32 = c["binding"].parse().unwrap_or(0);
        let rest = c["rest"].trim();
        let mut words = rest.split_whitespace();
        let first = words.next().unwrap_or("");

        if let Some(dimension) = sampler_dimension(first) {
            let name = words.next().unwrap_or("").trim_end_matches(';').to_owned();
            reflection.textures.push(ReflectedTexture {
                name,
                set,
                binding,
                dimension,
            });
        } else if c.name("block").is_some() {
            reflection.uniforms.push(ReflectedUniform {
                name: first.to_owned(),
                type_name: "block".to_owned(),
                byte_size: 0,
                offset: 0,
                set,
                binding,
            });
        } else {
            let (byte_size, _) = glsl_type_info(first);
            let name = words.next().unwrap_or("").trim_end_matches(';').to_owned();
            reflection.uniforms.push(ReflectedUniform {
                name,
                type_name: first.to_owned(),
                byte_size,
                offset: 0,
                set,
                binding,
            });
        }
    }

    for c in RE_PUSH_CONSTANT.captures_iter(src) {
        reflection.push_constants.push(PushConstantRange {
            name: c["name"].to_owned(),
            offset: 0,
            byte_size: 0,
        });
    }

    reflection
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT: &str = r#"
#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec2 a_uv;
layout(location = 0) out vec2 v_uv;
layout(set = 0, binding = 0) uniform Globals {
    mat4 mvp;
};
layout(push_constant) uniform Push { vec4 tint; };
void main() {}
"#;

    const FRAG: &str = r#"
#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 o_color;
layout(set = 1, binding = 0) uniform sampler2D u_albedo;
void main() {}
"#;

    #[test]
    fn reflects_vertex_inputs() {
        let r = reflect_glsl_source(VERT, ShaderStage::Vertex);
        assert_eq!(r.inputs.len(), 2);
        assert_eq!(r.inputs[0].location, 0);
        assert_eq!(r.inputs[0].format, VertexFormat::Float3);
        assert_eq!(r.inputs[1].format, VertexFormat::Float2);
        assert_eq!(r.outputs.len(), 1);
        assert_eq!(r.uniforms.len(), 1);
        assert_eq!(r.uniforms[0].name, "Globals");
        assert_eq!(r.push_constants.len(), 1);
    }

    #[test]
    fn reflects_texture_bindings() {
        let r = reflect_glsl_source(FRAG, ShaderStage::Fragment);
        assert_eq!(r.textures.len(), 1);
        assert_eq!(r.textures[0].name, "u_albedo");
        assert_eq!(r.textures[0].set, 1);
        assert_eq!(r.textures[0].dimension, 2);
        // fragment `in` is not a vertex attribute
        assert!(r.inputs.is_empty());
    }
}
