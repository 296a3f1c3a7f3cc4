//! OpenGL equivalents of the contract's formats.

use crate::api as gl;
use crate::api::types::*;
use ember_render::format::{IndexFormat, TextureFormat, VertexFormat};
use ember_render::pipeline::PrimitiveTopology;

/// Equivalent OpenGL format information for a [`TextureFormat`].
pub struct GlFormatInfo {
    /// Corresponding internal format.
    pub internal_fmt: GLenum,
    /// Matching external format for uploads/reads.
    pub upload_components: GLenum,
    /// Matching element type for uploads/reads.
    pub upload_ty: GLenum,
}

static GLF_RGBA8_UNORM: GlFormatInfo = GlFormatInfo {
    internal_fmt: gl::RGBA8,
    upload_components: gl::RGBA,
    upload_ty: gl::UNSIGNED_BYTE,
};
static GLF_BGRA8_UNORM: GlFormatInfo = GlFormatInfo {
    internal_fmt: gl::RGBA8,
    upload_components: gl::BGRA,
    upload_ty: gl::UNSIGNED_BYTE,
};
static GLF_RGB8_UNORM: GlFormatInfo = GlFormatInfo {
    internal_fmt: gl::RGB8,
    upload_components: gl::RGB,
    upload_ty: gl::UNSIGNED_BYTE,
};
static GLF_RG8_UNORM: GlFormatInfo = GlFormatInfo {
    internal_fmt: gl::RG8,
    upload_components: gl::RG,
    upload_ty: gl::UNSIGNED_BYTE,
};
static GLF_R8_UNORM: GlFormatInfo = GlFormatInfo {
    internal_fmt: gl::R8,
    upload_components: gl::RED,
    upload_ty: gl::UNSIGNED_BYTE,
};
static GLF_D24_S8: GlFormatInfo = GlFormatInfo {
    internal_fmt: gl::DEPTH24_STENCIL8,
    upload_components: gl::DEPTH_STENCIL,
    upload_ty: gl::UNSIGNED_INT_24_8,
};
static GLF_D32F: GlFormatInfo = GlFormatInfo {
    internal_fmt: gl::DEPTH_COMPONENT32F,
    upload_components: gl::DEPTH_COMPONENT,
    upload_ty: gl::FLOAT,
};

pub fn texture_format_info(fmt: TextureFormat) -> &'static GlFormatInfo {
    match fmt {
        TextureFormat::Rgba8Unorm => &GLF_RGBA8_UNORM,
        TextureFormat::Bgra8Unorm => &GLF_BGRA8_UNORM,
        TextureFormat::Rgb8Unorm => &GLF_RGB8_UNORM,
        TextureFormat::Rg8Unorm => &GLF_RG8_UNORM,
        TextureFormat::R8Unorm => &GLF_R8_UNORM,
        TextureFormat::Depth24Stencil8 => &GLF_D24_S8,
        TextureFormat::Depth32Float => &GLF_D32F,
    }
}

/// `(component type, count, normalized)` triple for `glVertexAttribFormat`.
pub fn vertex_format_gl(fmt: VertexFormat) -> (GLenum, GLint, bool) {
    match fmt {
        VertexFormat::Float1 => (gl::FLOAT, 1, false),
        VertexFormat::Float2 => (gl::FLOAT, 2, false),
        VertexFormat::Float3 => (gl::FLOAT, 3, false),
        VertexFormat::Float4 => (gl::FLOAT, 4, false),
        VertexFormat::Int1 => (gl::INT, 1, false),
        VertexFormat::Int2 => (gl::INT, 2, false),
        VertexFormat::Int3 => (gl::INT, 3, false),
        VertexFormat::Int4 => (gl::INT, 4, false),
        VertexFormat::Uint1 => (gl::UNSIGNED_INT, 1, false),
        VertexFormat::Uint2 => (gl::UNSIGNED_INT, 2, false),
        VertexFormat::Uint3 => (gl::UNSIGNED_INT, 3, false),
        VertexFormat::Uint4 => (gl::UNSIGNED_INT, 4, false),
        VertexFormat::Byte4Norm => (gl::BYTE, 4, true),
        VertexFormat::UByte4Norm => (gl::UNSIGNED_BYTE, 4, true),
        VertexFormat::Short2Norm => (gl::SHORT, 2, true),
        VertexFormat::UShort2Norm => (gl::UNSIGNED_SHORT, 2, true),
        VertexFormat::Half2 => (gl::HALF_FLOAT, 2, false),
        VertexFormat::Half4 => (gl::HALF_FLOAT, 4, false),
    }
}

pub fn index_format_gl(fmt: IndexFormat) -> GLenum {
    match fmt {
        IndexFormat::U16 => gl::UNSIGNED_SHORT,
        IndexFormat::U32 => gl::UNSIGNED_INT,
    }
}

pub fn topology_gl(topology: PrimitiveTopology) -> GLenum {
    match topology {
        PrimitiveTopology::PointList => gl::POINTS,
        PrimitiveTopology::LineList => gl::LINES,
        PrimitiveTopology::LineStrip => gl::LINE_STRIP,
        PrimitiveTopology::TriangleList => gl::TRIANGLES,
        PrimitiveTopology::TriangleStrip => gl::TRIANGLE_STRIP,
    }
}
