//! Texture, vertex and index formats with size/component queries.

/// Pixel formats the contract guarantees on every backend.
///
/// Backends may accept more through their capability record; these are the
/// portable minimum.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgb8Unorm,
    Rg8Unorm,
    R8Unorm,
    Depth24Stencil8,
    Depth32Float,
}

/// Per-format layout queries.
pub struct FormatInfo {
    pub bytes_per_pixel: u32,
    pub color_components: u32,
    pub has_depth: bool,
    pub has_stencil: bool,
}

impl TextureFormat {
    pub fn info(self) -> FormatInfo {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm => FormatInfo {
                bytes_per_pixel: 4,
                color_components: 4,
                has_depth: false,
                has_stencil: false,
            },
            TextureFormat::Rgb8Unorm => FormatInfo {
                bytes_per_pixel: 3,
                color_components: 3,
                has_depth: false,
                has_stencil: false,
            },
            TextureFormat::Rg8Unorm => FormatInfo {
                bytes_per_pixel: 2,
                color_components: 2,
                has_depth: false,
                has_stencil: false,
            },
            TextureFormat::R8Unorm => FormatInfo {
                bytes_per_pixel: 1,
                color_components: 1,
                has_depth: false,
                has_stencil: false,
            },
            TextureFormat::Depth24Stencil8 => FormatInfo {
                bytes_per_pixel: 4,
                color_components: 0,
                has_depth: true,
                has_stencil: true,
            },
            TextureFormat::Depth32Float => FormatInfo {
                bytes_per_pixel: 4,
                color_components: 0,
                has_depth: true,
                has_stencil: false,
            },
        }
    }

    #[inline]
    pub fn bytes_per_pixel(self) -> u32 {
        self.info().bytes_per_pixel
    }

    #[inline]
    pub fn is_depth_stencil(self) -> bool {
        let info = self.info();
        info.has_depth || info.has_stencil
    }

    /// Byte size of one mip level of a `width`×`height`×`depth` image.
    pub fn mip_level_size(self, width: u32, height: u32, depth: u32, level: u32) -> u64 {
        let w = (width >> level).max(1) as u64;
        let h = (height >> level).max(1) as u64;
        let d = (depth >> level).max(1) as u64;
        w * h * d * u64::from(self.bytes_per_pixel())
    }
}

/// Maximum number of mip levels for an extent:
/// `1 + floor(log2(max(w, h, d)))`.
pub fn mip_level_count_for_extent(width: u32, height: u32, depth: u32) -> u32 {
    let m = width.max(height).max(depth).max(1);
    32 - m.leading_zeros()
}

//--------------------------------------------------------------------------------------------------

/// Vertex attribute formats with their natural widths.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum VertexFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    Int1,
    Int2,
    Int3,
    Int4,
    Uint1,
    Uint2,
    Uint3,
    Uint4,
    Byte4Norm,
    UByte4Norm,
    Short2Norm,
    UShort2Norm,
    Half2,
    Half4,
}

impl VertexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            VertexFormat::Float1 | VertexFormat::Int1 | VertexFormat::Uint1 => 4,
            VertexFormat::Float2 | VertexFormat::Int2 | VertexFormat::Uint2 => 8,
            VertexFormat::Float3 | VertexFormat::Int3 | VertexFormat::Uint3 => 12,
            VertexFormat::Float4 | VertexFormat::Int4 | VertexFormat::Uint4 => 16,
            VertexFormat::Byte4Norm | VertexFormat::UByte4Norm => 4,
            VertexFormat::Short2Norm | VertexFormat::UShort2Norm => 4,
            VertexFormat::Half2 => 4,
            VertexFormat::Half4 => 8,
        }
    }

    pub fn component_count(self) -> u32 {
        match self {
            VertexFormat::Float1 | VertexFormat::Int1 | VertexFormat::Uint1 => 1,
            VertexFormat::Float2
            | VertexFormat::Int2
            | VertexFormat::Uint2
            | VertexFormat::Short2Norm
            | VertexFormat::UShort2Norm
            | VertexFormat::Half2 => 2,
            VertexFormat::Float3 | VertexFormat::Int3 | VertexFormat::Uint3 => 3,
            VertexFormat::Float4
            | VertexFormat::Int4
            | VertexFormat::Uint4
            | VertexFormat::Byte4Norm
            | VertexFormat::UByte4Norm
            | VertexFormat::Half4 => 4,
        }
    }
}

/// Type of the indices in an index buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IndexFormat {
    /// 16-bit unsigned integer indices
    U16,
    /// 32-bit unsigned integer indices
    U32,
}

impl IndexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TEXTURE_FORMATS: [TextureFormat; 7] = [
        TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm,
        TextureFormat::Rgb8Unorm,
        TextureFormat::Rg8Unorm,
        TextureFormat::R8Unorm,
        TextureFormat::Depth24Stencil8,
        TextureFormat::Depth32Float,
    ];

    #[test]
    fn mip0_size_matches_bytes_per_pixel() {
        for fmt in ALL_TEXTURE_FORMATS {
            let size = fmt.mip_level_size(1280, 720, 1, 0);
            assert_eq!(size, u64::from(fmt.bytes_per_pixel()) * 1280 * 720);
        }
    }

    #[test]
    fn depth_formats_have_no_color_components() {
        assert_eq!(TextureFormat::Depth24Stencil8.info().color_components, 0);
        assert_eq!(TextureFormat::Depth32Float.info().color_components, 0);
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth_stencil());
    }

    #[test]
    fn mip_chain_lengths() {
        assert_eq!(mip_level_count_for_extent(1, 1, 1), 1);
        assert_eq!(mip_level_count_for_extent(2, 2, 1), 2);
        assert_eq!(mip_level_count_for_extent(1024, 512, 1), 11);
        assert_eq!(mip_level_count_for_extent(1280, 720, 1), 11);
    }

    #[test]
    fn vertex_format_widths() {
        assert_eq!(VertexFormat::Float3.byte_size(), 12);
        assert_eq!(VertexFormat::Half4.byte_size(), 8);
        assert_eq!(VertexFormat::UByte4Norm.byte_size(), 4);
        assert_eq!(VertexFormat::Short2Norm.byte_size(), 4);
        assert_eq!(VertexFormat::Float3.component_count(), 3);
    }
}
