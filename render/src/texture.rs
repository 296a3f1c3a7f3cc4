//! Texture and sampler descriptors.

use bitflags::bitflags;

use crate::error::{ErrorKind, GraphicsError, Result};
use crate::format::{mip_level_count_for_extent, TextureFormat};

bitflags! {
    /// Ways a texture may be used. Monotonic: flags requested at creation are
    /// never cleared afterwards.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED       = 0b0000_0001;
        const RENDER_TARGET = 0b0000_0010;
        const DEPTH_STENCIL = 0b0000_0100;
        const STORAGE       = 0b0000_1000;
        const TRANSFER_SRC  = 0b0001_0000;
        const TRANSFER_DST  = 0b0010_0000;
    }
}

impl Default for TextureUsage {
    fn default() -> TextureUsage {
        TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST
    }
}

/// Description of a texture to create.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub debug_name: Option<String>,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> TextureDesc {
        TextureDesc {
            width,
            height,
            depth: 1,
            array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            format,
            usage: TextureUsage::default(),
            debug_name: None,
        }
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> TextureDesc {
        self.usage = usage;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> TextureDesc {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> TextureDesc {
        self.debug_name = Some(name.into());
        self
    }

    /// Total byte size over all mip levels and array layers.
    pub fn byte_size(&self) -> u64 {
        let mut total = 0;
        for level in 0..self.mip_levels {
            total += self
                .format
                .mip_level_size(self.width, self.height, self.depth, level);
        }
        total * u64::from(self.array_layers.max(1))
    }

    /// Checks the descriptor invariants: non-degenerate extent, mip count
    /// within the chain for the extent, format compatible with at least one
    /// requested usage.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                format!(
                    "texture extent must be at least 1x1x1, got {}x{}x{}",
                    self.width, self.height, self.depth
                ),
            ));
        }
        let max_mips = mip_level_count_for_extent(self.width, self.height, self.depth);
        if self.mip_levels == 0 || self.mip_levels > max_mips {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                format!(
                    "mip level count {} outside 1..={} for extent {}x{}x{}",
                    self.mip_levels, max_mips, self.width, self.height, self.depth
                ),
            ));
        }
        if self.usage.is_empty() {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "texture must declare at least one usage",
            ));
        }
        let depth_stencil = self.format.is_depth_stencil();
        if depth_stencil && self.usage.contains(TextureUsage::RENDER_TARGET) {
            return Err(GraphicsError::new(
                ErrorKind::IncompatibleFormat,
                format!("{:?} cannot be used as a color render target", self.format),
            ));
        }
        if !depth_stencil && self.usage.contains(TextureUsage::DEPTH_STENCIL) {
            return Err(GraphicsError::new(
                ErrorKind::IncompatibleFormat,
                format!("{:?} cannot be used as a depth/stencil target", self.format),
            ));
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum SamplerAddressMode {
    Clamp,
    Mirror,
    Wrap,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum MipmapMode {
    Nearest,
    Linear,
}

/// Description of a sampler. Backends cache one native object per distinct
/// description.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct SamplerDesc {
    pub addr_u: SamplerAddressMode,
    pub addr_v: SamplerAddressMode,
    pub addr_w: SamplerAddressMode,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mipmap_mode: MipmapMode,
}

impl SamplerDesc {
    pub const LINEAR_MIPMAP_LINEAR: SamplerDesc = SamplerDesc {
        addr_u: SamplerAddressMode::Clamp,
        addr_v: SamplerAddressMode::Clamp,
        addr_w: SamplerAddressMode::Clamp,
        min_filter: Filter::Linear,
        mag_filter: Filter::Linear,
        mipmap_mode: MipmapMode::Linear,
    };

    pub const LINEAR_MIPMAP_NEAREST: SamplerDesc = SamplerDesc {
        addr_u: SamplerAddressMode::Clamp,
        addr_v: SamplerAddressMode::Clamp,
        addr_w: SamplerAddressMode::Clamp,
        min_filter: Filter::Linear,
        mag_filter: Filter::Linear,
        mipmap_mode: MipmapMode::Nearest,
    };

    pub const NEAREST_MIPMAP_NEAREST: SamplerDesc = SamplerDesc {
        addr_u: SamplerAddressMode::Clamp,
        addr_v: SamplerAddressMode::Clamp,
        addr_w: SamplerAddressMode::Clamp,
        min_filter: Filter::Nearest,
        mag_filter: Filter::Nearest,
        mipmap_mode: MipmapMode::Nearest,
    };

    pub const WRAP_LINEAR_MIPMAP_LINEAR: SamplerDesc = SamplerDesc {
        addr_u: SamplerAddressMode::Wrap,
        addr_v: SamplerAddressMode::Wrap,
        addr_w: SamplerAddressMode::Wrap,
        min_filter: Filter::Linear,
        mag_filter: Filter::Linear,
        mipmap_mode: MipmapMode::Linear,
    };
}

impl Default for SamplerDesc {
    fn default() -> SamplerDesc {
        SamplerDesc::LINEAR_MIPMAP_LINEAR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_extent() {
        let desc = TextureDesc::new(0, 128, TextureFormat::Rgba8Unorm);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn rejects_overlong_mip_chain() {
        let desc = TextureDesc::new(256, 256, TextureFormat::Rgba8Unorm).with_mip_levels(10);
        assert!(desc.validate().is_err());
        let desc = desc.with_mip_levels(9);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn rejects_depth_format_as_color_target() {
        let desc = TextureDesc::new(64, 64, TextureFormat::Depth32Float)
            .with_usage(TextureUsage::RENDER_TARGET);
        assert_eq!(
            desc.validate().unwrap_err().kind,
            ErrorKind::IncompatibleFormat
        );
    }

    #[test]
    fn byte_size_counts_all_mips() {
        let desc = TextureDesc::new(4, 4, TextureFormat::R8Unorm).with_mip_levels(3);
        // 16 + 4 + 1
        assert_eq!(desc.byte_size(), 21);
    }
}
