//! Render pass and render target descriptors.

use crate::error::{ErrorKind, GraphicsError, Result};
use crate::format::TextureFormat;
use crate::pipeline::fnv1a_hash;
use crate::registry::RenderTargetId;

/// What to do with an attachment's contents when a pass begins.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum LoadOp {
    /// Replace with the pass's clear value.
    Clear,
    /// Keep whatever is there.
    Load,
    /// Contents are undefined; cheapest when everything is overdrawn.
    DontCare,
}

/// What to do with an attachment's contents when a pass ends.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// Load/store pair for one attachment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AttachmentOps {
    pub load: LoadOp,
    pub store: StoreOp,
}

impl AttachmentOps {
    pub const CLEAR_STORE: AttachmentOps = AttachmentOps {
        load: LoadOp::Clear,
        store: StoreOp::Store,
    };

    pub const LOAD_STORE: AttachmentOps = AttachmentOps {
        load: LoadOp::Load,
        store: StoreOp::Store,
    };
}

/// Where a render pass draws to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PassTarget {
    /// The device's swap chain image for the current frame.
    SwapChain,
    /// An offscreen render target.
    Offscreen(RenderTargetId),
}

/// Description of one render pass instance.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassDesc {
    pub target: PassTarget,
    /// Per color attachment, in attachment order. A swap chain target has
    /// exactly one.
    pub color_ops: Vec<AttachmentOps>,
    /// Present when the target has a depth/stencil attachment.
    pub depth_ops: Option<AttachmentOps>,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u32,
    pub debug_name: Option<String>,
}

impl RenderPassDesc {
    /// A single clear-and-store pass over the swap chain.
    pub fn clear_swap_chain(clear_color: [f32; 4]) -> RenderPassDesc {
        RenderPassDesc {
            target: PassTarget::SwapChain,
            color_ops: vec![AttachmentOps::CLEAR_STORE],
            depth_ops: None,
            clear_color,
            clear_depth: 1.0,
            clear_stencil: 0,
            debug_name: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.color_ops.is_empty() && self.depth_ops.is_none() {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "render pass needs at least one attachment",
            ));
        }
        if matches!(self.target, PassTarget::SwapChain) && self.color_ops.len() != 1 {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "swap chain pass has exactly one color attachment",
            ));
        }
        for c in self.clear_color {
            if !(0.0..=1.0).contains(&c) {
                return Err(GraphicsError::new(
                    ErrorKind::ValidationError,
                    format!("clear color component {} outside [0,1]", c),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.clear_depth) {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                format!("clear depth {} outside [0,1]", self.clear_depth),
            ));
        }
        Ok(())
    }

    /// Canonical hash for backend-side caching of native pass objects.
    /// Clear values are execution parameters, not identity, so only the
    /// target shape and ops participate.
    pub fn compat_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(64);
        match self.target {
            PassTarget::SwapChain => bytes.push(0u8),
            PassTarget::Offscreen(id) => {
                bytes.push(1u8);
                bytes.extend_from_slice(&slotmap::Key::data(&id).as_ffi().to_le_bytes());
            }
        }
        bytes.extend_from_slice(&(self.color_ops.len() as u32).to_le_bytes());
        for ops in &self.color_ops {
            bytes.extend_from_slice(&(ops.load as u32).to_le_bytes());
            bytes.extend_from_slice(&(ops.store as u32).to_le_bytes());
        }
        match &self.depth_ops {
            Some(ops) => {
                bytes.push(1);
                bytes.extend_from_slice(&(ops.load as u32).to_le_bytes());
                bytes.extend_from_slice(&(ops.store as u32).to_le_bytes());
            }
            None => bytes.push(0),
        }
        fnv1a_hash(&bytes)
    }
}

/// A validated render pass, ready for `begin_render_pass`.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPass {
    pub desc: RenderPassDesc,
    pub compat_hash: u64,
}

impl RenderPass {
    pub fn new(desc: RenderPassDesc) -> Result<RenderPass> {
        desc.validate()?;
        let compat_hash = desc.compat_hash();
        Ok(RenderPass { desc, compat_hash })
    }
}

//--------------------------------------------------------------------------------------------------

/// Description of an offscreen render target. The device creates and owns the
/// attachment textures; destroying the target destroys them.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub sample_count: u32,
    pub debug_name: Option<String>,
}

impl RenderTargetDesc {
    pub fn new(width: u32, height: u32, color_format: TextureFormat) -> RenderTargetDesc {
        RenderTargetDesc {
            width,
            height,
            color_formats: vec![color_format],
            depth_format: None,
            sample_count: 1,
            debug_name: None,
        }
    }

    pub fn with_depth(mut self, format: TextureFormat) -> RenderTargetDesc {
        self.depth_format = Some(format);
        self
    }

    pub fn validate(&self, max_render_targets: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "render target extent must be at least 1x1",
            ));
        }
        if self.color_formats.is_empty() && self.depth_format.is_none() {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "render target needs at least one attachment",
            ));
        }
        if self.color_formats.len() as u32 > max_render_targets {
            return Err(GraphicsError::new(
                ErrorKind::FeatureNotSupported,
                format!(
                    "{} color attachments exceeds device limit {}",
                    self.color_formats.len(),
                    max_render_targets
                ),
            ));
        }
        for fmt in &self.color_formats {
            if fmt.is_depth_stencil() {
                return Err(GraphicsError::new(
                    ErrorKind::IncompatibleFormat,
                    format!("{:?} is not a color format", fmt),
                ));
            }
        }
        if let Some(fmt) = self.depth_format {
            if !fmt.is_depth_stencil() {
                return Err(GraphicsError::new(
                    ErrorKind::IncompatibleFormat,
                    format!("{:?} is not a depth/stencil format", fmt),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_values_validated() {
        let mut desc = RenderPassDesc::clear_swap_chain([0.2, 0.3, 0.4, 1.0]);
        assert!(desc.validate().is_ok());
        desc.clear_depth = 1.5;
        assert!(desc.validate().is_err());
        desc.clear_depth = 1.0;
        desc.clear_color = [0.0, -0.1, 0.0, 1.0];
        assert!(desc.validate().is_err());
    }

    #[test]
    fn compat_hash_ignores_clear_values() {
        let a = RenderPassDesc::clear_swap_chain([0.0, 0.0, 0.0, 1.0]);
        let b = RenderPassDesc::clear_swap_chain([1.0, 1.0, 1.0, 1.0]);
        assert_eq!(a.compat_hash(), b.compat_hash());

        let mut c = a.clone();
        c.color_ops[0].load = LoadOp::Load;
        assert_ne!(a.compat_hash(), c.compat_hash());
    }

    #[test]
    fn render_target_format_rules() {
        let desc = RenderTargetDesc::new(64, 64, TextureFormat::Depth32Float);
        assert!(desc.validate(8).is_err());

        let desc = RenderTargetDesc::new(64, 64, TextureFormat::Rgba8Unorm)
            .with_depth(TextureFormat::Depth24Stencil8);
        assert!(desc.validate(8).is_ok());
    }
}
