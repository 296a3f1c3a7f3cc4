//! Host-memory resource payloads and the recorded command stream.

use ember_render::command::{DrawIndexedParams, DrawParams, ScissorRect, Viewport};
use ember_render::error::Result;
use ember_render::format::IndexFormat;
use ember_render::registry::{
    BufferHandle, BufferId, PipelineHandle, PipelineId, RenderTargetHandle, SamplerHandle,
    SamplerId, ShaderHandle, TextureHandle, TextureId,
};
use ember_render::memory::MemoryBlock;
use ember_render::renderpass::RenderPass;
use ember_render::shader::ShaderReflection;
use ember_render::sync::ResourceBarrier;
use ember_render::{CommandSink, MemoryClass, SwapchainDesc, SwapchainState};

/// Texture contents, tightly packed, all mips and layers in one slab.
#[derive(Debug)]
pub struct SoftTexture {
    pub data: Vec<u8>,
    /// Accounting record; released when the texture is destroyed.
    pub block: MemoryBlock,
}

impl TextureHandle for SoftTexture {}

#[derive(Debug)]
pub struct SoftBuffer {
    pub data: Vec<u8>,
    pub memory: MemoryClass,
    pub block: MemoryBlock,
}

impl BufferHandle for SoftBuffer {}

#[derive(Debug)]
pub struct SoftShader {
    /// Kept for diagnostics; the rasteriser does not execute shader code.
    pub reflection: Option<ShaderReflection>,
}

impl ShaderHandle for SoftShader {}

#[derive(Debug)]
pub struct SoftPipeline {
    /// Drives the deterministic placeholder color.
    pub cache_key: u64,
}

impl PipelineHandle for SoftPipeline {}

#[derive(Debug)]
pub struct SoftRenderTarget;

impl RenderTargetHandle for SoftRenderTarget {}

#[derive(Debug)]
pub struct SoftSampler;

impl SamplerHandle for SoftSampler {}

//--------------------------------------------------------------------------------------------------

/// One swap chain: N host images plus the ring index.
#[derive(Debug)]
pub struct SoftSwapchain {
    pub desc: SwapchainDesc,
    pub images: Vec<Vec<u8>>,
    pub current: usize,
    pub state: SwapchainState,
    pub presents: u64,
}

impl SoftSwapchain {
    pub fn new(desc: SwapchainDesc) -> SoftSwapchain {
        let image_size =
            desc.format.mip_level_size(desc.width, desc.height, 1, 0) as usize;
        SoftSwapchain {
            images: (0..desc.buffer_count).map(|_| vec![0; image_size]).collect(),
            current: 0,
            state: SwapchainState::Ready,
            presents: 0,
            desc,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.desc.width = width;
        self.desc.height = height;
        let image_size = self.desc.format.mip_level_size(width, height, 1, 0) as usize;
        for image in &mut self.images {
            image.clear();
            image.resize(image_size, 0);
        }
        self.current = 0;
    }
}

//--------------------------------------------------------------------------------------------------

/// Replayable command, one per sink call.
#[derive(Debug)]
pub enum SoftCmd {
    BeginRenderPass(RenderPass),
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindPipeline(PipelineId),
    BindVertexBuffer {
        slot: u32,
        buffer: BufferId,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferId,
        format: IndexFormat,
        offset: u64,
    },
    BindUniformBuffer {
        slot: u32,
        buffer: BufferId,
    },
    BindTexture {
        slot: u32,
        texture: TextureId,
        sampler: SamplerId,
    },
    PushConstants {
        offset: u32,
        data: Vec<u8>,
    },
    Draw(DrawParams),
    DrawIndexed(DrawIndexedParams),
    Dispatch(u32, u32, u32),
    Barrier(ResourceBarrier),
    BeginDebugGroup(String),
    EndDebugGroup,
}

/// Sink that records the stream for synchronous replay at submit. Legality
/// was already enforced by the wrapper, so recording is unconditional.
#[derive(Debug, Default)]
pub struct SoftSink {
    pub commands: Vec<SoftCmd>,
}

impl CommandSink for SoftSink {
    fn begin(&mut self) -> Result<()> {
        self.commands.clear();
        Ok(())
    }

    fn begin_render_pass(&mut self, pass: &RenderPass) -> Result<()> {
        self.commands.push(SoftCmd::BeginRenderPass(pass.clone()));
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.commands.push(SoftCmd::EndRenderPass);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.commands.push(SoftCmd::SetViewport(viewport));
        Ok(())
    }

    fn set_scissor(&mut self, rect: ScissorRect) -> Result<()> {
        self.commands.push(SoftCmd::SetScissor(rect));
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.commands.push(SoftCmd::BindPipeline(pipeline));
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) -> Result<()> {
        self.commands.push(SoftCmd::BindVertexBuffer {
            slot,
            buffer,
            offset,
        });
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: BufferId,
        format: IndexFormat,
        offset: u64,
    ) -> Result<()> {
        self.commands.push(SoftCmd::BindIndexBuffer {
            buffer,
            format,
            offset,
        });
        Ok(())
    }

    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferId) -> Result<()> {
        self.commands.push(SoftCmd::BindUniformBuffer { slot, buffer });
        Ok(())
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureId, sampler: SamplerId) -> Result<()> {
        self.commands.push(SoftCmd::BindTexture {
            slot,
            texture,
            sampler,
        });
        Ok(())
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.commands.push(SoftCmd::PushConstants {
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn draw(&mut self, params: DrawParams) -> Result<()> {
        self.commands.push(SoftCmd::Draw(params));
        Ok(())
    }

    fn draw_indexed(&mut self, params: DrawIndexedParams) -> Result<()> {
        self.commands.push(SoftCmd::DrawIndexed(params));
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.commands.push(SoftCmd::Dispatch(x, y, z));
        Ok(())
    }

    fn resource_barrier(&mut self, barrier: &ResourceBarrier) -> Result<()> {
        self.commands.push(SoftCmd::Barrier(*barrier));
        Ok(())
    }

    fn begin_debug_group(&mut self, name: &str) -> Result<()> {
        self.commands.push(SoftCmd::BeginDebugGroup(name.to_owned()));
        Ok(())
    }

    fn end_debug_group(&mut self) -> Result<()> {
        self.commands.push(SoftCmd::EndDebugGroup);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}
