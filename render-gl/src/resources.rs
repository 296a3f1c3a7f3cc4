//! GL object handles and the recorded command stream.
//!
//! GL entry points may only be called on the thread owning the context, so
//! the sink records the stream and the device replays it inside submit,
//! which the host drives from the context thread.

use crate::api::types::*;
use ember_render::command::{DrawIndexedParams, DrawParams, ScissorRect, Viewport};
use ember_render::error::Result;
use ember_render::format::IndexFormat;
use ember_render::memory::MemoryBlock;
use ember_render::registry::{
    BufferHandle, BufferId, PipelineHandle, PipelineId, RenderTargetHandle, SamplerHandle,
    SamplerId, ShaderHandle, TextureHandle, TextureId,
};
use ember_render::renderpass::RenderPass;
use ember_render::shader::ShaderStage;
use ember_render::sync::ResourceBarrier;
use ember_render::CommandSink;

#[derive(Debug)]
pub struct GlTexture {
    pub obj: GLuint,
    pub target: GLenum,
    /// Accounting record; released when the texture is destroyed.
    pub block: MemoryBlock,
}

impl TextureHandle for GlTexture {}

#[derive(Debug)]
pub struct GlBuffer {
    pub obj: GLuint,
    pub block: MemoryBlock,
}

impl BufferHandle for GlBuffer {}

#[derive(Debug)]
pub struct GlShader {
    pub obj: GLuint,
    pub stage: ShaderStage,
}

impl ShaderHandle for GlShader {}

/// A linked program plus the vertex array object describing its inputs.
#[derive(Debug)]
pub struct GlPipeline {
    pub program: GLuint,
    pub vao: GLuint,
    pub topology: GLenum,
    /// Stride per vertex-buffer binding slot, applied at bind time.
    pub strides: Vec<GLsizei>,
    pub blend_enabled: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl PipelineHandle for GlPipeline {}

#[derive(Debug)]
pub struct GlRenderTarget {
    pub fbo: GLuint,
}

impl RenderTargetHandle for GlRenderTarget {}

#[derive(Debug)]
pub struct GlSampler {
    pub obj: GLuint,
}

impl SamplerHandle for GlSampler {}

//--------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub enum GlCmd {
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
    BeginDebugGroup(String),
    EndDebugGroup,
}

#[derive(Debug, Default)]
pub struct GlSink {
    pub commands: Vec<GlCmd>,
}

impl CommandSink for GlSink {
    fn begin(&mut self) -> Result<()> {
        self.commands.clear();
        Ok(())
    }

    fn begin_render_pass(&mut self, pass: &RenderPass) -> Result<()> {
        self.commands.push(GlCmd::BeginRenderPass(pass.clone()));
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.commands.push(GlCmd::EndRenderPass);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.commands.push(GlCmd::SetViewport(viewport));
        Ok(())
    }

    fn set_scissor(&mut self, rect: ScissorRect) -> Result<()> {
        self.commands.push(GlCmd::SetScissor(rect));
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.commands.push(GlCmd::BindPipeline(pipeline));
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) -> Result<()> {
        self.commands.push(GlCmd::BindVertexBuffer {
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
        self.commands.push(GlCmd::BindIndexBuffer {
            buffer,
            format,
            offset,
        });
        Ok(())
    }

    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferId) -> Result<()> {
        self.commands.push(GlCmd::BindUniformBuffer { slot, buffer });
        Ok(())
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureId, sampler: SamplerId) -> Result<()> {
        self.commands.push(GlCmd::BindTexture {
            slot,
            texture,
            sampler,
        });
        Ok(())
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.commands.push(GlCmd::PushConstants {
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn draw(&mut self, params: DrawParams) -> Result<()> {
        self.commands.push(GlCmd::Draw(params));
        Ok(())
    }

    fn draw_indexed(&mut self, params: DrawIndexedParams) -> Result<()> {
        self.commands.push(GlCmd::DrawIndexed(params));
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.commands.push(GlCmd::Dispatch(x, y, z));
        Ok(())
    }

    fn resource_barrier(&mut self, _barrier: &ResourceBarrier) -> Result<()> {
        // identity on the GL family: the driver tracks hazards
        Ok(())
    }

    fn begin_debug_group(&mut self, name: &str) -> Result<()> {
        self.commands.push(GlCmd::BeginDebugGroup(name.to_owned()));
        Ok(())
    }

    fn end_debug_group(&mut self) -> Result<()> {
        self.commands.push(GlCmd::EndDebugGroup);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}
