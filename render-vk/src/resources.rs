//! Native handles and the recorded command stream.
//!
//! Recording is deferred: the sink buffers the backend-neutral stream and
//! submit translates it into a native command buffer in one pass. That keeps
//! recording thread-safe without sharing the `ash::Device` across threads
//! and gives submit the full stream for layout bookkeeping.

use ash::vk;

use ember_render::command::{DrawIndexedParams, DrawParams, ScissorRect, Viewport};
use ember_render::error::Result;
use ember_render::format::{IndexFormat, TextureFormat, VertexFormat};
use ember_render::memory::MemoryBlock;
use ember_render::registry::{
    BufferHandle, BufferId, PipelineHandle, PipelineId, RenderTargetHandle, SamplerHandle,
    SamplerId, ShaderHandle, TextureHandle, TextureId,
};
use ember_render::renderpass::RenderPass;
use ember_render::shader::ShaderStage;
use ember_render::sync::{ResourceBarrier, ResourceState};
use ember_render::CommandSink;

#[derive(Debug)]
pub struct VkTexture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub aspect: vk::ImageAspectFlags,
    pub block: MemoryBlock,
}

impl TextureHandle for VkTexture {}

#[derive(Debug)]
pub struct VkBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub host_visible: bool,
    pub block: MemoryBlock,
}

impl BufferHandle for VkBuffer {}

#[derive(Debug)]
pub struct VkShader {
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,
}

impl ShaderHandle for VkShader {}

#[derive(Debug)]
pub struct VkPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
}

impl PipelineHandle for VkPipeline {}

#[derive(Debug)]
pub struct VkRenderTarget {
    pub framebuffer: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

impl RenderTargetHandle for VkRenderTarget {}

#[derive(Debug)]
pub struct VkSampler {
    pub sampler: vk::Sampler,
}

impl SamplerHandle for VkSampler {}

//--------------------------------------------------------------------------------------------------

pub(crate) fn texture_format_vk(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Rgb8Unorm => vk::Format::R8G8B8_UNORM,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

pub(crate) fn vertex_format_vk(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float1 => vk::Format::R32_SFLOAT,
        VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Int1 => vk::Format::R32_SINT,
        VertexFormat::Int2 => vk::Format::R32G32_SINT,
        VertexFormat::Int3 => vk::Format::R32G32B32_SINT,
        VertexFormat::Int4 => vk::Format::R32G32B32A32_SINT,
        VertexFormat::Uint1 => vk::Format::R32_UINT,
        VertexFormat::Uint2 => vk::Format::R32G32_UINT,
        VertexFormat::Uint3 => vk::Format::R32G32B32_UINT,
        VertexFormat::Uint4 => vk::Format::R32G32B32A32_UINT,
        VertexFormat::Byte4Norm => vk::Format::R8G8B8A8_SNORM,
        VertexFormat::UByte4Norm => vk::Format::R8G8B8A8_UNORM,
        VertexFormat::Short2Norm => vk::Format::R16G16_SNORM,
        VertexFormat::UShort2Norm => vk::Format::R16G16_UNORM,
        VertexFormat::Half2 => vk::Format::R16G16_SFLOAT,
        VertexFormat::Half4 => vk::Format::R16G16B16A16_SFLOAT,
    }
}

pub(crate) fn index_format_vk(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

pub(crate) fn resource_state_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthStencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ResourceState::General => vk::ImageLayout::GENERAL,
    }
}

pub(crate) fn resource_state_access(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Undefined => vk::AccessFlags::empty(),
        ResourceState::ShaderRead => vk::AccessFlags::SHADER_READ,
        ResourceState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ResourceState::DepthStencil => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ResourceState::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        ResourceState::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::Present => vk::AccessFlags::empty(),
        ResourceState::General => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
    }
}

//--------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub enum VkCmd {
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

#[derive(Debug, Default)]
pub struct VkSink {
    pub commands: Vec<VkCmd>,
}

impl CommandSink for VkSink {
    fn begin(&mut self) -> Result<()> {
        self.commands.clear();
        Ok(())
    }

    fn begin_render_pass(&mut self, pass: &RenderPass) -> Result<()> {
        self.commands.push(VkCmd::BeginRenderPass(pass.clone()));
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.commands.push(VkCmd::EndRenderPass);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.commands.push(VkCmd::SetViewport(viewport));
        Ok(())
    }

    fn set_scissor(&mut self, rect: ScissorRect) -> Result<()> {
        self.commands.push(VkCmd::SetScissor(rect));
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.commands.push(VkCmd::BindPipeline(pipeline));
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) -> Result<()> {
        self.commands.push(VkCmd::BindVertexBuffer {
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
        self.commands.push(VkCmd::BindIndexBuffer {
            buffer,
            format,
            offset,
        });
        Ok(())
    }

    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferId) -> Result<()> {
        self.commands.push(VkCmd::BindUniformBuffer { slot, buffer });
        Ok(())
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureId, sampler: SamplerId) -> Result<()> {
        self.commands.push(VkCmd::BindTexture {
            slot,
            texture,
            sampler,
        });
        Ok(())
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.commands.push(VkCmd::PushConstants {
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn draw(&mut self, params: DrawParams) -> Result<()> {
        self.commands.push(VkCmd::Draw(params));
        Ok(())
    }

    fn draw_indexed(&mut self, params: DrawIndexedParams) -> Result<()> {
        self.commands.push(VkCmd::DrawIndexed(params));
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.commands.push(VkCmd::Dispatch(x, y, z));
        Ok(())
    }

    fn resource_barrier(&mut self, barrier: &ResourceBarrier) -> Result<()> {
        self.commands.push(VkCmd::Barrier(*barrier));
        Ok(())
    }

    fn begin_debug_group(&mut self, name: &str) -> Result<()> {
        self.commands.push(VkCmd::BeginDebugGroup(name.to_owned()));
        Ok(())
    }

    fn end_debug_group(&mut self) -> Result<()> {
        self.commands.push(VkCmd::EndDebugGroup);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}
