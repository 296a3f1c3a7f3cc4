//! The Vulkan device.
//!
//! Binding model: every pipeline shares one layout; set 0 carries uniform
//! buffers, set 1 combined image samplers, plus one push-constant range.
//! Descriptor sets are carved out of a per-device pool that resets with each
//! submission batch. Pipelines are created against cached render passes
//! keyed by attachment formats; render-pass compatibility makes them valid
//! in every pass with the same attachments.

use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;

use ember_render::base::BackendBase;
use ember_render::buffer::BufferDesc;
use ember_render::command::CommandBuffer;
use ember_render::device::{DeviceEvent, DeviceOptions, GraphicsDevice};
use ember_render::error::{ErrorKind, GraphicsError, Result, Severity};
use ember_render::pipeline::{
    fnv1a_hash, BlendFactor, BlendOp, CompareOp, PipelineDesc, PrimitiveTopology,
};
use ember_render::registry::{
    BufferId, PipelineId, PipelineRecord, RenderTargetId, RenderTargetRecord, SamplerId,
    ShaderId, ShaderRecord, TextureId,
};
use ember_render::renderpass::{PassTarget, RenderTargetDesc};
use ember_render::shader::{self, ShaderDesc, ShaderStage, SourceKind};
use ember_render::swapchain::{SwapchainDesc, SwapchainEvent, SwapchainState};
use ember_render::texture::{
    Filter, MipmapMode, SamplerAddressMode, SamplerDesc, TextureDesc, TextureUsage,
};
use ember_render::{BackendInfo, BackendKind};

use crate::instance::VkContext;
use crate::map_vk_error;
use crate::resources::{
    index_format_vk, resource_state_access, resource_state_layout, texture_format_vk,
    vertex_format_vk, VkBuffer, VkCmd, VkPipeline, VkRenderTarget, VkSampler, VkShader, VkSink,
    VkTexture,
};
use crate::swapchain::VkSwapchain;

const MAX_UNIFORM_SLOTS: u32 = 8;
const MAX_TEXTURE_SLOTS: u32 = 8;
const PUSH_CONSTANT_SIZE: u32 = 128;
const DESCRIPTOR_POOL_SETS: u32 = 512;

struct VkState {
    swapchain: Option<VkSwapchain>,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    uniform_set_layout: vk::DescriptorSetLayout,
    texture_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    /// Offscreen/pipeline-compatibility passes keyed by attachment formats.
    render_pass_cache: FxHashMap<u64, vk::RenderPass>,
    /// Native buffers waiting on their fences, reclaimed opportunistically.
    /// The bool marks pool-owned fences; frame-slot fences belong to the
    /// swap chain and are never reset here.
    in_flight: Vec<(vk::CommandBuffer, vk::Fence, bool)>,
    fence_pool: Vec<vk::Fence>,
    last_fence: Option<vk::Fence>,
}

pub struct VulkanDevice {
    base: BackendBase,
    context: VkContext,
    state: Mutex<VkState>,
    native_pipeline_creations: AtomicU64,
}

impl VulkanDevice {
    pub fn new(options: &DeviceOptions) -> Result<VulkanDevice> {
        let context = VkContext::new(options)?;

        let properties = &context.properties;
        let features = unsafe {
            context
                .instance
                .get_physical_device_features(context.physical)
        };
        let capabilities = crate::capabilities_from_device(
            properties,
            &features,
            context.has_ray_tracing_ext,
            context.has_mesh_shader_ext,
        );

        let mut info = BackendInfo::new(BackendKind::Vulkan);
        let api = properties.api_version;
        info.api_version = format!(
            "Vulkan {}.{}.{}",
            vk::api_version_major(api),
            vk::api_version_minor(api),
            vk::api_version_patch(api)
        );
        info.vendor = format!("0x{:04x}", properties.vendor_id);
        info.device_name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::debug!("{} on {}", info.api_version, info.device_name);

        let device = &context.device;
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(context.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| map_vk_error(e, "create command pool"))?;

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(DESCRIPTOR_POOL_SETS * MAX_UNIFORM_SLOTS),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(DESCRIPTOR_POOL_SETS * MAX_TEXTURE_SLOTS),
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(DESCRIPTOR_POOL_SETS * 2)
            .pool_sizes(&pool_sizes);
        let descriptor_pool =
            unsafe { device.create_descriptor_pool(&descriptor_pool_info, None) }
                .map_err(|e| map_vk_error(e, "create descriptor pool"))?;

        let uniform_bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..MAX_UNIFORM_SLOTS)
            .map(|i| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect();
        let uniform_set_layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&uniform_bindings),
                None,
            )
        }
        .map_err(|e| map_vk_error(e, "create uniform set layout"))?;

        let texture_bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..MAX_TEXTURE_SLOTS)
            .map(|i| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect();
        let texture_set_layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&texture_bindings),
                None,
            )
        }
        .map_err(|e| map_vk_error(e, "create texture set layout"))?;

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE);
        let set_layouts = [uniform_set_layout, texture_set_layout];
        let push_ranges = [push_range];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| map_vk_error(e, "create pipeline layout"))?;

        let base = BackendBase::new(info, capabilities, options.debug_mode);
        base.transition(DeviceEvent::Init)?;
        base.set_dimensions(options.width, options.height);
        base.set_vsync(options.vsync);

        Ok(VulkanDevice {
            base,
            context,
            state: Mutex::new(VkState {
                swapchain: None,
                command_pool,
                descriptor_pool,
                uniform_set_layout,
                texture_set_layout,
                pipeline_layout,
                render_pass_cache: FxHashMap::default(),
                in_flight: Vec::new(),
                fence_pool: Vec::new(),
                last_fence: None,
            }),
            native_pipeline_creations: AtomicU64::new(0),
        })
    }

    pub fn native_pipeline_creations(&self) -> u64 {
        self.native_pipeline_creations.load(Ordering::Relaxed)
    }

    //----------------------------------------------------------------------------------------------
    // Memory + upload plumbing

    fn allocate_bound_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let device = &self.context.device;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| map_vk_error(e, "create buffer"))?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type = match self
            .context
            .find_memory_type(requirements.memory_type_bits, memory_flags)
        {
            Ok(ty) => ty,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(map_vk_error(e, "allocate buffer memory"));
            }
        };
        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(map_vk_error(e, "bind buffer memory"));
        }
        Ok((buffer, memory))
    }

    fn write_host_memory(&self, memory: vk::DeviceMemory, offset: u64, data: &[u8]) -> Result<()> {
        let device = &self.context.device;
        unsafe {
            let ptr = device
                .map_memory(memory, offset, data.len() as u64, vk::MemoryMapFlags::empty())
                .map_err(|e| map_vk_error(e, "map memory"))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            device.unmap_memory(memory);
        }
        Ok(())
    }

    /// Records and synchronously submits a short-lived command buffer; the
    /// transfer path for device-local updates.
    fn one_time_submit(
        &self,
        state: &mut VkState,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<()> {
        let device = &self.context.device;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(state.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cb = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_error(e, "allocate transfer command buffer"))?[0];
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = (|| -> Result<()> {
            unsafe {
                device
                    .begin_command_buffer(cb, &begin)
                    .map_err(|e| map_vk_error(e, "begin transfer"))?;
                record(device, cb);
                device
                    .end_command_buffer(cb)
                    .map_err(|e| map_vk_error(e, "end transfer"))?;
                let buffers = [cb];
                let submit = vk::SubmitInfo::default().command_buffers(&buffers);
                device
                    .queue_submit(self.context.queue, &[submit], vk::Fence::null())
                    .map_err(|e| map_vk_error(e, "submit transfer"))?;
                device
                    .queue_wait_idle(self.context.queue)
                    .map_err(|e| map_vk_error(e, "wait transfer"))?;
            }
            Ok(())
        })();
        unsafe { device.free_command_buffers(state.command_pool, &[cb]) };
        result
    }

    //----------------------------------------------------------------------------------------------
    // Render pass compatibility cache

    fn compatible_render_pass(
        &self,
        state: &mut VkState,
        color_formats: &[vk::Format],
        depth_format: Option<vk::Format>,
        clear: bool,
        present: bool,
    ) -> Result<vk::RenderPass> {
        // same canonical-bytes-into-FNV-1a scheme the contract uses for
        // descriptor compatibility keys
        let mut bytes = Vec::with_capacity(64);
        bytes.push(present as u8);
        bytes.push(clear as u8);
        bytes.extend_from_slice(&(color_formats.len() as u32).to_le_bytes());
        for f in color_formats {
            bytes.extend_from_slice(&f.as_raw().to_le_bytes());
        }
        match depth_format {
            Some(f) => {
                bytes.push(1);
                bytes.extend_from_slice(&f.as_raw().to_le_bytes());
            }
            None => bytes.push(0),
        }
        let key = fnv1a_hash(&bytes);
        if let Some(&pass) = state.render_pass_cache.get(&key) {
            return Ok(pass);
        }

        let load_op = if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        };
        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();
        for (i, &format) in color_formats.iter().enumerate() {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(if clear {
                        vk::ImageLayout::UNDEFINED
                    } else {
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                    })
                    .final_layout(if present {
                        vk::ImageLayout::PRESENT_SRC_KHR
                    } else {
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    }),
            );
            color_refs.push(
                vk::AttachmentReference::default()
                    .attachment(i as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
        }
        let mut depth_ref = vk::AttachmentReference::default();
        if let Some(format) = depth_format {
            depth_ref = vk::AttachmentReference::default()
                .attachment(attachments.len() as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(load_op)
                    .stencil_store_op(vk::AttachmentStoreOp::STORE)
                    .initial_layout(if clear {
                        vk::ImageLayout::UNDEFINED
                    } else {
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                    })
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass];
        let pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let pass = unsafe { self.context.device.create_render_pass(&pass_info, None) }
            .map_err(|e| map_vk_error(e, "create render pass"))?;
        state.render_pass_cache.insert(key, pass);
        Ok(pass)
    }

    //----------------------------------------------------------------------------------------------
    // Submission translation

    /// Frees command buffers whose fences have signalled.
    fn reclaim_completed(&self, state: &mut VkState) -> Result<()> {
        let device = &self.context.device;
        let mut remaining = Vec::new();
        for (cb, fence, owned) in state.in_flight.drain(..) {
            let done = unsafe { device.get_fence_status(fence).unwrap_or(false) };
            if done {
                unsafe {
                    device.free_command_buffers(state.command_pool, &[cb]);
                }
                if state.last_fence == Some(fence) {
                    state.last_fence = None;
                }
                if owned {
                    unsafe {
                        let _ = device.reset_fences(&[fence]);
                    }
                    state.fence_pool.push(fence);
                }
            } else {
                remaining.push((cb, fence, owned));
            }
        }
        state.in_flight = remaining;
        Ok(())
    }

    /// Frees everything unconditionally. Only valid right after
    /// `device_wait_idle`, when no submission can still be running.
    fn reclaim_all_after_idle(&self, state: &mut VkState) {
        let device = &self.context.device;
        for (cb, fence, owned) in state.in_flight.drain(..) {
            unsafe {
                device.free_command_buffers(state.command_pool, &[cb]);
            }
            if owned {
                unsafe {
                    let _ = device.reset_fences(&[fence]);
                }
                state.fence_pool.push(fence);
            }
        }
        state.last_fence = None;
        // nothing references descriptor sets any more either
        unsafe {
            let _ = device.reset_descriptor_pool(
                state.descriptor_pool,
                vk::DescriptorPoolResetFlags::empty(),
            );
        }
    }

    fn take_fence(&self, state: &mut VkState) -> Result<vk::Fence> {
        if let Some(fence) = state.fence_pool.pop() {
            return Ok(fence);
        }
        unsafe {
            self.context
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }
        .map_err(|e| map_vk_error(e, "create fence"))
    }

    fn translate(
        &self,
        state: &mut VkState,
        native: vk::CommandBuffer,
        commands: &[VkCmd],
    ) -> Result<bool> {
        let device = &self.context.device;
        let registry = self.base.registry.lock();
        let mut used_swapchain = false;
        let mut uniforms: [Option<vk::Buffer>; MAX_UNIFORM_SLOTS as usize] =
            [None; MAX_UNIFORM_SLOTS as usize];
        let mut textures: [Option<(vk::ImageView, vk::Sampler)>; MAX_TEXTURE_SLOTS as usize] =
            [None; MAX_TEXTURE_SLOTS as usize];
        let mut bindings_dirty = false;
        let mut bound: Option<vk::PipelineBindPoint> = None;

        for cmd in commands {
            match cmd {
                VkCmd::BeginRenderPass(pass) => {
                    let (render_pass, framebuffer, extent) = match pass.desc.target {
                        PassTarget::SwapChain => {
                            let swapchain = state.swapchain.as_mut().ok_or_else(|| {
                                GraphicsError::new(
                                    ErrorKind::InvalidOperation,
                                    "no swap chain exists",
                                )
                            })?;
                            let index = swapchain.acquire(device)?;
                            used_swapchain = true;
                            (
                                swapchain.render_pass,
                                swapchain.framebuffers[index as usize],
                                swapchain.extent,
                            )
                        }
                        PassTarget::Offscreen(id) => {
                            let record = registry.render_target(id).ok_or_else(|| {
                                GraphicsError::new(
                                    ErrorKind::InvalidResource,
                                    "render target destroyed",
                                )
                            })?;
                            let target = record
                                .handle
                                .downcast_ref::<VkRenderTarget>()
                                .ok_or_else(|| {
                                    GraphicsError::new(
                                        ErrorKind::InvalidResource,
                                        "foreign render target",
                                    )
                                })?;
                            (target.render_pass, target.framebuffer, target.extent)
                        }
                    };

                    let mut clears: Vec<vk::ClearValue> = pass
                        .desc
                        .color_ops
                        .iter()
                        .map(|_| vk::ClearValue {
                            color: vk::ClearColorValue {
                                float32: pass.desc.clear_color,
                            },
                        })
                        .collect();
                    if pass.desc.depth_ops.is_some() {
                        clears.push(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: pass.desc.clear_depth,
                                stencil: pass.desc.clear_stencil,
                            },
                        });
                    }
                    let begin = vk::RenderPassBeginInfo::default()
                        .render_pass(render_pass)
                        .framebuffer(framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent,
                        })
                        .clear_values(&clears);
                    unsafe {
                        device.cmd_begin_render_pass(native, &begin, vk::SubpassContents::INLINE)
                    };
                }
                VkCmd::EndRenderPass => unsafe { device.cmd_end_render_pass(native) },
                VkCmd::SetViewport(v) => unsafe {
                    device.cmd_set_viewport(
                        native,
                        0,
                        &[vk::Viewport {
                            x: v.x,
                            y: v.y,
                            width: v.width,
                            height: v.height,
                            min_depth: v.min_depth,
                            max_depth: v.max_depth,
                        }],
                    );
                },
                VkCmd::SetScissor(rect) => unsafe {
                    device.cmd_set_scissor(
                        native,
                        0,
                        &[vk::Rect2D {
                            offset: vk::Offset2D {
                                x: rect.x,
                                y: rect.y,
                            },
                            extent: vk::Extent2D {
                                width: rect.width,
                                height: rect.height,
                            },
                        }],
                    );
                },
                VkCmd::BindPipeline(id) => {
                    let record = registry.pipeline(*id).ok_or_else(|| {
                        GraphicsError::new(ErrorKind::InvalidResource, "pipeline destroyed")
                    })?;
                    let handle = record.handle.downcast_ref::<VkPipeline>().ok_or_else(|| {
                        GraphicsError::new(ErrorKind::InvalidResource, "foreign pipeline")
                    })?;
                    unsafe {
                        device.cmd_bind_pipeline(native, handle.bind_point, handle.pipeline)
                    };
                    bound = Some(handle.bind_point);
                }
                VkCmd::BindVertexBuffer {
                    slot,
                    buffer,
                    offset,
                } => {
                    let handle = buffer_handle(&registry, *buffer)?;
                    unsafe {
                        device.cmd_bind_vertex_buffers(native, *slot, &[handle.buffer], &[*offset])
                    };
                }
                VkCmd::BindIndexBuffer {
                    buffer,
                    format,
                    offset,
                } => {
                    let handle = buffer_handle(&registry, *buffer)?;
                    unsafe {
                        device.cmd_bind_index_buffer(
                            native,
                            handle.buffer,
                            *offset,
                            index_format_vk(*format),
                        )
                    };
                }
                VkCmd::BindUniformBuffer { slot, buffer } => {
                    if *slot >= MAX_UNIFORM_SLOTS {
                        return Err(GraphicsError::new(
                            ErrorKind::ResourceNotBound,
                            format!("uniform slot {} exceeds {}", slot, MAX_UNIFORM_SLOTS),
                        ));
                    }
                    let handle = buffer_handle(&registry, *buffer)?;
                    uniforms[*slot as usize] = Some(handle.buffer);
                    bindings_dirty = true;
                }
                VkCmd::BindTexture {
                    slot,
                    texture,
                    sampler,
                } => {
                    if *slot >= MAX_TEXTURE_SLOTS {
                        return Err(GraphicsError::new(
                            ErrorKind::ResourceNotBound,
                            format!("texture slot {} exceeds {}", slot, MAX_TEXTURE_SLOTS),
                        ));
                    }
                    let view = registry
                        .texture(*texture)
                        .and_then(|r| r.handle.downcast_ref::<VkTexture>())
                        .map(|t| t.view)
                        .ok_or_else(|| {
                            GraphicsError::new(ErrorKind::InvalidResource, "texture destroyed")
                        })?;
                    let sampler = registry
                        .sampler(*sampler)
                        .and_then(|r| r.handle.downcast_ref::<VkSampler>())
                        .map(|s| s.sampler)
                        .ok_or_else(|| {
                            GraphicsError::new(ErrorKind::InvalidResource, "sampler destroyed")
                        })?;
                    textures[*slot as usize] = Some((view, sampler));
                    bindings_dirty = true;
                }
                VkCmd::PushConstants { offset, data } => unsafe {
                    device.cmd_push_constants(
                        native,
                        state.pipeline_layout,
                        vk::ShaderStageFlags::ALL,
                        *offset,
                        data,
                    );
                },
                VkCmd::Draw(params) => {
                    if bindings_dirty {
                        self.flush_bindings(state, native, &uniforms, &textures, bound)?;
                        bindings_dirty = false;
                    }
                    unsafe {
                        device.cmd_draw(
                            native,
                            params.vertex_count,
                            params.instance_count,
                            params.first_vertex,
                            params.first_instance,
                        )
                    };
                }
                VkCmd::DrawIndexed(params) => {
                    if bindings_dirty {
                        self.flush_bindings(state, native, &uniforms, &textures, bound)?;
                        bindings_dirty = false;
                    }
                    unsafe {
                        device.cmd_draw_indexed(
                            native,
                            params.index_count,
                            params.instance_count,
                            params.first_index,
                            params.vertex_offset,
                            params.first_instance,
                        )
                    };
                }
                VkCmd::Dispatch(x, y, z) => {
                    if bindings_dirty {
                        self.flush_bindings(state, native, &uniforms, &textures, bound)?;
                        bindings_dirty = false;
                    }
                    unsafe { device.cmd_dispatch(native, *x, *y, *z) };
                }
                VkCmd::Barrier(barrier) => {
                    if let ember_render::ResourceId::Texture(id) = barrier.resource {
                        let handle = registry
                            .texture(id)
                            .and_then(|r| r.handle.downcast_ref::<VkTexture>())
                            .ok_or_else(|| {
                                GraphicsError::new(ErrorKind::InvalidResource, "texture destroyed")
                            })?;
                        let range = vk::ImageSubresourceRange::default()
                            .aspect_mask(handle.aspect)
                            .base_mip_level(barrier.subresource.base_mip)
                            .level_count(
                                barrier.subresource.mip_count.unwrap_or(vk::REMAINING_MIP_LEVELS),
                            )
                            .base_array_layer(barrier.subresource.base_layer)
                            .layer_count(
                                barrier
                                    .subresource
                                    .layer_count
                                    .unwrap_or(vk::REMAINING_ARRAY_LAYERS),
                            );
                        let image_barrier = vk::ImageMemoryBarrier::default()
                            .src_access_mask(resource_state_access(barrier.old_state))
                            .dst_access_mask(resource_state_access(barrier.new_state))
                            .old_layout(resource_state_layout(barrier.old_state))
                            .new_layout(resource_state_layout(barrier.new_state))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(handle.image)
                            .subresource_range(range);
                        unsafe {
                            device.cmd_pipeline_barrier(
                                native,
                                vk::PipelineStageFlags::ALL_COMMANDS,
                                vk::PipelineStageFlags::ALL_COMMANDS,
                                vk::DependencyFlags::empty(),
                                &[],
                                &[],
                                &[image_barrier],
                            );
                        }
                    } else {
                        let memory_barrier = vk::MemoryBarrier::default()
                            .src_access_mask(resource_state_access(barrier.old_state))
                            .dst_access_mask(resource_state_access(barrier.new_state));
                        unsafe {
                            device.cmd_pipeline_barrier(
                                native,
                                vk::PipelineStageFlags::ALL_COMMANDS,
                                vk::PipelineStageFlags::ALL_COMMANDS,
                                vk::DependencyFlags::empty(),
                                &[memory_barrier],
                                &[],
                                &[],
                            );
                        }
                    }
                }
                VkCmd::BeginDebugGroup(name) => {
                    self.base.enter_debug_group(name);
                }
                VkCmd::EndDebugGroup => {
                    self.base.leave_debug_group();
                }
            }
        }
        Ok(used_swapchain)
    }

    fn flush_bindings(
        &self,
        state: &mut VkState,
        native: vk::CommandBuffer,
        uniforms: &[Option<vk::Buffer>],
        textures: &[Option<(vk::ImageView, vk::Sampler)>],
        bound: Option<vk::PipelineBindPoint>,
    ) -> Result<()> {
        let device = &self.context.device;
        let bind_point = bound.unwrap_or(vk::PipelineBindPoint::GRAPHICS);

        let layouts = [state.uniform_set_layout, state.texture_set_layout];
        let alloc = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(state.descriptor_pool)
            .set_layouts(&layouts);
        let sets = match unsafe { device.allocate_descriptor_sets(&alloc) } {
            Ok(sets) => sets,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                // drain the queue so no in-flight buffer references the old
                // sets, then recycle the whole pool
                unsafe {
                    device
                        .queue_wait_idle(self.context.queue)
                        .map_err(|e| map_vk_error(e, "wait before descriptor pool reset"))?;
                    device
                        .reset_descriptor_pool(
                            state.descriptor_pool,
                            vk::DescriptorPoolResetFlags::empty(),
                        )
                        .map_err(|e| map_vk_error(e, "reset descriptor pool"))?;
                    device
                        .allocate_descriptor_sets(&alloc)
                        .map_err(|e| map_vk_error(e, "allocate descriptor sets"))?
                }
            }
            Err(e) => return Err(map_vk_error(e, "allocate descriptor sets")),
        };

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for (slot, buffer) in uniforms.iter().enumerate() {
            if let Some(buffer) = buffer {
                buffer_infos.push((
                    slot as u32,
                    vk::DescriptorBufferInfo::default()
                        .buffer(*buffer)
                        .offset(0)
                        .range(vk::WHOLE_SIZE),
                ));
            }
        }
        for (slot, entry) in textures.iter().enumerate() {
            if let Some((view, sampler)) = entry {
                image_infos.push((
                    slot as u32,
                    vk::DescriptorImageInfo::default()
                        .image_view(*view)
                        .sampler(*sampler)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                ));
            }
        }

        let mut writes = Vec::new();
        for (slot, info) in &buffer_infos {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(sets[0])
                    .dst_binding(*slot)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }
        for (slot, info) in &image_infos {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(sets[1])
                    .dst_binding(*slot)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        unsafe {
            device.update_descriptor_sets(&writes, &[]);
            device.cmd_bind_descriptor_sets(
                native,
                bind_point,
                state.pipeline_layout,
                0,
                &sets,
                &[],
            );
        }
        Ok(())
    }
}

fn buffer_handle<'a>(
    registry: &'a ember_render::ResourceRegistry,
    id: BufferId,
) -> Result<&'a VkBuffer> {
    registry
        .buffer(id)
        .and_then(|r| r.handle.downcast_ref::<VkBuffer>())
        .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "buffer destroyed"))
}

fn blend_factor_vk(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

fn blend_op_vk(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

fn compare_op_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

fn topology_vk(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

fn shader_stage_vk(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessEval => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
    }
}

//--------------------------------------------------------------------------------------------------

impl VulkanDevice {
    fn texture_usage_vk(usage: TextureUsage, depth: bool) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if usage.contains(TextureUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        }
        if usage.contains(TextureUsage::RENDER_TARGET) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if usage.contains(TextureUsage::DEPTH_STENCIL) || depth {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if usage.contains(TextureUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if usage.contains(TextureUsage::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if usage.contains(TextureUsage::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        flags
    }

    fn create_texture_internal(&self, desc: &TextureDesc) -> Result<TextureId> {
        desc.validate()?;
        let max = self.base.capabilities.max_texture_size;
        if desc.width > max || desc.height > max {
            return self.base.errors.fail(
                Severity::Error,
                ErrorKind::FeatureNotSupported,
                format!("texture extent exceeds device limit {}", max),
            );
        }
        let device = &self.context.device;
        let format = texture_format_vk(desc.format);
        let depth = desc.format.is_depth_stencil();
        let aspect = if depth {
            let mut aspect = vk::ImageAspectFlags::DEPTH;
            if desc.format == ember_render::TextureFormat::Depth24Stencil8 {
                aspect |= vk::ImageAspectFlags::STENCIL;
            }
            aspect
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers.max(1))
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(Self::texture_usage_vk(desc.usage, depth))
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|e| map_vk_error(e, "create image"))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type = match self
            .context
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        {
            Ok(ty) => ty,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(map_vk_error(e, "allocate image memory"));
            }
        };
        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(map_vk_error(e, "bind image memory"));
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(desc.mip_levels)
                    .base_array_layer(0)
                    .layer_count(desc.array_layers.max(1)),
            );
        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(map_vk_error(e, "create image view"));
            }
        };

        let block = self.base.device_local.on_alloc(requirements.size);
        Ok(self.base.register_texture(
            desc.clone(),
            Box::new(VkTexture {
                image,
                view,
                memory,
                aspect,
                block,
            }),
        ))
    }

    fn destroy_texture_handle(&self, handle: VkTexture) {
        let device = &self.context.device;
        unsafe {
            device.destroy_image_view(handle.view, None);
            device.destroy_image(handle.image, None);
            device.free_memory(handle.memory, None);
        }
        self.base.device_local.on_free(handle.block);
    }
}

impl GraphicsDevice for VulkanDevice {
    fn base(&self) -> &BackendBase {
        &self.base
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        self.base.ensure_live()?;
        self.create_texture_internal(desc)
    }

    fn destroy_texture(&self, texture: TextureId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_texture(texture)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "texture not live"))?;
        if let Ok(handle) = record.handle.downcast::<VkTexture>() {
            self.destroy_texture_handle(*handle);
        }
        Ok(())
    }

    fn update_texture(&self, texture: TextureId, mip_level: u32, data: &[u8]) -> Result<()> {
        self.base.ensure_live()?;
        let (image, aspect, desc) = {
            let registry = self.base.registry.lock();
            let record = registry
                .texture(texture)
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "texture not live"))?;
            let handle = record
                .handle
                .downcast_ref::<VkTexture>()
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign texture"))?;
            (handle.image, handle.aspect, record.desc.clone())
        };
        if mip_level >= desc.mip_levels {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                format!("mip level {} out of range", mip_level),
            ));
        }
        let expected =
            desc.format
                .mip_level_size(desc.width, desc.height, desc.depth, mip_level) as usize;
        if data.len() != expected {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                format!("mip {} expects {} bytes, got {}", mip_level, expected, data.len()),
            ));
        }

        // staging buffer, copy, transition to shader read
        let (staging, staging_memory) = self.allocate_bound_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        self.write_host_memory(staging_memory, 0, data)?;

        let width = (desc.width >> mip_level).max(1);
        let height = (desc.height >> mip_level).max(1);
        let mut state = self.state.lock();
        let result = self.one_time_submit(&mut state, |device, cb| {
            let range = vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(mip_level)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1);
            let to_transfer = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range);
            unsafe {
                device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(aspect)
                            .mip_level(mip_level)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    });
                device.cmd_copy_buffer_to_image(
                    cb,
                    staging,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                let to_read = vk::ImageMemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(range);
                device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_read],
                );
            }
        });
        drop(state);
        unsafe {
            self.context.device.destroy_buffer(staging, None);
            self.context.device.free_memory(staging_memory, None);
        }
        result
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId> {
        self.base.ensure_live()?;
        desc.validate()?;
        let mut usage = vk::BufferUsageFlags::TRANSFER_DST;
        if desc.usage.contains(ember_render::BufferUsage::VERTEX) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if desc.usage.contains(ember_render::BufferUsage::INDEX) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if desc.usage.contains(ember_render::BufferUsage::UNIFORM) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if desc.usage.contains(ember_render::BufferUsage::STORAGE) {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if desc.usage.contains(ember_render::BufferUsage::TRANSFER_SRC) {
            usage |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if desc.usage.contains(ember_render::BufferUsage::INDIRECT) {
            usage |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        let host_visible = desc.memory.is_host_visible();
        let memory_flags = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let (buffer, memory) = self.allocate_bound_buffer(desc.size, usage, memory_flags)?;
        let block = self.base.device_local.on_alloc(desc.size);
        Ok(self.base.register_buffer(
            desc.clone(),
            Box::new(VkBuffer {
                buffer,
                memory,
                host_visible,
                block,
            }),
        ))
    }

    fn destroy_buffer(&self, buffer: BufferId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_buffer(buffer)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "buffer not live"))?;
        if let Ok(handle) = record.handle.downcast::<VkBuffer>() {
            unsafe {
                self.context.device.destroy_buffer(handle.buffer, None);
                self.context.device.free_memory(handle.memory, None);
            }
            self.base.device_local.on_free(handle.block);
        }
        Ok(())
    }

    fn update_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.base.ensure_live()?;
        let (target, memory, host_visible, size) = {
            let registry = self.base.registry.lock();
            let record = registry
                .buffer(buffer)
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "buffer not live"))?;
            let handle = record
                .handle
                .downcast_ref::<VkBuffer>()
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign buffer"))?;
            (handle.buffer, handle.memory, handle.host_visible, record.desc.size)
        };
        if offset + data.len() as u64 > size {
            return Err(GraphicsError::new(
                ErrorKind::InvalidMemoryAccess,
                format!(
                    "write of {} bytes at {} exceeds buffer size {}",
                    data.len(),
                    offset,
                    size
                ),
            ));
        }

        if host_visible {
            return self.write_host_memory(memory, offset, data);
        }

        // staging path for device-local buffers
        let (staging, staging_memory) = self.allocate_bound_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        self.write_host_memory(staging_memory, 0, data)?;
        let mut state = self.state.lock();
        let result = self.one_time_submit(&mut state, |device, cb| {
            let region = vk::BufferCopy::default()
                .src_offset(0)
                .dst_offset(offset)
                .size(data.len() as u64);
            unsafe { device.cmd_copy_buffer(cb, staging, target, &[region]) };
        });
        drop(state);
        unsafe {
            self.context.device.destroy_buffer(staging, None);
            self.context.device.free_memory(staging_memory, None);
        }
        result
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId> {
        self.base.ensure_live()?;
        let address = |mode: SamplerAddressMode| match mode {
            SamplerAddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerAddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
            SamplerAddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        };
        let filter = |f: Filter| match f {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        };
        let mipmap = match desc.mipmap_mode {
            MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
        };
        let info = vk::SamplerCreateInfo::default()
            .address_mode_u(address(desc.addr_u))
            .address_mode_v(address(desc.addr_v))
            .address_mode_w(address(desc.addr_w))
            .min_filter(filter(desc.min_filter))
            .mag_filter(filter(desc.mag_filter))
            .mipmap_mode(mipmap)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { self.context.device.create_sampler(&info, None) }
            .map_err(|e| map_vk_error(e, "create sampler"))?;
        Ok(self
            .base
            .registry
            .lock()
            .register_sampler(*desc, Box::new(VkSampler { sampler })))
    }

    fn destroy_sampler(&self, sampler: SamplerId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_sampler(sampler)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "sampler not live"))?;
        if let Ok(handle) = record.handle.downcast::<VkSampler>() {
            unsafe { self.context.device.destroy_sampler(handle.sampler, None) };
        }
        Ok(())
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<ShaderId> {
        self.base.ensure_live()?;
        let kind = match desc.kind {
            Some(kind) => kind,
            None => shader::detect_source_kind(desc.source.as_bytes(), desc.path.as_deref())
                .ok_or_else(|| {
                    GraphicsError::new(
                        ErrorKind::ShaderCompilationFailed,
                        "unable to detect shader source kind",
                    )
                })?,
        };
        let stage = match desc.stage {
            Some(stage) => stage,
            None => shader::detect_stage(desc.source.as_text(), desc.path.as_deref()).ok_or_else(
                || {
                    GraphicsError::new(
                        ErrorKind::ShaderCompilationFailed,
                        "unable to detect shader stage",
                    )
                },
            )?,
        };
        if kind != SourceKind::SpirV {
            return self.base.errors.fail(
                Severity::Error,
                ErrorKind::ShaderCompilationFailed,
                format!(
                    "{:?} source reached the Vulkan backend; compile to SPIR-V first",
                    kind
                ),
            );
        }

        let words = ash::util::read_spv(&mut std::io::Cursor::new(desc.source.as_bytes()))
            .map_err(|e| {
                GraphicsError::new(
                    ErrorKind::ShaderCompilationFailed,
                    format!("malformed SPIR-V: {}", e),
                )
            })?;
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { self.context.device.create_shader_module(&info, None) }
            .map_err(|e| map_vk_error(e, "create shader module"))?;

        let record = ShaderRecord {
            stage,
            kind,
            entry_point: desc.options.entry_point.clone(),
            reflection: None,
            name: desc.debug_name.clone(),
            handle: Box::new(VkShader { module, stage }),
        };
        Ok(self.base.registry.lock().register_shader(record))
    }

    fn destroy_shader(&self, shader: ShaderId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_shader(shader)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "shader not live"))?;
        if let Ok(handle) = record.handle.downcast::<VkShader>() {
            unsafe {
                self.context
                    .device
                    .destroy_shader_module(handle.module, None)
            };
        }
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId> {
        self.base.ensure_live()?;
        self.base.pipeline_cache.get_or_create(desc, |cache_key| {
            self.native_pipeline_creations.fetch_add(1, Ordering::Relaxed);
            let mut state = self.state.lock();
            let pipeline = self.create_pipeline_native(&mut state, desc)?;
            let record = PipelineRecord {
                desc: desc.clone(),
                cache_key,
                name: desc.debug_name.clone(),
                handle: Box::new(pipeline),
            };
            Ok(self.base.registry.lock().register_pipeline(record))
        })
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_pipeline(pipeline)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "pipeline not live"))?;
        self.base.pipeline_cache.forget(pipeline);
        if let Ok(handle) = record.handle.downcast::<VkPipeline>() {
            unsafe { self.context.device.destroy_pipeline(handle.pipeline, None) };
        }
        Ok(())
    }

    fn create_render_target(&self, desc: &RenderTargetDesc) -> Result<RenderTargetId> {
        self.base.ensure_live()?;
        desc.validate(self.base.capabilities.max_render_targets)?;

        let mut color_textures = Vec::with_capacity(desc.color_formats.len());
        for format in &desc.color_formats {
            let tex_desc = TextureDesc::new(desc.width, desc.height, *format)
                .with_usage(TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED);
            color_textures.push(self.create_texture_internal(&tex_desc)?);
        }
        let depth_texture = match desc.depth_format {
            Some(format) => {
                let tex_desc = TextureDesc::new(desc.width, desc.height, format)
                    .with_usage(TextureUsage::DEPTH_STENCIL);
                Some(self.create_texture_internal(&tex_desc)?)
            }
            None => None,
        };

        let color_formats: Vec<vk::Format> = desc
            .color_formats
            .iter()
            .map(|f| texture_format_vk(*f))
            .collect();
        let depth_format = desc.depth_format.map(texture_format_vk);
        let mut state = self.state.lock();
        let render_pass =
            self.compatible_render_pass(&mut state, &color_formats, depth_format, true, false)?;
        drop(state);

        let views: Vec<vk::ImageView> = {
            let registry = self.base.registry.lock();
            color_textures
                .iter()
                .copied()
                .chain(depth_texture)
                .filter_map(|id| {
                    registry
                        .texture(id)
                        .and_then(|r| r.handle.downcast_ref::<VkTexture>())
                        .map(|t| t.view)
                })
                .collect()
        };
        let fb_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(desc.width)
            .height(desc.height)
            .layers(1);
        let framebuffer = unsafe { self.context.device.create_framebuffer(&fb_info, None) }
            .map_err(|e| map_vk_error(e, "create framebuffer"))?;

        let record = RenderTargetRecord {
            desc: desc.clone(),
            color_textures,
            depth_texture,
            name: desc.debug_name.clone(),
            handle: Box::new(VkRenderTarget {
                framebuffer,
                render_pass,
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
            }),
        };
        Ok(self.base.registry.lock().register_render_target(record))
    }

    fn destroy_render_target(&self, target: RenderTargetId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_render_target(target)
            .ok_or_else(|| {
                GraphicsError::new(ErrorKind::InvalidResource, "render target not live")
            })?;
        if let Ok(handle) = record.handle.downcast::<VkRenderTarget>() {
            // the render pass stays in the device cache
            unsafe {
                self.context
                    .device
                    .destroy_framebuffer(handle.framebuffer, None)
            };
        }
        for texture in record
            .color_textures
            .iter()
            .copied()
            .chain(record.depth_texture)
        {
            self.destroy_texture(texture)?;
        }
        Ok(())
    }

    //----------------------------------------------------------------------------------------------

    fn create_swap_chain(&self, desc: &SwapchainDesc) -> Result<()> {
        self.base.ensure_live()?;
        desc.validate()?;
        let mut state = self.state.lock();
        unsafe {
            let _ = self.context.device.device_wait_idle();
        }
        self.reclaim_all_after_idle(&mut state);
        if let Some(mut old) = state.swapchain.take() {
            old.destroy(&self.context.device);
        }
        let swapchain = VkSwapchain::new(&self.context, desc)?;
        self.base
            .set_dimensions(swapchain.extent.width, swapchain.extent.height);
        self.base.set_vsync(desc.vsync);
        state.swapchain = Some(swapchain);
        Ok(())
    }

    fn resize_swap_chain(&self, width: u32, height: u32) -> Result<()> {
        self.base.ensure_live()?;
        let mut state = self.state.lock();
        let swapchain = state.swapchain.as_mut().ok_or_else(|| {
            GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain to resize")
        })?;
        if width == 0 || height == 0 {
            swapchain.state = swapchain.state.transition(SwapchainEvent::ResizeZero)?;
            return Ok(());
        }
        let _ = swapchain.state.transition(SwapchainEvent::Resize)?;
        let mut desc = swapchain.desc.clone();
        desc.width = width;
        desc.height = height;

        unsafe {
            self.context
                .device
                .device_wait_idle()
                .map_err(|e| map_vk_error(e, "wait idle before resize"))?;
        }
        self.reclaim_all_after_idle(&mut state);
        if let Some(mut old) = state.swapchain.take() {
            old.destroy(&self.context.device);
        }
        let swapchain = VkSwapchain::new(&self.context, &desc)?;
        self.base
            .set_dimensions(swapchain.extent.width, swapchain.extent.height);
        state.swapchain = Some(swapchain);
        Ok(())
    }

    fn swap_chain_state(&self) -> SwapchainState {
        self.state
            .lock()
            .swapchain
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SwapchainState::Uninitialised)
    }

    fn present(&self) -> Result<()> {
        self.base.ensure_live()?;
        let mut state = self.state.lock();
        self.reclaim_completed(&mut state)?;
        let swapchain = state.swapchain.as_mut().ok_or_else(|| {
            GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain to present")
        })?;
        match swapchain.state {
            SwapchainState::Minimised => return Ok(()),
            SwapchainState::Ready => {}
            SwapchainState::OutOfDate => {
                return Err(GraphicsError::new(
                    ErrorKind::SwapChainOutOfDate,
                    "swap chain needs recreation",
                ))
            }
            other => {
                return Err(GraphicsError::new(
                    ErrorKind::InvalidOperation,
                    format!("present on a {:?} swap chain", other),
                ))
            }
        }

        let index = match swapchain.acquired.take() {
            Some(index) => index,
            None => {
                // nothing rendered this frame; skip the present entirely
                return Ok(());
            }
        };
        let frame = swapchain.current_frame;
        let wait = [swapchain.sync[frame].render_finished];
        let swapchains = [swapchain.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let queue = self.context.queue;
        let result = unsafe { swapchain.loader.queue_present(queue, &present_info) };
        swapchain.current_frame = (frame + 1) % swapchain.sync.len();

        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("present reports suboptimal swapchain");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
                swapchain.state = swapchain.state.transition(SwapchainEvent::PresentFailed)?;
                Err(GraphicsError::new(
                    ErrorKind::SwapChainOutOfDate,
                    "swap chain out of date at present",
                ))
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                let _ = self.base.transition(DeviceEvent::Lose);
                self.base.errors.record(
                    Severity::Critical,
                    ErrorKind::DeviceLost,
                    "device lost at present",
                );
                Err(GraphicsError::new(ErrorKind::DeviceLost, "device lost at present"))
            }
            Err(e) => Err(map_vk_error(e, "present")),
        }
    }

    //----------------------------------------------------------------------------------------------

    fn create_command_buffer(&self) -> Result<CommandBuffer> {
        self.base.ensure_live()?;
        Ok(CommandBuffer::new(
            self.base.next_command_buffer_id(),
            Box::new(VkSink::default()),
        ))
    }

    fn submit_command_buffer(&self, cb: &mut CommandBuffer) -> Result<()> {
        self.base.ensure_live()?;

        {
            let registry = self.base.registry.lock();
            for id in cb.used_resources() {
                if !registry.contains(id) {
                    return self.base.errors.fail(
                        Severity::Error,
                        ErrorKind::InvalidCommandBuffer,
                        format!("command buffer references destroyed resource {:?}", id),
                    );
                }
            }
        }

        cb.mark_submitted()?;
        let commands = {
            let sink = cb.sink_as::<VkSink>().ok_or_else(|| {
                GraphicsError::new(ErrorKind::InvalidCommandBuffer, "foreign sink")
            })?;
            std::mem::take(&mut sink.commands)
        };

        let device = &self.context.device;
        let mut state = self.state.lock();
        self.reclaim_completed(&mut state)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(state.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let native = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_error(e, "allocate command buffer"))?[0];

        let translate_result = (|| -> Result<bool> {
            unsafe {
                device
                    .begin_command_buffer(native, &vk::CommandBufferBeginInfo::default())
                    .map_err(|e| map_vk_error(e, "begin command buffer"))?;
            }
            let used_swapchain = self.translate(&mut state, native, &commands)?;
            unsafe {
                device
                    .end_command_buffer(native)
                    .map_err(|e| map_vk_error(e, "end command buffer"))?;
            }
            Ok(used_swapchain)
        })();

        let used_swapchain = match translate_result {
            Ok(used) => used,
            Err(e) => {
                unsafe { device.free_command_buffers(state.command_pool, &[native]) };
                cb.mark_completed()?;
                self.base.errors.record(
                    Severity::Error,
                    ErrorKind::CommandSubmissionFailed,
                    e.message.clone(),
                );
                return Err(GraphicsError::new(
                    ErrorKind::CommandSubmissionFailed,
                    e.message,
                ));
            }
        };

        let buffers = [native];
        let first_swapchain_use = used_swapchain
            && state
                .swapchain
                .as_ref()
                .map(|s| s.semaphores_pending)
                .unwrap_or(false);
        let (fence, owned, submit_result) = if first_swapchain_use {
            let swapchain = state.swapchain.as_mut().unwrap();
            swapchain.semaphores_pending = false;
            let frame = swapchain.current_frame;
            // the frame slot's fence paces the acquire of this slot
            let fence = swapchain.sync[frame].in_flight;
            let waits = [swapchain.sync[frame].image_available];
            let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let signals = [swapchain.sync[frame].render_finished];
            let submit = vk::SubmitInfo::default()
                .wait_semaphores(&waits)
                .wait_dst_stage_mask(&stages)
                .command_buffers(&buffers)
                .signal_semaphores(&signals);
            let result = unsafe { device.queue_submit(self.context.queue, &[submit], fence) };
            (fence, false, result)
        } else {
            let fence = self.take_fence(&mut state)?;
            let submit = vk::SubmitInfo::default().command_buffers(&buffers);
            let result = unsafe { device.queue_submit(self.context.queue, &[submit], fence) };
            (fence, true, result)
        };

        if let Err(e) = submit_result {
            unsafe { device.free_command_buffers(state.command_pool, &[native]) };
            if owned {
                state.fence_pool.push(fence);
            }
            cb.mark_completed()?;
            if e == vk::Result::ERROR_DEVICE_LOST {
                let _ = self.base.transition(DeviceEvent::Lose);
            }
            return Err(map_vk_error(e, "queue submit"));
        }
        state.in_flight.push((native, fence, owned));
        state.last_fence = Some(fence);

        {
            let mut profiler = self.base.profiler.lock();
            if let Some(counters) = profiler.counters_mut() {
                counters.merge(cb.counters());
            }
        }
        drop(state);

        // the driver owns the work now; the wrapper's pending state is
        // cleared once the fence is observed, which wait_for_fence and
        // wait_idle do on the caller's behalf
        cb.mark_completed()?;
        Ok(())
    }

    fn wait_for_fence(&self, timeout_ns: u64) -> Result<bool> {
        self.base.ensure_live()?;
        let mut state = self.state.lock();
        let Some(fence) = state.last_fence else {
            return Ok(true);
        };
        let result =
            unsafe { self.context.device.wait_for_fences(&[fence], true, timeout_ns) };
        match result {
            Ok(()) => {
                self.reclaim_completed(&mut state)?;
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(map_vk_error(e, "wait for fence")),
        }
    }

    fn wait_idle(&self) -> Result<()> {
        self.base.ensure_live()?;
        unsafe {
            self.context
                .device
                .device_wait_idle()
                .map_err(|e| map_vk_error(e, "device wait idle"))?;
        }
        let mut state = self.state.lock();
        self.reclaim_all_after_idle(&mut state);
        Ok(())
    }

    //----------------------------------------------------------------------------------------------

    fn deinit(&mut self) -> Result<()> {
        if self.base.state() == ember_render::DeviceState::Destroyed {
            return Ok(());
        }
        let device = &self.context.device;
        unsafe {
            let _ = device.device_wait_idle();
        }

        let mut state = self.state.lock();
        self.reclaim_all_after_idle(&mut state);

        let mut registry = self.base.registry.lock();
        for (_, record) in registry.drain_render_targets() {
            if let Ok(handle) = record.handle.downcast::<VkRenderTarget>() {
                unsafe { device.destroy_framebuffer(handle.framebuffer, None) };
            }
        }
        for (_, record) in registry.drain_pipelines() {
            if let Ok(handle) = record.handle.downcast::<VkPipeline>() {
                unsafe { device.destroy_pipeline(handle.pipeline, None) };
            }
        }
        for (_, record) in registry.drain_shaders() {
            if let Ok(handle) = record.handle.downcast::<VkShader>() {
                unsafe { device.destroy_shader_module(handle.module, None) };
            }
        }
        for (_, record) in registry.drain_samplers() {
            if let Ok(handle) = record.handle.downcast::<VkSampler>() {
                unsafe { device.destroy_sampler(handle.sampler, None) };
            }
        }
        for (_, record) in registry.drain_buffers() {
            if let Ok(handle) = record.handle.downcast::<VkBuffer>() {
                unsafe {
                    device.destroy_buffer(handle.buffer, None);
                    device.free_memory(handle.memory, None);
                }
                self.base.device_local.on_free(handle.block);
            }
        }
        for (_, record) in registry.drain_textures() {
            if let Ok(handle) = record.handle.downcast::<VkTexture>() {
                unsafe {
                    device.destroy_image_view(handle.view, None);
                    device.destroy_image(handle.image, None);
                    device.free_memory(handle.memory, None);
                }
                self.base.device_local.on_free(handle.block);
            }
        }
        drop(registry);

        self.base.pipeline_cache.clear();

        if let Some(mut swapchain) = state.swapchain.take() {
            swapchain.destroy(device);
        }
        for (_, pass) in state.render_pass_cache.drain() {
            unsafe { device.destroy_render_pass(pass, None) };
        }
        for fence in state.fence_pool.drain(..) {
            unsafe { device.destroy_fence(fence, None) };
        }
        unsafe {
            device.destroy_descriptor_pool(state.descriptor_pool, None);
            device.destroy_pipeline_layout(state.pipeline_layout, None);
            device.destroy_descriptor_set_layout(state.uniform_set_layout, None);
            device.destroy_descriptor_set_layout(state.texture_set_layout, None);
            device.destroy_command_pool(state.command_pool, None);
        }
        drop(state);

        self.context.destroy();
        self.base.transition(DeviceEvent::Destroy)?;
        log::info!("Vulkan device destroyed");
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if self.base.state() == ember_render::DeviceState::Live {
            let _ = self.deinit();
        }
    }
}

//--------------------------------------------------------------------------------------------------

impl VulkanDevice {
    fn create_pipeline_native(
        &self,
        state: &mut VkState,
        desc: &PipelineDesc,
    ) -> Result<VkPipeline> {
        let device = &self.context.device;
        let registry = self.base.registry.lock();

        let entry_point = std::ffi::CString::new("main").unwrap();
        let mut stages: Vec<vk::PipelineShaderStageCreateInfo> = Vec::new();
        let shader_ids = [
            desc.vertex_shader,
            desc.fragment_shader,
            desc.geometry_shader,
            desc.tess_control_shader,
            desc.tess_eval_shader,
            desc.compute_shader,
        ];
        for id in shader_ids.into_iter().flatten() {
            let record = registry.shader(id).ok_or_else(|| {
                GraphicsError::new(
                    ErrorKind::InvalidResource,
                    "pipeline references a destroyed shader",
                )
            })?;
            let handle = record
                .handle
                .downcast_ref::<VkShader>()
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign shader"))?;
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader_stage_vk(handle.stage))
                    .module(handle.module)
                    .name(&entry_point),
            );
        }
        drop(registry);

        if desc.is_compute() {
            if stages.len() != 1 {
                return Err(GraphicsError::new(
                    ErrorKind::InvalidPipelineState,
                    "compute pipelines take exactly one shader stage",
                ));
            }
            let info = vk::ComputePipelineCreateInfo::default()
                .stage(stages[0])
                .layout(state.pipeline_layout);
            let pipelines = unsafe {
                device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
            }
            .map_err(|(_, e)| map_vk_error(e, "create compute pipeline"))?;
            return Ok(VkPipeline {
                pipeline: pipelines[0],
                layout: state.pipeline_layout,
                bind_point: vk::PipelineBindPoint::COMPUTE,
            });
        }

        if stages.is_empty() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidPipelineState,
                "pipeline needs a vertex or compute stage",
            ));
        }

        let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
        let mut attributes: Vec<vk::VertexInputAttributeDescription> = Vec::new();
        for layout in &desc.vertex_layout {
            bindings.push(
                vk::VertexInputBindingDescription::default()
                    .binding(layout.binding)
                    .stride(layout.stride)
                    .input_rate(match layout.step_mode {
                        ember_render::VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
                        ember_render::VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
                    }),
            );
            for attr in &layout.attributes {
                attributes.push(
                    vk::VertexInputAttributeDescription::default()
                        .location(attr.location)
                        .binding(layout.binding)
                        .format(vertex_format_vk(attr.format))
                        .offset(attr.offset),
                );
            }
        }
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_vk(desc.topology));

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_stencil.depth_test)
            .depth_write_enable(desc.depth_stencil.depth_write)
            .depth_compare_op(compare_op_vk(desc.depth_stencil.depth_compare))
            .stencil_test_enable(desc.depth_stencil.stencil_test);

        let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(desc.blend.enabled)
            .src_color_blend_factor(blend_factor_vk(desc.blend.src_color))
            .dst_color_blend_factor(blend_factor_vk(desc.blend.dst_color))
            .color_blend_op(blend_op_vk(desc.blend.color_op))
            .src_alpha_blend_factor(blend_factor_vk(desc.blend.src_alpha))
            .dst_alpha_blend_factor(blend_factor_vk(desc.blend.dst_alpha))
            .alpha_blend_op(blend_op_vk(desc.blend.alpha_op))
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        let blend_attachments = vec![blend_attachment; desc.color_formats.len().max(1)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        // any pass with matching attachment formats is compatible
        let color_formats: Vec<vk::Format> = desc
            .color_formats
            .iter()
            .map(|f| texture_format_vk(*f))
            .collect();
        let depth_format = desc.depth_format.map(texture_format_vk);
        let render_pass = if color_formats.len() == 1
            && state
                .swapchain
                .as_ref()
                .map(|s| s.format == color_formats[0] && depth_format.is_none())
                .unwrap_or(false)
        {
            state.swapchain.as_ref().unwrap().render_pass
        } else {
            self.compatible_render_pass(state, &color_formats, depth_format, true, false)?
        };

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(state.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| map_vk_error(e, "create graphics pipeline"))?;

        Ok(VkPipeline {
            pipeline: pipelines[0],
            layout: state.pipeline_layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }
}
