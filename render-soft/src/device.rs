//! The software device: the full contract over host memory.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ember_render::base::BackendBase;
use ember_render::buffer::BufferDesc;
use ember_render::command::CommandBuffer;
use ember_render::device::{DeviceEvent, DeviceOptions, GraphicsDevice};
use ember_render::error::{ErrorKind, GraphicsError, Result, Severity};
use ember_render::registry::{
    BufferId, PipelineId, PipelineRecord, RenderTargetId, RenderTargetRecord, SamplerId,
    ShaderId, ShaderRecord, TextureId,
};
use ember_render::renderpass::RenderTargetDesc;
use ember_render::shader::{self, ShaderDesc, ShaderSource, SourceKind};
use ember_render::swapchain::{SwapchainDesc, SwapchainEvent, SwapchainState};
use ember_render::texture::{SamplerDesc, TextureDesc, TextureUsage};
use ember_render::PipelineDesc;

use crate::exec::{execute, ExecContext};
use crate::resources::{
    SoftBuffer, SoftPipeline, SoftRenderTarget, SoftSampler, SoftShader, SoftSink, SoftSwapchain,
    SoftTexture,
};

pub struct SoftwareDevice {
    base: BackendBase,
    swapchain: Mutex<Option<SoftSwapchain>>,
    /// Native pipeline creations, distinct from cache hits.
    native_pipeline_creations: AtomicU64,
    submissions: AtomicU64,
}

impl SoftwareDevice {
    /// Never fails: the rasteriser has no host requirements. The `Result`
    /// return matches the contract's init signature.
    pub fn new(options: &DeviceOptions) -> Result<SoftwareDevice> {
        let base = BackendBase::new(
            crate::backend_info(),
            crate::capabilities(),
            options.debug_mode,
        );
        base.transition(DeviceEvent::Init)?;
        base.set_dimensions(options.width, options.height);
        base.set_vsync(options.vsync);
        log::info!(
            "software device up ({}x{}, vsync {})",
            options.width,
            options.height,
            options.vsync
        );
        Ok(SoftwareDevice {
            base,
            swapchain: Mutex::new(None),
            native_pipeline_creations: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
        })
    }

    /// How many pipelines were actually built, as opposed to served from the
    /// cache.
    pub fn native_pipeline_creations(&self) -> u64 {
        self.native_pipeline_creations.load(Ordering::Relaxed)
    }

    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Bytes of the current swap chain image, for inspection in tests and
    /// headless capture.
    pub fn read_swapchain_image(&self) -> Option<Vec<u8>> {
        let swapchain = self.swapchain.lock();
        swapchain.as_ref().map(|s| s.images[s.current].clone())
    }

    fn create_texture_internal(&self, desc: &TextureDesc) -> Result<TextureId> {
        desc.validate()?;
        let caps = self.base.capabilities;
        let max = caps.max_texture_size;
        if desc.width > max || desc.height > max || desc.depth > max {
            return self.base.errors.fail(
                Severity::Error,
                ErrorKind::FeatureNotSupported,
                format!(
                    "texture extent {}x{}x{} exceeds device limit {}",
                    desc.width, desc.height, desc.depth, max
                ),
            );
        }
        let size = desc.byte_size();
        let block = self.base.device_local.on_alloc(size);
        let data = vec![0u8; size as usize];
        Ok(self
            .base
            .register_texture(desc.clone(), Box::new(SoftTexture { data, block })))
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn base(&self) -> &BackendBase {
        &self.base
    }

    //----------------------------------------------------------------------------------------------
    // Textures

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
        if let Ok(soft) = record.handle.downcast::<SoftTexture>() {
            self.base.device_local.on_free(soft.block);
        }
        Ok(())
    }

    fn update_texture(&self, texture: TextureId, mip_level: u32, data: &[u8]) -> Result<()> {
        self.base.ensure_live()?;
        let mut registry = self.base.registry.lock();
        let record = registry
            .texture_mut(texture)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "texture not live"))?;
        let desc = record.desc.clone();
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
        let offset: u64 = (0..mip_level)
            .map(|l| desc.format.mip_level_size(desc.width, desc.height, desc.depth, l))
            .sum();
        let soft = record
            .handle
            .downcast_mut::<SoftTexture>()
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign texture"))?;
        soft.data[offset as usize..offset as usize + expected].copy_from_slice(data);
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Buffers

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId> {
        self.base.ensure_live()?;
        desc.validate()?;
        let block = self.base.device_local.on_alloc(desc.size);
        let data = vec![0u8; desc.size as usize];
        Ok(self.base.register_buffer(
            desc.clone(),
            Box::new(SoftBuffer {
                data,
                memory: desc.memory,
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
        if let Ok(soft) = record.handle.downcast::<SoftBuffer>() {
            self.base.device_local.on_free(soft.block);
        }
        Ok(())
    }

    fn update_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.base.ensure_live()?;
        let mut registry = self.base.registry.lock();
        let record = registry
            .buffer_mut(buffer)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "buffer not live"))?;
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= record.desc.size)
            .ok_or_else(|| {
                GraphicsError::new(
                    ErrorKind::InvalidMemoryAccess,
                    format!(
                        "write of {} bytes at {} exceeds buffer size {}",
                        data.len(),
                        offset,
                        record.desc.size
                    ),
                )
            })?;
        let host_visible = record.desc.memory.is_host_visible();
        let soft = record
            .handle
            .downcast_mut::<SoftBuffer>()
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign buffer"))?;
        if host_visible {
            soft.data[offset as usize..end as usize].copy_from_slice(data);
            return Ok(());
        }

        // device-local memory is not mapped directly: bounce the bytes
        // through the frame staging slab like a real upload queue would
        let mut staging = self.base.staging.lock();
        let marker = staging.marker();
        match staging.alloc(data.len(), 4) {
            Ok(mut block) => {
                let staged = staging.map(&mut block)?;
                staged.copy_from_slice(data);
                soft.data[offset as usize..end as usize].copy_from_slice(staged);
                block.unmap();
                staging.reset_to(marker);
            }
            Err(_) => {
                // larger than the staging slab: dedicated transfer
                soft.data[offset as usize..end as usize].copy_from_slice(data);
            }
        }
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Samplers

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId> {
        self.base.ensure_live()?;
        Ok(self
            .base
            .registry
            .lock()
            .register_sampler(*desc, Box::new(SoftSampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerId) -> Result<()> {
        self.base.ensure_live()?;
        self.base
            .registry
            .lock()
            .unregister_sampler(sampler)
            .map(|_| ())
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "sampler not live"))
    }

    //----------------------------------------------------------------------------------------------
    // Shaders

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

        // run the textual pipeline even though nothing executes the code:
        // includes and defines must resolve, and reflection comes from here
        let mut reflection = None;
        if let ShaderSource::Text(text) = &desc.source {
            let preprocessed = shader::preprocess_includes(
                text,
                desc.path.as_deref(),
                &desc.options.include_paths,
            )
            .map_err(|e| {
                self.base
                    .errors
                    .record(Severity::Error, e.kind, e.message.clone());
                e
            })?;
            let _header = shader::preprocess::define_header(&desc.options.defines)?;
            if desc.options.reflect && kind == SourceKind::Glsl {
                reflection = Some(shader::reflect_glsl_source(&preprocessed, stage));
            }
        }

        let record = ShaderRecord {
            stage,
            kind,
            entry_point: desc.options.entry_point.clone(),
            reflection: reflection.clone(),
            name: desc.debug_name.clone(),
            handle: Box::new(SoftShader { reflection }),
        };
        Ok(self.base.registry.lock().register_shader(record))
    }

    fn destroy_shader(&self, shader: ShaderId) -> Result<()> {
        self.base.ensure_live()?;
        self.base
            .registry
            .lock()
            .unregister_shader(shader)
            .map(|_| ())
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "shader not live"))
    }

    //----------------------------------------------------------------------------------------------
    // Pipelines

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId> {
        self.base.ensure_live()?;

        {
            let registry = self.base.registry.lock();
            let stages = [
                desc.vertex_shader,
                desc.fragment_shader,
                desc.geometry_shader,
                desc.tess_control_shader,
                desc.tess_eval_shader,
                desc.compute_shader,
            ];
            for shader in stages.into_iter().flatten() {
                if registry.shader(shader).is_none() {
                    return self.base.errors.fail(
                        Severity::Error,
                        ErrorKind::InvalidResource,
                        "pipeline references a destroyed shader",
                    );
                }
            }
            if desc.compute_shader.is_none() && desc.vertex_shader.is_none() {
                return self.base.errors.fail(
                    Severity::Error,
                    ErrorKind::InvalidPipelineState,
                    "pipeline needs a vertex or compute stage",
                );
            }
        }

        self.base.pipeline_cache.get_or_create(desc, |cache_key| {
            self.native_pipeline_creations.fetch_add(1, Ordering::Relaxed);
            let record = PipelineRecord {
                desc: desc.clone(),
                cache_key,
                name: desc.debug_name.clone(),
                handle: Box::new(SoftPipeline { cache_key }),
            };
            Ok(self.base.registry.lock().register_pipeline(record))
        })
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) -> Result<()> {
        self.base.ensure_live()?;
        self.base
            .registry
            .lock()
            .unregister_pipeline(pipeline)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "pipeline not live"))?;
        self.base.pipeline_cache.forget(pipeline);
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Render targets

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

        let record = RenderTargetRecord {
            desc: desc.clone(),
            color_textures,
            depth_texture,
            name: desc.debug_name.clone(),
            handle: Box::new(SoftRenderTarget),
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
    // Swap chain

    fn create_swap_chain(&self, desc: &SwapchainDesc) -> Result<()> {
        self.base.ensure_live()?;
        desc.validate()?;
        let mut swapchain = self.swapchain.lock();
        if swapchain.is_some() {
            log::debug!("replacing existing swap chain");
        }
        self.base.set_dimensions(desc.width, desc.height);
        self.base.set_vsync(desc.vsync);
        *swapchain = Some(SoftSwapchain::new(desc.clone()));
        Ok(())
    }

    fn resize_swap_chain(&self, width: u32, height: u32) -> Result<()> {
        self.base.ensure_live()?;
        let mut swapchain = self.swapchain.lock();
        let swapchain = swapchain.as_mut().ok_or_else(|| {
            GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain to resize")
        })?;
        if width == 0 || height == 0 {
            // deferred: park until a real extent arrives
            swapchain.state = swapchain.state.transition(SwapchainEvent::ResizeZero)?;
            return Ok(());
        }
        if swapchain.state == SwapchainState::Ready
            && swapchain.desc.width == width
            && swapchain.desc.height == height
        {
            // resize to the current extent is observationally a no-op
            return Ok(());
        }
        swapchain.state = swapchain.state.transition(SwapchainEvent::Resize)?;
        swapchain.resize(width, height);
        self.base.set_dimensions(width, height);
        Ok(())
    }

    fn swap_chain_state(&self) -> SwapchainState {
        self.swapchain
            .lock()
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SwapchainState::Uninitialised)
    }

    fn present(&self) -> Result<()> {
        self.base.ensure_live()?;
        let mut swapchain = self.swapchain.lock();
        let swapchain = swapchain.as_mut().ok_or_else(|| {
            GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain to present")
        })?;
        match swapchain.state {
            SwapchainState::Minimised => Ok(()), // success, no work
            SwapchainState::Ready => {
                swapchain.current = (swapchain.current + 1) % swapchain.images.len();
                swapchain.presents += 1;
                Ok(())
            }
            SwapchainState::OutOfDate => Err(GraphicsError::new(
                ErrorKind::SwapChainOutOfDate,
                "swap chain needs recreation",
            )),
            state => Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                format!("present on a {:?} swap chain", state),
            )),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Command buffers

    fn create_command_buffer(&self) -> Result<CommandBuffer> {
        self.base.ensure_live()?;
        Ok(CommandBuffer::new(
            self.base.next_command_buffer_id(),
            Box::new(SoftSink::default()),
        ))
    }

    fn submit_command_buffer(&self, cb: &mut CommandBuffer) -> Result<()> {
        self.base.ensure_live()?;

        // stale-resource check: anything destroyed since recording rejects
        // the whole buffer
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
        self.submissions.fetch_add(1, Ordering::Relaxed);

        let commands = {
            let sink = cb
                .sink_as::<SoftSink>()
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidCommandBuffer, "foreign sink"))?;
            std::mem::take(&mut sink.commands)
        };

        let result = {
            let mut registry = self.base.registry.lock();
            let mut swapchain = self.swapchain.lock();
            let mut ctx = ExecContext {
                registry: &mut registry,
                swapchain: &mut swapchain,
                base: &self.base,
            };
            execute(&mut ctx, &commands)
        };
        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                // the fence still completes; the buffer is reusable
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

        // fold the recording's counters into the innermost open marker
        {
            let mut profiler = self.base.profiler.lock();
            if let Some(counters) = profiler.counters_mut() {
                let mut recorded = *cb.counters();
                recorded.draw_time = stats.draw_time;
                recorded.transfer_time = stats.transfer_time;
                counters.merge(&recorded);
            }
        }

        // execution is synchronous, so the fence is already signalled
        cb.mark_completed()?;
        Ok(())
    }

    fn wait_for_fence(&self, _timeout_ns: u64) -> Result<bool> {
        self.base.ensure_live()?;
        Ok(true)
    }

    fn wait_idle(&self) -> Result<()> {
        self.base.ensure_live()?;
        Ok(())
    }

    //----------------------------------------------------------------------------------------------

    fn deinit(&mut self) -> Result<()> {
        if self.base.state() == ember_render::DeviceState::Destroyed {
            return Ok(());
        }

        // destruction order: render targets, pipelines, shaders, buffers,
        // textures, then the swap chain
        let mut registry = self.base.registry.lock();
        registry.drain_render_targets();
        registry.drain_pipelines();
        registry.drain_shaders();
        registry.drain_samplers();
        for (_, record) in registry.drain_buffers() {
            if let Ok(soft) = record.handle.downcast::<SoftBuffer>() {
                self.base.device_local.on_free(soft.block);
            }
        }
        for (_, record) in registry.drain_textures() {
            if let Ok(soft) = record.handle.downcast::<SoftTexture>() {
                self.base.device_local.on_free(soft.block);
            }
        }
        drop(registry);

        self.base.pipeline_cache.clear();

        let mut swapchain = self.swapchain.lock();
        if let Some(chain) = swapchain.as_mut() {
            chain.state = chain.state.transition(SwapchainEvent::Destroy)?;
        }
        *swapchain = None;
        drop(swapchain);

        self.base.transition(DeviceEvent::Destroy)?;
        log::info!("software device destroyed");
        Ok(())
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        if self.base.state() == ember_render::DeviceState::Live {
            let _ = self.deinit();
        }
    }
}
