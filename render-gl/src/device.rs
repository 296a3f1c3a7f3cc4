//! The OpenGL / OpenGL ES device.
//!
//! Recording threads never touch the context: sinks buffer the stream and
//! submit replays it with real GL calls through the state cache. The default
//! framebuffer stands in for the swap chain; the host's windowing layer owns
//! the actual buffer swap, present paces frames with fence syncs and
//! flushes.

use parking_lot::Mutex;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ember_render::base::BackendBase;
use ember_render::buffer::BufferDesc;
use ember_render::command::CommandBuffer;
use ember_render::device::{DeviceEvent, DeviceOptions, GraphicsDevice};
use ember_render::error::{ErrorKind, ErrorLog, GraphicsError, Result, Severity};
use ember_render::pipeline::PipelineDesc;
use ember_render::registry::{
    BufferId, PipelineId, PipelineRecord, RenderTargetId, RenderTargetRecord, SamplerId,
    ShaderId, ShaderRecord, TextureId,
};
use ember_render::renderpass::{LoadOp, PassTarget, RenderPass, RenderTargetDesc};
use ember_render::shader::{self, ShaderDesc, ShaderSource, ShaderStage, SourceKind};
use ember_render::swapchain::{SwapchainDesc, SwapchainEvent, SwapchainState};
use ember_render::texture::{
    Filter, MipmapMode, SamplerAddressMode, SamplerDesc, TextureDesc, TextureUsage,
};
use ember_render::{BackendInfo, BackendKind};

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::format::{index_format_gl, texture_format_info, topology_gl, vertex_format_gl};
use crate::resources::{
    GlBuffer, GlCmd, GlPipeline, GlRenderTarget, GlSampler, GlShader, GlSink, GlTexture,
};
use crate::state::StateCache;
use crate::sync::Timeline;

const MAX_FRAMES_IN_FLIGHT: u64 = 2;
const FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(500);
/// Push constants are emulated through a small UBO on the last uniform slot.
const PUSH_CONSTANT_SIZE: usize = 256;

/// Target for the driver's debug reports: keeps the device's error log
/// alive for as long as the callback may fire. Heap-allocated and handed to
/// the context as the callback user pointer.
struct DebugRelay {
    errors: Arc<ErrorLog>,
}

fn report_severity(gl_severity: GLenum) -> Severity {
    match gl_severity {
        gl::DEBUG_SEVERITY_HIGH => Severity::Error,
        gl::DEBUG_SEVERITY_MEDIUM => Severity::Warning,
        _ => Severity::Info,
    }
}

fn report_source(gl_source: GLenum) -> &'static str {
    match gl_source {
        gl::DEBUG_SOURCE_API => "api",
        gl::DEBUG_SOURCE_SHADER_COMPILER => "shader compiler",
        gl::DEBUG_SOURCE_WINDOW_SYSTEM => "window system",
        gl::DEBUG_SOURCE_THIRD_PARTY => "third party",
        gl::DEBUG_SOURCE_APPLICATION => "application",
        _ => "other",
    }
}

/// Files each driver report in the device's error log, which in turn routes
/// it to `log` at the mapped severity and applies the validation downgrade
/// policy. Chatter-level notifications are dropped before they reach the
/// bounded ring.
extern "system" fn debug_relay(
    source: GLenum,
    _ty: GLenum,
    id: GLuint,
    severity: GLenum,
    length: GLsizei,
    msg: *const GLchar,
    user: *mut GLvoid,
) {
    if user.is_null() || severity == gl::DEBUG_SEVERITY_NOTIFICATION {
        return;
    }
    let relay = unsafe { &*(user as *const DebugRelay) };
    let text = unsafe {
        String::from_utf8_lossy(std::slice::from_raw_parts(
            msg as *const u8,
            length.max(0) as usize,
        ))
        .into_owned()
    };
    relay.errors.record(
        report_severity(severity),
        ErrorKind::ValidationError,
        format!("driver report {:#06x} ({}): {}", id, report_source(source), text),
    );
}

struct GlState {
    timeline: Timeline,
    frame_num: u64,
    cache: StateCache,
    swapchain: Option<SwapchainState>,
    push_constants: GLuint,
    push_constant_binding: GLuint,
}

pub struct OpenGlDevice {
    base: BackendBase,
    gl: Gl,
    state: Mutex<GlState>,
    native_pipeline_creations: AtomicU64,
    /// Owned callback target registered with the context; null when debug
    /// output is off. Released in `deinit` after the callback is detached.
    debug_relay: *mut DebugRelay,
}

// The Gl struct is a table of raw function pointers, which poisons the auto
// traits. Entry points are only invoked from the host's context thread per
// the contract; the wrapper types themselves are freely movable.
unsafe impl Send for OpenGlDevice {}
unsafe impl Sync for OpenGlDevice {}

impl OpenGlDevice {
    pub fn new(kind: BackendKind, options: &DeviceOptions) -> Result<OpenGlDevice> {
        let loader = options.gl_proc_loader.as_ref().ok_or_else(|| {
            GraphicsError::new(
                ErrorKind::BackendNotAvailable,
                "no GL proc loader supplied by the host",
            )
        })?;
        let load = loader.as_ref();
        let gl = Gl::load_with(|symbol| load(symbol));
        let version = crate::context_version(&gl).ok_or_else(|| {
            GraphicsError::new(
                ErrorKind::BackendNotAvailable,
                "no current GL context on this thread",
            )
        })?;
        crate::check_kind_matches(kind, &version)?;
        let capabilities = crate::capabilities_from_context(&gl, &version);

        let mut info = BackendInfo::new(kind);
        info.api_version = version.raw.clone();
        unsafe {
            let vendor = gl.GetString(gl::VENDOR) as *const c_char;
            if !vendor.is_null() {
                info.vendor = CStr::from_ptr(vendor).to_string_lossy().into_owned();
            }
            let renderer = gl.GetString(gl::RENDERER) as *const c_char;
            if !renderer.is_null() {
                info.device_name = CStr::from_ptr(renderer).to_string_lossy().into_owned();
            }
        }
        log::debug!(
            "{} context: {} ({} / {})",
            kind,
            info.api_version,
            info.vendor,
            info.device_name
        );

        let push_constant_binding = capabilities.max_uniform_bindings.saturating_sub(1);
        let mut push_constants = 0;
        unsafe {
            gl.GenBuffers(1, &mut push_constants);
            gl.BindBuffer(gl::UNIFORM_BUFFER, push_constants);
            gl.BufferData(
                gl::UNIFORM_BUFFER,
                PUSH_CONSTANT_SIZE as GLsizeiptr,
                ptr::null(),
                gl::DYNAMIC_DRAW,
            );
            gl.BindBuffer(gl::UNIFORM_BUFFER, 0);
        }

        let base = BackendBase::new(info, capabilities, options.debug_mode);
        base.transition(DeviceEvent::Init)?;
        base.set_dimensions(options.width, options.height);
        base.set_vsync(options.vsync);

        let mut relay = std::ptr::null_mut();
        if options.validation && gl.DebugMessageCallback.is_loaded() {
            relay = Box::into_raw(Box::new(DebugRelay {
                errors: base.errors.clone(),
            }));
            unsafe {
                gl.Enable(gl::DEBUG_OUTPUT_SYNCHRONOUS);
                gl.DebugMessageCallback(Some(debug_relay), relay as *const GLvoid);
                gl.DebugMessageControl(
                    gl::DONT_CARE,
                    gl::DONT_CARE,
                    gl::DONT_CARE,
                    0,
                    ptr::null(),
                    1,
                );
            }
        }

        Ok(OpenGlDevice {
            base,
            gl,
            state: Mutex::new(GlState {
                timeline: Timeline::new(0),
                frame_num: 1,
                cache: StateCache::new(),
                swapchain: None,
                push_constants,
                push_constant_binding,
            }),
            native_pipeline_creations: AtomicU64::new(0),
            debug_relay: relay,
        })
    }

    pub fn native_pipeline_creations(&self) -> u64 {
        self.native_pipeline_creations.load(Ordering::Relaxed)
    }

    //----------------------------------------------------------------------------------------------
    // Internal creation helpers

    fn create_texture_internal(&self, desc: &TextureDesc) -> Result<TextureId> {
        desc.validate()?;
        let max = self.base.capabilities.max_texture_size;
        if desc.width > max || desc.height > max {
            return self.base.errors.fail(
                Severity::Error,
                ErrorKind::FeatureNotSupported,
                format!("texture extent exceeds GL_MAX_TEXTURE_SIZE {}", max),
            );
        }
        let info = texture_format_info(desc.format);
        let gl = &self.gl;
        let mut obj = 0;
        unsafe {
            gl.GenTextures(1, &mut obj);
            gl.BindTexture(gl::TEXTURE_2D, obj);
            if gl.TexStorage2D.is_loaded() {
                gl.TexStorage2D(
                    gl::TEXTURE_2D,
                    desc.mip_levels as GLsizei,
                    info.internal_fmt,
                    desc.width as GLsizei,
                    desc.height as GLsizei,
                );
            } else {
                for level in 0..desc.mip_levels {
                    gl.TexImage2D(
                        gl::TEXTURE_2D,
                        level as GLint,
                        info.internal_fmt as GLint,
                        (desc.width >> level).max(1) as GLsizei,
                        (desc.height >> level).max(1) as GLsizei,
                        0,
                        info.upload_components,
                        info.upload_ty,
                        ptr::null(),
                    );
                }
            }
            gl.BindTexture(gl::TEXTURE_2D, 0);
        }
        let block = self.base.device_local.on_alloc(desc.byte_size());
        Ok(self.base.register_texture(
            desc.clone(),
            Box::new(GlTexture {
                obj,
                target: gl::TEXTURE_2D,
                block,
            }),
        ))
    }

    fn compile_stage(&self, stage: ShaderStage, kind: SourceKind, source: &[u8]) -> Result<GLuint> {
        let gl = &self.gl;
        let gl_stage = match stage {
            ShaderStage::Vertex => gl::VERTEX_SHADER,
            ShaderStage::Fragment => gl::FRAGMENT_SHADER,
            ShaderStage::Compute => gl::COMPUTE_SHADER,
            ShaderStage::Geometry => gl::GEOMETRY_SHADER,
            ShaderStage::TessControl => gl::TESS_CONTROL_SHADER,
            ShaderStage::TessEval => gl::TESS_EVALUATION_SHADER,
        };
        match kind {
            SourceKind::Glsl => unsafe {
                let obj = gl.CreateShader(gl_stage);
                let sources = [source.as_ptr() as *const GLchar];
                let lengths = [source.len() as GLint];
                gl.ShaderSource(obj, 1, sources.as_ptr(), lengths.as_ptr());
                gl.CompileShader(obj);
                let mut status = 0;
                gl.GetShaderiv(obj, gl::COMPILE_STATUS, &mut status);
                if status != gl::TRUE as GLint {
                    let log = self.shader_info_log(obj);
                    gl.DeleteShader(obj);
                    return self.base.errors.fail(
                        Severity::Error,
                        ErrorKind::ShaderCompilationFailed,
                        log,
                    );
                }
                Ok(obj)
            },
            SourceKind::SpirV => {
                if !gl.ShaderBinary.is_loaded() || !gl.SpecializeShaderARB.is_loaded() {
                    return self.base.errors.fail(
                        Severity::Error,
                        ErrorKind::FeatureNotSupported,
                        "context lacks GL_ARB_gl_spirv",
                    );
                }
                unsafe {
                    let obj = gl.CreateShader(gl_stage);
                    gl.ShaderBinary(
                        1,
                        &obj,
                        gl::SHADER_BINARY_FORMAT_SPIR_V_ARB,
                        source.as_ptr() as *const GLvoid,
                        source.len() as GLsizei,
                    );
                    let entry = b"main\0";
                    gl.SpecializeShaderARB(
                        obj,
                        entry.as_ptr() as *const GLchar,
                        0,
                        ptr::null(),
                        ptr::null(),
                    );
                    let mut status = 0;
                    gl.GetShaderiv(obj, gl::COMPILE_STATUS, &mut status);
                    if status != gl::TRUE as GLint {
                        let log = self.shader_info_log(obj);
                        gl.DeleteShader(obj);
                        return self.base.errors.fail(
                            Severity::Error,
                            ErrorKind::ShaderCompilationFailed,
                            log,
                        );
                    }
                    Ok(obj)
                }
            }
            other => self.base.errors.fail(
                Severity::Error,
                ErrorKind::FeatureNotSupported,
                format!("{:?} sources are not consumable by the GL backend", other),
            ),
        }
    }

    fn shader_info_log(&self, obj: GLuint) -> String {
        let gl = &self.gl;
        unsafe {
            let mut log_size = 0;
            gl.GetShaderiv(obj, gl::INFO_LOG_LENGTH, &mut log_size);
            let mut log_buf: Vec<u8> = vec![0; log_size.max(1) as usize];
            let mut written = 0;
            gl.GetShaderInfoLog(
                obj,
                log_size,
                &mut written,
                log_buf.as_mut_ptr() as *mut GLchar,
            );
            log_buf.truncate(written.max(0) as usize);
            String::from_utf8_lossy(&log_buf).into_owned()
        }
    }

    fn program_info_log(&self, obj: GLuint) -> String {
        let gl = &self.gl;
        unsafe {
            let mut log_size = 0;
            gl.GetProgramiv(obj, gl::INFO_LOG_LENGTH, &mut log_size);
            let mut log_buf: Vec<u8> = vec![0; log_size.max(1) as usize];
            let mut written = 0;
            gl.GetProgramInfoLog(
                obj,
                log_size,
                &mut written,
                log_buf.as_mut_ptr() as *mut GLchar,
            );
            log_buf.truncate(written.max(0) as usize);
            String::from_utf8_lossy(&log_buf).into_owned()
        }
    }

    fn link_program(&self, shaders: &[GLuint]) -> Result<GLuint> {
        let gl = &self.gl;
        unsafe {
            let program = gl.CreateProgram();
            for &shader in shaders {
                gl.AttachShader(program, shader);
            }
            gl.LinkProgram(program);
            let mut status = 0;
            gl.GetProgramiv(program, gl::LINK_STATUS, &mut status);
            for &shader in shaders {
                gl.DetachShader(program, shader);
            }
            if status != gl::TRUE as GLint {
                let log = self.program_info_log(program);
                gl.DeleteProgram(program);
                return self.base.errors.fail(
                    Severity::Error,
                    ErrorKind::IncompatiblePipelineLayout,
                    log,
                );
            }
            Ok(program)
        }
    }

    fn build_vao(&self, desc: &PipelineDesc) -> (GLuint, Vec<GLsizei>) {
        let gl = &self.gl;
        let mut vao = 0;
        let mut strides = Vec::new();
        unsafe {
            gl.GenVertexArrays(1, &mut vao);
            gl.BindVertexArray(vao);
            for layout in &desc.vertex_layout {
                if strides.len() <= layout.binding as usize {
                    strides.resize(layout.binding as usize + 1, 0);
                }
                strides[layout.binding as usize] = layout.stride as GLsizei;
                for attr in &layout.attributes {
                    let (ty, count, normalized) = vertex_format_gl(attr.format);
                    gl.EnableVertexAttribArray(attr.location);
                    match ty {
                        gl::FLOAT | gl::HALF_FLOAT => gl.VertexAttribFormat(
                            attr.location,
                            count,
                            ty,
                            gl::FALSE,
                            attr.offset,
                        ),
                        _ if normalized => gl.VertexAttribFormat(
                            attr.location,
                            count,
                            ty,
                            gl::TRUE,
                            attr.offset,
                        ),
                        _ => gl.VertexAttribIFormat(attr.location, count, ty, attr.offset),
                    }
                    gl.VertexAttribBinding(attr.location, layout.binding);
                }
                let divisor = match layout.step_mode {
                    ember_render::pipeline::VertexStepMode::Vertex => 0,
                    ember_render::pipeline::VertexStepMode::Instance => 1,
                };
                gl.VertexBindingDivisor(layout.binding, divisor);
            }
            gl.BindVertexArray(0);
        }
        (vao, strides)
    }

    fn sampler_to_gl(desc: &SamplerDesc) -> (GLint, GLint, GLint, GLint, GLint) {
        let addr = |mode: SamplerAddressMode| -> GLint {
            match mode {
                SamplerAddressMode::Clamp => gl::CLAMP_TO_EDGE as GLint,
                SamplerAddressMode::Mirror => gl::MIRRORED_REPEAT as GLint,
                SamplerAddressMode::Wrap => gl::REPEAT as GLint,
            }
        };
        let min = match (desc.min_filter, desc.mipmap_mode) {
            (Filter::Nearest, MipmapMode::Nearest) => gl::NEAREST_MIPMAP_NEAREST,
            (Filter::Nearest, MipmapMode::Linear) => gl::NEAREST_MIPMAP_LINEAR,
            (Filter::Linear, MipmapMode::Nearest) => gl::LINEAR_MIPMAP_NEAREST,
            (Filter::Linear, MipmapMode::Linear) => gl::LINEAR_MIPMAP_LINEAR,
        };
        let mag = match desc.mag_filter {
            Filter::Nearest => gl::NEAREST,
            Filter::Linear => gl::LINEAR,
        };
        (
            addr(desc.addr_u),
            addr(desc.addr_v),
            addr(desc.addr_w),
            min as GLint,
            mag as GLint,
        )
    }

    //----------------------------------------------------------------------------------------------
    // Replay

    fn replay(&self, state: &mut GlState, commands: &[GlCmd]) -> Result<()> {
        let gl = &self.gl;
        // objects may have been deleted since the last replay
        state.cache.invalidate();

        let mut strides: Vec<GLsizei> = Vec::new();
        let mut index_format = gl::UNSIGNED_SHORT;
        let mut index_base: u64 = 0;
        let mut topology = gl::TRIANGLES;

        for cmd in commands {
            match cmd {
                GlCmd::BeginRenderPass(pass) => self.replay_begin_pass(state, pass)?,
                GlCmd::EndRenderPass => {}
                GlCmd::SetViewport(v) => unsafe {
                    gl.Viewport(
                        v.x as GLint,
                        v.y as GLint,
                        v.width as GLsizei,
                        v.height as GLsizei,
                    );
                    gl.DepthRangef(v.min_depth, v.max_depth);
                },
                GlCmd::SetScissor(rect) => unsafe {
                    state.cache.set_scissor_test(gl, true);
                    gl.Scissor(
                        rect.x,
                        rect.y,
                        rect.width as GLsizei,
                        rect.height as GLsizei,
                    );
                },
                GlCmd::BindPipeline(pipeline) => {
                    let registry = self.base.registry.lock();
                    let record = registry.pipeline(*pipeline).ok_or_else(|| {
                        GraphicsError::new(ErrorKind::InvalidResource, "pipeline destroyed")
                    })?;
                    let handle = record
                        .handle
                        .downcast_ref::<GlPipeline>()
                        .ok_or_else(|| {
                            GraphicsError::new(ErrorKind::InvalidResource, "foreign pipeline")
                        })?;
                    state.cache.set_program(gl, handle.program);
                    state.cache.set_vao(gl, handle.vao);
                    state.cache.set_blend_enabled(gl, handle.blend_enabled);
                    state.cache.set_depth_test(gl, handle.depth_test);
                    state.cache.set_depth_write(gl, handle.depth_write);
                    strides = handle.strides.clone();
                    topology = handle.topology;
                }
                GlCmd::BindVertexBuffer {
                    slot,
                    buffer,
                    offset,
                } => {
                    let obj = self.buffer_obj(*buffer)?;
                    let stride = strides.get(*slot as usize).copied().unwrap_or(0);
                    unsafe {
                        gl.BindVertexBuffer(*slot, obj, *offset as GLintptr, stride);
                    }
                }
                GlCmd::BindIndexBuffer {
                    buffer,
                    format,
                    offset,
                } => {
                    let obj = self.buffer_obj(*buffer)?;
                    index_format = index_format_gl(*format);
                    index_base = *offset;
                    unsafe {
                        gl.BindBuffer(gl::ELEMENT_ARRAY_BUFFER, obj);
                    }
                }
                GlCmd::BindUniformBuffer { slot, buffer } => {
                    let obj = self.buffer_obj(*buffer)?;
                    unsafe {
                        gl.BindBufferBase(gl::UNIFORM_BUFFER, *slot, obj);
                    }
                }
                GlCmd::BindTexture {
                    slot,
                    texture,
                    sampler,
                } => {
                    let (tex_obj, target) = {
                        let registry = self.base.registry.lock();
                        let record = registry.texture(*texture).ok_or_else(|| {
                            GraphicsError::new(ErrorKind::InvalidResource, "texture destroyed")
                        })?;
                        let handle = record.handle.downcast_ref::<GlTexture>().ok_or_else(|| {
                            GraphicsError::new(ErrorKind::InvalidResource, "foreign texture")
                        })?;
                        (handle.obj, handle.target)
                    };
                    let sampler_obj = {
                        let registry = self.base.registry.lock();
                        registry
                            .sampler(*sampler)
                            .and_then(|r| r.handle.downcast_ref::<GlSampler>().map(|s| s.obj))
                            .unwrap_or(0)
                    };
                    unsafe {
                        gl.ActiveTexture(gl::TEXTURE0 + slot);
                        gl.BindTexture(target, tex_obj);
                        gl.BindSampler(*slot, sampler_obj);
                    }
                }
                GlCmd::PushConstants { offset, data } => unsafe {
                    gl.BindBuffer(gl::UNIFORM_BUFFER, state.push_constants);
                    gl.BufferSubData(
                        gl::UNIFORM_BUFFER,
                        *offset as GLintptr,
                        data.len() as GLsizeiptr,
                        data.as_ptr() as *const GLvoid,
                    );
                    gl.BindBuffer(gl::UNIFORM_BUFFER, 0);
                    gl.BindBufferBase(
                        gl::UNIFORM_BUFFER,
                        state.push_constant_binding,
                        state.push_constants,
                    );
                },
                GlCmd::Draw(params) => unsafe {
                    if params.first_instance != 0
                        && !gl.DrawArraysInstancedBaseInstance.is_loaded()
                    {
                        return Err(GraphicsError::new(
                            ErrorKind::FeatureNotSupported,
                            "base instance draws need GL 4.2",
                        ));
                    }
                    if params.first_instance != 0 {
                        gl.DrawArraysInstancedBaseInstance(
                            topology,
                            params.first_vertex as GLint,
                            params.vertex_count as GLsizei,
                            params.instance_count as GLsizei,
                            params.first_instance,
                        );
                    } else {
                        gl.DrawArraysInstanced(
                            topology,
                            params.first_vertex as GLint,
                            params.vertex_count as GLsizei,
                            params.instance_count as GLsizei,
                        );
                    }
                },
                GlCmd::DrawIndexed(params) => unsafe {
                    let elem_size = match index_format {
                        gl::UNSIGNED_SHORT => 2,
                        _ => 4,
                    };
                    let indices = (index_base + u64::from(params.first_index) * elem_size)
                        as usize as *const GLvoid;
                    if params.vertex_offset != 0 {
                        if !gl.DrawElementsInstancedBaseVertex.is_loaded() {
                            return Err(GraphicsError::new(
                                ErrorKind::FeatureNotSupported,
                                "base-vertex draws need GL 3.2 / ES 3.2",
                            ));
                        }
                        gl.DrawElementsInstancedBaseVertex(
                            topology,
                            params.index_count as GLsizei,
                            index_format,
                            indices,
                            params.instance_count as GLsizei,
                            params.vertex_offset,
                        );
                    } else {
                        gl.DrawElementsInstanced(
                            topology,
                            params.index_count as GLsizei,
                            index_format,
                            indices,
                            params.instance_count as GLsizei,
                        );
                    }
                },
                GlCmd::Dispatch(x, y, z) => unsafe {
                    if !gl.DispatchCompute.is_loaded() {
                        return Err(GraphicsError::new(
                            ErrorKind::FeatureNotSupported,
                            "compute dispatch needs GL 4.3 / ES 3.1",
                        ));
                    }
                    gl.DispatchCompute(*x, *y, *z);
                },
                GlCmd::BeginDebugGroup(name) => {
                    self.base.enter_debug_group(name);
                    if gl.PushDebugGroup.is_loaded() {
                        unsafe {
                            gl.PushDebugGroup(
                                gl::DEBUG_SOURCE_APPLICATION,
                                0,
                                name.len() as GLsizei,
                                name.as_ptr() as *const GLchar,
                            );
                        }
                    }
                }
                GlCmd::EndDebugGroup => {
                    self.base.leave_debug_group();
                    if gl.PopDebugGroup.is_loaded() {
                        unsafe { gl.PopDebugGroup() };
                    }
                }
            }
        }
        Ok(())
    }

    fn replay_begin_pass(&self, state: &mut GlState, pass: &RenderPass) -> Result<()> {
        let gl = &self.gl;
        let fbo = match pass.desc.target {
            PassTarget::SwapChain => 0,
            PassTarget::Offscreen(id) => {
                let registry = self.base.registry.lock();
                let record = registry.render_target(id).ok_or_else(|| {
                    GraphicsError::new(ErrorKind::InvalidResource, "render target destroyed")
                })?;
                record
                    .handle
                    .downcast_ref::<GlRenderTarget>()
                    .map(|t| t.fbo)
                    .unwrap_or(0)
            }
        };
        state.cache.bind_draw_framebuffer(gl, fbo);
        // clears ignore the scissor
        state.cache.set_scissor_test(gl, false);
        for (index, ops) in pass.desc.color_ops.iter().enumerate() {
            if ops.load == LoadOp::Clear {
                unsafe {
                    gl.ClearBufferfv(
                        gl::COLOR,
                        index as GLint,
                        pass.desc.clear_color.as_ptr(),
                    );
                }
            }
        }
        if let Some(ops) = pass.desc.depth_ops {
            if ops.load == LoadOp::Clear {
                unsafe {
                    gl.ClearBufferfi(
                        gl::DEPTH_STENCIL,
                        0,
                        pass.desc.clear_depth,
                        pass.desc.clear_stencil as GLint,
                    );
                }
            }
        }
        Ok(())
    }

    fn buffer_obj(&self, id: BufferId) -> Result<GLuint> {
        let registry = self.base.registry.lock();
        let record = registry
            .buffer(id)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "buffer destroyed"))?;
        record
            .handle
            .downcast_ref::<GlBuffer>()
            .map(|b| b.obj)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign buffer"))
    }
}

//--------------------------------------------------------------------------------------------------

impl GraphicsDevice for OpenGlDevice {
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
        if let Ok(handle) = record.handle.downcast::<GlTexture>() {
            unsafe { self.gl.DeleteTextures(1, &handle.obj) };
            self.base.device_local.on_free(handle.block);
        }
        Ok(())
    }

    fn update_texture(&self, texture: TextureId, mip_level: u32, data: &[u8]) -> Result<()> {
        self.base.ensure_live()?;
        let (obj, target, desc) = {
            let registry = self.base.registry.lock();
            let record = registry.texture(texture).ok_or_else(|| {
                GraphicsError::new(ErrorKind::InvalidResource, "texture not live")
            })?;
            let handle = record
                .handle
                .downcast_ref::<GlTexture>()
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign texture"))?;
            (handle.obj, handle.target, record.desc.clone())
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
        let info = texture_format_info(desc.format);
        let gl = &self.gl;
        unsafe {
            gl.BindTexture(target, obj);
            gl.TexSubImage2D(
                target,
                mip_level as GLint,
                0,
                0,
                (desc.width >> mip_level).max(1) as GLsizei,
                (desc.height >> mip_level).max(1) as GLsizei,
                info.upload_components,
                info.upload_ty,
                data.as_ptr() as *const GLvoid,
            );
            gl.BindTexture(target, 0);
        }
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId> {
        self.base.ensure_live()?;
        desc.validate()?;
        let gl = &self.gl;
        let mut obj = 0;
        let usage = if desc.memory.is_host_visible() {
            gl::DYNAMIC_DRAW
        } else {
            gl::STATIC_DRAW
        };
        unsafe {
            gl.GenBuffers(1, &mut obj);
            gl.BindBuffer(gl::ARRAY_BUFFER, obj);
            gl.BufferData(
                gl::ARRAY_BUFFER,
                desc.size as GLsizeiptr,
                ptr::null(),
                usage,
            );
            gl.BindBuffer(gl::ARRAY_BUFFER, 0);
        }
        let block = self.base.device_local.on_alloc(desc.size);
        Ok(self
            .base
            .register_buffer(desc.clone(), Box::new(GlBuffer { obj, block })))
    }

    fn destroy_buffer(&self, buffer: BufferId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_buffer(buffer)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "buffer not live"))?;
        if let Ok(handle) = record.handle.downcast::<GlBuffer>() {
            unsafe { self.gl.DeleteBuffers(1, &handle.obj) };
            self.base.device_local.on_free(handle.block);
        }
        Ok(())
    }

    fn update_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.base.ensure_live()?;
        let (obj, size) = {
            let registry = self.base.registry.lock();
            let record = registry
                .buffer(buffer)
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "buffer not live"))?;
            let handle = record
                .handle
                .downcast_ref::<GlBuffer>()
                .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign buffer"))?;
            (handle.obj, record.desc.size)
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
        // glBufferSubData is the staging path: the driver schedules the copy
        let gl = &self.gl;
        unsafe {
            gl.BindBuffer(gl::ARRAY_BUFFER, obj);
            gl.BufferSubData(
                gl::ARRAY_BUFFER,
                offset as GLintptr,
                data.len() as GLsizeiptr,
                data.as_ptr() as *const GLvoid,
            );
            gl.BindBuffer(gl::ARRAY_BUFFER, 0);
        }
        Ok(())
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId> {
        self.base.ensure_live()?;
        let gl = &self.gl;
        let (u, v, w, min, mag) = Self::sampler_to_gl(desc);
        let mut obj = 0;
        unsafe {
            gl.GenSamplers(1, &mut obj);
            gl.SamplerParameteri(obj, gl::TEXTURE_WRAP_S, u);
            gl.SamplerParameteri(obj, gl::TEXTURE_WRAP_T, v);
            gl.SamplerParameteri(obj, gl::TEXTURE_WRAP_R, w);
            gl.SamplerParameteri(obj, gl::TEXTURE_MIN_FILTER, min);
            gl.SamplerParameteri(obj, gl::TEXTURE_MAG_FILTER, mag);
        }
        Ok(self
            .base
            .registry
            .lock()
            .register_sampler(*desc, Box::new(GlSampler { obj })))
    }

    fn destroy_sampler(&self, sampler: SamplerId) -> Result<()> {
        self.base.ensure_live()?;
        let record = self
            .base
            .registry
            .lock()
            .unregister_sampler(sampler)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "sampler not live"))?;
        if let Ok(handle) = record.handle.downcast::<GlSampler>() {
            unsafe { self.gl.DeleteSamplers(1, &handle.obj) };
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
        if stage == ShaderStage::Compute && !self.base.capabilities.supports_compute {
            return self.base.errors.fail(
                Severity::Error,
                ErrorKind::FeatureNotSupported,
                "context has no compute support",
            );
        }

        let mut reflection = None;
        let obj = match &desc.source {
            ShaderSource::Text(text) => {
                let preprocessed = shader::preprocess_includes(
                    text,
                    desc.path.as_deref(),
                    &desc.options.include_paths,
                )?;
                let header = shader::preprocess::define_header(&desc.options.defines)?;
                // defines go after the #version line, which must stay first
                let combined = splice_defines(&preprocessed, &header);
                if desc.options.reflect && kind == SourceKind::Glsl {
                    reflection = Some(shader::reflect_glsl_source(&combined, stage));
                }
                self.compile_stage(stage, kind, combined.as_bytes())?
            }
            ShaderSource::Binary(bytes) => self.compile_stage(stage, kind, bytes)?,
        };

        let record = ShaderRecord {
            stage,
            kind,
            entry_point: desc.options.entry_point.clone(),
            reflection,
            name: desc.debug_name.clone(),
            handle: Box::new(GlShader { obj, stage }),
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
        if let Ok(handle) = record.handle.downcast::<GlShader>() {
            unsafe { self.gl.DeleteShader(handle.obj) };
        }
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId> {
        self.base.ensure_live()?;

        let shader_objs: Vec<GLuint> = {
            let registry = self.base.registry.lock();
            let stages = [
                desc.vertex_shader,
                desc.fragment_shader,
                desc.geometry_shader,
                desc.tess_control_shader,
                desc.tess_eval_shader,
                desc.compute_shader,
            ];
            let mut objs = Vec::new();
            for stage in stages.into_iter().flatten() {
                let record = registry.shader(stage).ok_or_else(|| {
                    GraphicsError::new(
                        ErrorKind::InvalidResource,
                        "pipeline references a destroyed shader",
                    )
                })?;
                let handle = record
                    .handle
                    .downcast_ref::<GlShader>()
                    .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "foreign shader"))?;
                objs.push(handle.obj);
            }
            objs
        };
        if shader_objs.is_empty() {
            return self.base.errors.fail(
                Severity::Error,
                ErrorKind::InvalidPipelineState,
                "pipeline needs at least one shader stage",
            );
        }

        self.base.pipeline_cache.get_or_create(desc, |cache_key| {
            self.native_pipeline_creations.fetch_add(1, Ordering::Relaxed);
            let program = self.link_program(&shader_objs)?;
            let (vao, strides) = self.build_vao(desc);
            let record = PipelineRecord {
                desc: desc.clone(),
                cache_key,
                name: desc.debug_name.clone(),
                handle: Box::new(GlPipeline {
                    program,
                    vao,
                    topology: topology_gl(desc.topology),
                    strides,
                    blend_enabled: desc.blend.enabled,
                    depth_test: desc.depth_stencil.depth_test,
                    depth_write: desc.depth_stencil.depth_write,
                }),
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
        if let Ok(handle) = record.handle.downcast::<GlPipeline>() {
            unsafe {
                self.gl.DeleteProgram(handle.program);
                self.gl.DeleteVertexArrays(1, &handle.vao);
            }
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

        let gl = &self.gl;
        let mut fbo = 0;
        unsafe {
            gl.GenFramebuffers(1, &mut fbo);
            gl.BindFramebuffer(gl::DRAW_FRAMEBUFFER, fbo);
            let registry = self.base.registry.lock();
            for (index, texture) in color_textures.iter().enumerate() {
                if let Some(obj) = registry
                    .texture(*texture)
                    .and_then(|r| r.handle.downcast_ref::<GlTexture>().map(|t| t.obj))
                {
                    gl.FramebufferTexture2D(
                        gl::DRAW_FRAMEBUFFER,
                        gl::COLOR_ATTACHMENT0 + index as GLenum,
                        gl::TEXTURE_2D,
                        obj,
                        0,
                    );
                }
            }
            if let Some(texture) = depth_texture {
                if let Some(obj) = registry
                    .texture(texture)
                    .and_then(|r| r.handle.downcast_ref::<GlTexture>().map(|t| t.obj))
                {
                    gl.FramebufferTexture2D(
                        gl::DRAW_FRAMEBUFFER,
                        gl::DEPTH_STENCIL_ATTACHMENT,
                        gl::TEXTURE_2D,
                        obj,
                        0,
                    );
                }
            }
            drop(registry);
            let status = gl.CheckFramebufferStatus(gl::DRAW_FRAMEBUFFER);
            gl.BindFramebuffer(gl::DRAW_FRAMEBUFFER, 0);
            if status != gl::FRAMEBUFFER_COMPLETE {
                gl.DeleteFramebuffers(1, &fbo);
                return self.base.errors.fail(
                    Severity::Error,
                    ErrorKind::ResourceCreationFailed,
                    format!("framebuffer incomplete: {:#x}", status),
                );
            }
        }

        let record = RenderTargetRecord {
            desc: desc.clone(),
            color_textures,
            depth_texture,
            name: desc.debug_name.clone(),
            handle: Box::new(GlRenderTarget { fbo }),
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
        if let Ok(handle) = record.handle.downcast::<GlRenderTarget>() {
            unsafe { self.gl.DeleteFramebuffers(1, &handle.fbo) };
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
        // the default framebuffer is the swap chain; the host's GL surface
        // must match the descriptor
        let mut state = self.state.lock();
        state.swapchain = Some(SwapchainState::Ready);
        self.base.set_dimensions(desc.width, desc.height);
        self.base.set_vsync(desc.vsync);
        Ok(())
    }

    fn resize_swap_chain(&self, width: u32, height: u32) -> Result<()> {
        self.base.ensure_live()?;
        let mut state = self.state.lock();
        let current = state.swapchain.ok_or_else(|| {
            GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain to resize")
        })?;
        if width == 0 || height == 0 {
            state.swapchain = Some(current.transition(SwapchainEvent::ResizeZero)?);
            return Ok(());
        }
        state.swapchain = Some(current.transition(SwapchainEvent::Resize)?);
        self.base.set_dimensions(width, height);
        Ok(())
    }

    fn swap_chain_state(&self) -> SwapchainState {
        self.state
            .lock()
            .swapchain
            .unwrap_or(SwapchainState::Uninitialised)
    }

    fn present(&self) -> Result<()> {
        self.base.ensure_live()?;
        let mut state = self.state.lock();
        match state.swapchain {
            Some(SwapchainState::Minimised) => Ok(()),
            Some(SwapchainState::Ready) => {
                let gl = &self.gl;
                let frame = state.frame_num;
                state.timeline.signal(gl, frame);
                state.frame_num += 1;
                if frame > MAX_FRAMES_IN_FLIGHT {
                    let wait_to = frame - MAX_FRAMES_IN_FLIGHT;
                    if !state.timeline.client_sync(gl, wait_to, FRAME_WAIT_TIMEOUT) {
                        self.base.errors.record(
                            Severity::Warning,
                            ErrorKind::TimeoutExpired,
                            "timed out pacing frames in flight",
                        );
                    }
                }
                unsafe { gl.Flush() };
                // the host swaps buffers after this returns
                Ok(())
            }
            Some(SwapchainState::OutOfDate) => Err(GraphicsError::new(
                ErrorKind::SwapChainOutOfDate,
                "swap chain needs recreation",
            )),
            Some(state) => Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                format!("present on a {:?} swap chain", state),
            )),
            None => Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "no swap chain to present",
            )),
        }
    }

    //----------------------------------------------------------------------------------------------

    fn create_command_buffer(&self) -> Result<CommandBuffer> {
        self.base.ensure_live()?;
        Ok(CommandBuffer::new(
            self.base.next_command_buffer_id(),
            Box::new(GlSink::default()),
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
            let sink = cb.sink_as::<GlSink>().ok_or_else(|| {
                GraphicsError::new(ErrorKind::InvalidCommandBuffer, "foreign sink")
            })?;
            std::mem::take(&mut sink.commands)
        };

        let result = {
            let mut state = self.state.lock();
            self.replay(&mut state, &commands)
        };
        if let Err(e) = result {
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

        {
            let mut profiler = self.base.profiler.lock();
            if let Some(counters) = profiler.counters_mut() {
                counters.merge(cb.counters());
            }
        }

        // GL queues behind the scenes; the driver has accepted the stream,
        // completion is tracked by the present-side timeline
        cb.mark_completed()?;
        Ok(())
    }

    fn wait_for_fence(&self, timeout_ns: u64) -> Result<bool> {
        self.base.ensure_live()?;
        let mut state = self.state.lock();
        let target = state.frame_num.saturating_sub(1);
        if target == 0 {
            return Ok(true);
        }
        let gl = &self.gl;
        Ok(state
            .timeline
            .client_sync(gl, target, Duration::from_nanos(timeout_ns)))
    }

    fn wait_idle(&self) -> Result<()> {
        self.base.ensure_live()?;
        unsafe { self.gl.Finish() };
        Ok(())
    }

    //----------------------------------------------------------------------------------------------

    fn deinit(&mut self) -> Result<()> {
        if self.base.state() == ember_render::DeviceState::Destroyed {
            return Ok(());
        }
        unsafe { self.gl.Finish() };

        let mut registry = self.base.registry.lock();
        for (_, record) in registry.drain_render_targets() {
            if let Ok(handle) = record.handle.downcast::<GlRenderTarget>() {
                unsafe { self.gl.DeleteFramebuffers(1, &handle.fbo) };
            }
        }
        for (_, record) in registry.drain_pipelines() {
            if let Ok(handle) = record.handle.downcast::<GlPipeline>() {
                unsafe {
                    self.gl.DeleteProgram(handle.program);
                    self.gl.DeleteVertexArrays(1, &handle.vao);
                }
            }
        }
        for (_, record) in registry.drain_shaders() {
            if let Ok(handle) = record.handle.downcast::<GlShader>() {
                unsafe { self.gl.DeleteShader(handle.obj) };
            }
        }
        for (_, record) in registry.drain_samplers() {
            if let Ok(handle) = record.handle.downcast::<GlSampler>() {
                unsafe { self.gl.DeleteSamplers(1, &handle.obj) };
            }
        }
        for (_, record) in registry.drain_buffers() {
            if let Ok(handle) = record.handle.downcast::<GlBuffer>() {
                unsafe { self.gl.DeleteBuffers(1, &handle.obj) };
                self.base.device_local.on_free(handle.block);
            }
        }
        for (_, record) in registry.drain_textures() {
            if let Ok(handle) = record.handle.downcast::<GlTexture>() {
                unsafe { self.gl.DeleteTextures(1, &handle.obj) };
                self.base.device_local.on_free(handle.block);
            }
        }
        drop(registry);

        self.base.pipeline_cache.clear();

        let mut state = self.state.lock();
        if let Some(swapchain) = state.swapchain.take() {
            let _ = swapchain.transition(SwapchainEvent::Destroy);
        }
        unsafe { self.gl.DeleteBuffers(1, &state.push_constants) };
        state.timeline.destroy(&self.gl);
        drop(state);

        if !self.debug_relay.is_null() {
            unsafe {
                if self.gl.DebugMessageCallback.is_loaded() {
                    self.gl.DebugMessageCallback(None, ptr::null());
                }
                drop(Box::from_raw(self.debug_relay));
            }
            self.debug_relay = ptr::null_mut();
        }

        self.base.transition(DeviceEvent::Destroy)?;
        log::info!("GL device destroyed");
        Ok(())
    }
}

impl Drop for OpenGlDevice {
    fn drop(&mut self) {
        if self.base.state() == ember_render::DeviceState::Live {
            let _ = self.deinit();
        }
    }
}

/// Inserts the define header after the `#version` line when one is present,
/// otherwise ahead of everything.
fn splice_defines(source: &str, header: &str) -> String {
    if header.is_empty() {
        return source.to_owned();
    }
    match source.lines().next() {
        Some(first) if first.trim_start().starts_with("#version") => {
            let rest_at = source.find('\n').map(|i| i + 1).unwrap_or(source.len());
            format!("{}{}{}", &source[..rest_at], header, &source[rest_at..])
        }
        _ => format!("{}{}", header, source),
    }
}

#[cfg(test)]
mod tests {
    use super::splice_defines;

    #[test]
    fn defines_go_after_version() {
        let out = splice_defines("#version 450\nvoid main() {}\n", "#define A 1\n");
        assert_eq!(out, "#version 450\n#define A 1\nvoid main() {}\n");
        let out = splice_defines("void main() {}\n", "#define A 1\n");
        assert_eq!(out, "#define A 1\nvoid main() {}\n");
    }
}
