//! Backend-neutral command recording.
//!
//! A [`CommandBuffer`] couples the contract's state machine with a
//! backend-provided [`CommandSink`]. Legality (state transitions, render
//! pass pairing, debug-group discipline, zero-vertex draws) is enforced
//! here once, so a backend sink only ever sees a legal command stream.

use downcast_rs::{impl_downcast, Downcast};
use fxhash::FxHashSet;

use crate::error::{ErrorKind, GraphicsError, Result};
use crate::format::IndexFormat;
use crate::profiler::MarkerCounters;
use crate::registry::{BufferId, PipelineId, ResourceId, SamplerId, TextureId};
use crate::renderpass::RenderPass;
use crate::sync::ResourceBarrier;

/// Viewport rectangle with depth range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Viewport {
        Viewport {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Parameters for non-indexed draws.
#[derive(Copy, Clone, Debug)]
pub struct DrawParams {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawParams {
    pub fn vertices(vertex_count: u32) -> DrawParams {
        DrawParams {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Parameters for indexed draws.
#[derive(Copy, Clone, Debug)]
pub struct DrawIndexedParams {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

//--------------------------------------------------------------------------------------------------

/// Lifecycle of a command buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

impl CommandBufferState {
    fn expect(self, wanted: CommandBufferState, op: &str) -> Result<()> {
        if self == wanted {
            Ok(())
        } else {
            Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                format!("{} requires {:?} state, buffer is {:?}", op, wanted, self),
            ))
        }
    }
}

//--------------------------------------------------------------------------------------------------

/// What a backend must implement to receive recorded commands.
///
/// Sinks may translate eagerly (Vulkan records into a native command buffer)
/// or buffer the stream and replay it at submit (OpenGL, software). All
/// resource references arrive as registry ids; resolving and lifetime-checking
/// them is the device's job at submit time.
pub trait CommandSink: Downcast + Send {
    fn begin(&mut self) -> Result<()>;
    fn begin_render_pass(&mut self, pass: &RenderPass) -> Result<()>;
    fn end_render_pass(&mut self) -> Result<()>;
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;
    fn set_scissor(&mut self, rect: ScissorRect) -> Result<()>;
    fn bind_pipeline(&mut self, pipeline: PipelineId) -> Result<()>;
    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) -> Result<()>;
    fn bind_index_buffer(&mut self, buffer: BufferId, format: IndexFormat, offset: u64)
        -> Result<()>;
    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferId) -> Result<()>;
    fn bind_texture(&mut self, slot: u32, texture: TextureId, sampler: SamplerId) -> Result<()>;
    fn push_constants(&mut self, offset: u32, data: &[u8]) -> Result<()>;
    fn draw(&mut self, params: DrawParams) -> Result<()>;
    fn draw_indexed(&mut self, params: DrawIndexedParams) -> Result<()>;
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()>;
    fn resource_barrier(&mut self, barrier: &ResourceBarrier) -> Result<()>;
    fn begin_debug_group(&mut self, name: &str) -> Result<()>;
    fn end_debug_group(&mut self) -> Result<()>;
    fn end(&mut self) -> Result<()>;
}

impl_downcast!(CommandSink);

//--------------------------------------------------------------------------------------------------

/// An ordered recording of GPU commands, submittable as an atomic unit.
pub struct CommandBuffer {
    id: u64,
    state: CommandBufferState,
    in_render_pass: bool,
    debug_group_depth: usize,
    pipeline: Option<PipelineId>,
    /// Non-owning references to every resource the recording touches,
    /// revalidated against the registry at submit time.
    used_resources: FxHashSet<ResourceId>,
    counters: MarkerCounters,
    sink: Box<dyn CommandSink>,
}

impl CommandBuffer {
    /// Backends construct command buffers through the device contract only.
    pub fn new(id: u64, sink: Box<dyn CommandSink>) -> CommandBuffer {
        CommandBuffer {
            id,
            state: CommandBufferState::Initial,
            in_render_pass: false,
            debug_group_depth: 0,
            pipeline: None,
            used_resources: FxHashSet::default(),
            counters: MarkerCounters::default(),
            sink,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Counters accumulated while recording; the device folds these into the
    /// frame profiler when the buffer is submitted.
    pub fn counters(&self) -> &MarkerCounters {
        &self.counters
    }

    pub fn used_resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.used_resources.iter().copied()
    }

    /// Downcast access to the backend's own sink type at submit time.
    pub fn sink_as<T: CommandSink>(&mut self) -> Option<&mut T> {
        self.sink.downcast_mut::<T>()
    }

    fn ensure_recording(&self, op: &str) -> Result<()> {
        self.state.expect(CommandBufferState::Recording, op)
    }

    //----------------------------------------------------------------------------------------------
    // State transitions

    /// `initial → recording`.
    pub fn begin(&mut self) -> Result<()> {
        self.state.expect(CommandBufferState::Initial, "begin_command_buffer")?;
        self.sink.begin()?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// `recording → executable`. Open render passes or debug groups make the
    /// recording malformed and are reported, not silently closed.
    pub fn end(&mut self) -> Result<()> {
        self.ensure_recording("end_command_buffer")?;
        if self.in_render_pass {
            return Err(GraphicsError::new(
                ErrorKind::RenderPassInProgress,
                "end_command_buffer with an open render pass",
            ));
        }
        if self.debug_group_depth != 0 {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                format!(
                    "end_command_buffer with {} open debug group(s)",
                    self.debug_group_depth
                ),
            ));
        }
        self.sink.end()?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// `executable → pending`; called by the device inside submit.
    pub fn mark_submitted(&mut self) -> Result<()> {
        self.state.expect(CommandBufferState::Executable, "submit_command_buffer")?;
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    /// `pending → initial`; called by the device when the signal fence is
    /// observed complete. The recording is reset for reuse.
    pub fn mark_completed(&mut self) -> Result<()> {
        self.state.expect(CommandBufferState::Pending, "complete")?;
        self.state = CommandBufferState::Initial;
        self.pipeline = None;
        self.used_resources.clear();
        self.counters = MarkerCounters::default();
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Render passes

    pub fn begin_render_pass(&mut self, pass: &RenderPass) -> Result<()> {
        self.ensure_recording("begin_render_pass")?;
        if self.in_render_pass {
            return Err(GraphicsError::new(
                ErrorKind::RenderPassInProgress,
                "render pass already in progress",
            ));
        }
        if let crate::renderpass::PassTarget::Offscreen(id) = pass.desc.target {
            self.used_resources.insert(ResourceId::RenderTarget(id));
        }
        self.sink.begin_render_pass(pass)?;
        self.in_render_pass = true;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        self.ensure_recording("end_render_pass")?;
        if !self.in_render_pass {
            return Err(GraphicsError::new(
                ErrorKind::RenderPassNotInProgress,
                "no render pass to end",
            ));
        }
        self.sink.end_render_pass()?;
        self.in_render_pass = false;
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Fixed state

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.ensure_recording("set_viewport")?;
        self.sink.set_viewport(viewport)
    }

    pub fn set_scissor(&mut self, rect: ScissorRect) -> Result<()> {
        self.ensure_recording("set_scissor")?;
        self.sink.set_scissor(rect)
    }

    //----------------------------------------------------------------------------------------------
    // Bindings

    pub fn bind_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.ensure_recording("bind_pipeline")?;
        if self.pipeline != Some(pipeline) {
            self.counters.pipeline_changes += 1;
        }
        self.pipeline = Some(pipeline);
        self.used_resources.insert(ResourceId::Pipeline(pipeline));
        self.sink.bind_pipeline(pipeline)
    }

    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) -> Result<()> {
        self.ensure_recording("bind_vertex_buffer")?;
        self.used_resources.insert(ResourceId::Buffer(buffer));
        self.counters.descriptor_bindings += 1;
        self.sink.bind_vertex_buffer(slot, buffer, offset)
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: BufferId,
        format: IndexFormat,
        offset: u64,
    ) -> Result<()> {
        self.ensure_recording("bind_index_buffer")?;
        self.used_resources.insert(ResourceId::Buffer(buffer));
        self.counters.descriptor_bindings += 1;
        self.sink.bind_index_buffer(buffer, format, offset)
    }

    pub fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferId) -> Result<()> {
        self.ensure_recording("bind_uniform_buffer")?;
        self.used_resources.insert(ResourceId::Buffer(buffer));
        self.counters.descriptor_bindings += 1;
        self.sink.bind_uniform_buffer(slot, buffer)
    }

    pub fn bind_texture(&mut self, slot: u32, texture: TextureId, sampler: SamplerId) -> Result<()> {
        self.ensure_recording("bind_texture")?;
        self.used_resources.insert(ResourceId::Texture(texture));
        self.used_resources.insert(ResourceId::Sampler(sampler));
        self.counters.descriptor_bindings += 1;
        self.sink.bind_texture(slot, texture, sampler)
    }

    pub fn push_constants(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.ensure_recording("push_constants")?;
        self.sink.push_constants(offset, data)
    }

    //----------------------------------------------------------------------------------------------
    // Draws and dispatches

    pub fn draw(&mut self, params: DrawParams) -> Result<()> {
        self.ensure_recording("draw")?;
        if !self.in_render_pass {
            return Err(GraphicsError::new(
                ErrorKind::RenderPassNotInProgress,
                "draw outside a render pass",
            ));
        }
        if self.pipeline.is_none() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidPipelineState,
                "draw with no pipeline bound",
            ));
        }
        if params.instance_count == 0 {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "draw with instance_count of zero",
            ));
        }
        if params.vertex_count == 0 {
            // explicitly a no-op, not an error
            return Ok(());
        }
        let vertices = u64::from(params.vertex_count) * u64::from(params.instance_count);
        self.counters.draw_calls += 1;
        self.counters.vertices += vertices;
        self.counters.triangles +=
            u64::from(params.vertex_count / 3) * u64::from(params.instance_count);
        self.sink.draw(params)
    }

    pub fn draw_indexed(&mut self, params: DrawIndexedParams) -> Result<()> {
        self.ensure_recording("draw_indexed")?;
        if !self.in_render_pass {
            return Err(GraphicsError::new(
                ErrorKind::RenderPassNotInProgress,
                "draw_indexed outside a render pass",
            ));
        }
        if self.pipeline.is_none() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidPipelineState,
                "draw_indexed with no pipeline bound",
            ));
        }
        if params.instance_count == 0 {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "draw_indexed with instance_count of zero",
            ));
        }
        if params.index_count == 0 {
            return Ok(());
        }
        self.counters.draw_calls += 1;
        self.counters.vertices +=
            u64::from(params.index_count) * u64::from(params.instance_count);
        self.counters.triangles +=
            u64::from(params.index_count / 3) * u64::from(params.instance_count);
        self.sink.draw_indexed(params)
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.ensure_recording("dispatch")?;
        if self.in_render_pass {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "dispatch inside a render pass",
            ));
        }
        if self.pipeline.is_none() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidPipelineState,
                "dispatch with no pipeline bound",
            ));
        }
        self.counters.compute_dispatches += 1;
        self.sink.dispatch(x, y, z)
    }

    //----------------------------------------------------------------------------------------------
    // Barriers

    pub fn resource_barrier(&mut self, barrier: ResourceBarrier) -> Result<()> {
        self.ensure_recording("resource_barrier")?;
        if self.in_render_pass {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "resource_barrier inside a render pass",
            ));
        }
        self.used_resources.insert(barrier.resource);
        if barrier.is_noop() {
            return Ok(());
        }
        self.counters.barriers += 1;
        self.sink.resource_barrier(&barrier)
    }

    //----------------------------------------------------------------------------------------------
    // Debug groups

    pub fn begin_debug_group(&mut self, name: &str) -> Result<()> {
        self.ensure_recording("begin_debug_group")?;
        self.debug_group_depth += 1;
        self.sink.begin_debug_group(name)
    }

    pub fn end_debug_group(&mut self) -> Result<()> {
        self.ensure_recording("end_debug_group")?;
        if self.debug_group_depth == 0 {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "end_debug_group without a matching begin_debug_group",
            ));
        }
        self.debug_group_depth -= 1;
        self.sink.end_debug_group()
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("in_render_pass", &self.in_render_pass)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderpass::RenderPassDesc;
    use slotmap::SlotMap;

    /// Sink that accepts everything; the tests target the wrapper's checks.
    struct NullSink;

    impl CommandSink for NullSink {
        fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        fn begin_render_pass(&mut self, _pass: &RenderPass) -> Result<()> {
            Ok(())
        }
        fn end_render_pass(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_viewport(&mut self, _viewport: Viewport) -> Result<()> {
            Ok(())
        }
        fn set_scissor(&mut self, _rect: ScissorRect) -> Result<()> {
            Ok(())
        }
        fn bind_pipeline(&mut self, _pipeline: PipelineId) -> Result<()> {
            Ok(())
        }
        fn bind_vertex_buffer(&mut self, _slot: u32, _buffer: BufferId, _offset: u64) -> Result<()> {
            Ok(())
        }
        fn bind_index_buffer(
            &mut self,
            _buffer: BufferId,
            _format: IndexFormat,
            _offset: u64,
        ) -> Result<()> {
            Ok(())
        }
        fn bind_uniform_buffer(&mut self, _slot: u32, _buffer: BufferId) -> Result<()> {
            Ok(())
        }
        fn bind_texture(
            &mut self,
            _slot: u32,
            _texture: TextureId,
            _sampler: SamplerId,
        ) -> Result<()> {
            Ok(())
        }
        fn push_constants(&mut self, _offset: u32, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        fn draw(&mut self, _params: DrawParams) -> Result<()> {
            Ok(())
        }
        fn draw_indexed(&mut self, _params: DrawIndexedParams) -> Result<()> {
            Ok(())
        }
        fn dispatch(&mut self, _x: u32, _y: u32, _z: u32) -> Result<()> {
            Ok(())
        }
        fn resource_barrier(&mut self, _barrier: &ResourceBarrier) -> Result<()> {
            Ok(())
        }
        fn begin_debug_group(&mut self, _name: &str) -> Result<()> {
            Ok(())
        }
        fn end_debug_group(&mut self) -> Result<()> {
            Ok(())
        }
        fn end(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn buffer() -> CommandBuffer {
        CommandBuffer::new(1, Box::new(NullSink))
    }

    fn pass() -> RenderPass {
        RenderPass::new(RenderPassDesc::clear_swap_chain([0.0, 0.0, 0.0, 1.0])).unwrap()
    }

    #[test]
    fn state_machine_happy_path() {
        let mut cb = buffer();
        assert_eq!(cb.state(), CommandBufferState::Initial);
        cb.begin().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Recording);
        cb.end().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Executable);
        cb.mark_submitted().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Pending);
        cb.mark_completed().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Initial);
    }

    #[test]
    fn illegal_transitions_do_not_mutate_state() {
        let mut cb = buffer();
        assert!(cb.end().is_err());
        assert_eq!(cb.state(), CommandBufferState::Initial);
        assert!(cb.mark_submitted().is_err());
        assert_eq!(cb.state(), CommandBufferState::Initial);

        cb.begin().unwrap();
        assert!(cb.begin().is_err());
        assert_eq!(cb.state(), CommandBufferState::Recording);
    }

    #[test]
    fn end_rejects_open_render_pass() {
        let mut cb = buffer();
        cb.begin().unwrap();
        cb.begin_render_pass(&pass()).unwrap();
        assert_eq!(cb.end().unwrap_err().kind, ErrorKind::RenderPassInProgress);
        cb.end_render_pass().unwrap();
        cb.end().unwrap();
    }

    #[test]
    fn render_pass_pairing() {
        let mut cb = buffer();
        cb.begin().unwrap();
        assert_eq!(
            cb.end_render_pass().unwrap_err().kind,
            ErrorKind::RenderPassNotInProgress
        );
        cb.begin_render_pass(&pass()).unwrap();
        assert_eq!(
            cb.begin_render_pass(&pass()).unwrap_err().kind,
            ErrorKind::RenderPassInProgress
        );
    }

    #[test]
    fn zero_vertex_draw_is_a_noop() {
        let mut pipelines: SlotMap<PipelineId, ()> = SlotMap::with_key();
        let pipeline = pipelines.insert(());

        let mut cb = buffer();
        cb.begin().unwrap();
        cb.begin_render_pass(&pass()).unwrap();
        cb.bind_pipeline(pipeline).unwrap();
        cb.draw(DrawParams::vertices(0)).unwrap();
        assert_eq!(cb.counters().draw_calls, 0);
        cb.draw(DrawParams::vertices(3)).unwrap();
        assert_eq!(cb.counters().draw_calls, 1);
        assert_eq!(cb.counters().triangles, 1);
    }

    #[test]
    fn draw_requires_pass_and_pipeline() {
        let mut cb = buffer();
        cb.begin().unwrap();
        assert_eq!(
            cb.draw(DrawParams::vertices(3)).unwrap_err().kind,
            ErrorKind::RenderPassNotInProgress
        );
        cb.begin_render_pass(&pass()).unwrap();
        assert_eq!(
            cb.draw(DrawParams::vertices(3)).unwrap_err().kind,
            ErrorKind::InvalidPipelineState
        );
    }

    #[test]
    fn debug_group_discipline() {
        let mut cb = buffer();
        cb.begin().unwrap();
        assert_eq!(
            cb.end_debug_group().unwrap_err().kind,
            ErrorKind::InvalidOperation
        );
        cb.begin_debug_group("frame").unwrap();
        assert!(cb.end().is_err()); // unmatched group
        cb.end_debug_group().unwrap();
        cb.end().unwrap();
    }

    #[test]
    fn used_resources_tracked() {
        let mut pipelines: SlotMap<PipelineId, ()> = SlotMap::with_key();
        let pipeline = pipelines.insert(());
        let mut cb = buffer();
        cb.begin().unwrap();
        cb.bind_pipeline(pipeline).unwrap();
        assert!(cb
            .used_resources()
            .any(|id| id == ResourceId::Pipeline(pipeline)));
    }
}
