//! End-to-end scenarios across probe, manager and adaptive renderer.
//!
//! The suite runs on whatever the host offers. Hosts without GPU drivers
//! exercise the fallback chain down to the software backend; hosts with a
//! live Vulkan ICD exercise the real thing, so assertions that depend on a
//! probe failing are made conditional on the probe's actual answer.

use std::sync::Arc;

use ember_render::command::{CommandBuffer, DrawParams, Viewport};
use ember_render::device::GraphicsDevice;
use ember_render::renderpass::RenderPassDesc;
use ember_render::shader::{ShaderDesc, ShaderStage};
use ember_render::swapchain::SwapchainDesc;
use ember_render::texture::TextureDesc;
use ember_render::{BackendKind, ErrorKind, PipelineDesc, TextureFormat};
use ember_renderer::{AdaptiveRenderer, BackendManager, ManagerOptions};

const VS: &str = "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n";
const FS: &str =
    "#version 450\nlayout(location = 0) out vec4 o_color;\nvoid main() { o_color = vec4(1.0); }\n";

fn manager_with(preferred: Option<BackendKind>) -> Arc<BackendManager> {
    let options = ManagerOptions {
        preferred_backend: preferred,
        auto_fallback: true,
        ..ManagerOptions::default()
    };
    Arc::new(BackendManager::new(options).unwrap())
}

fn build_pipeline(device: &dyn GraphicsDevice) -> ember_render::PipelineId {
    let vs = device
        .create_shader(&ShaderDesc::from_text(VS, ShaderStage::Vertex))
        .unwrap();
    let fs = device
        .create_shader(&ShaderDesc::from_text(FS, ShaderStage::Fragment))
        .unwrap();
    device
        .create_pipeline(&PipelineDesc {
            vertex_shader: Some(vs),
            fragment_shader: Some(fs),
            color_formats: vec![TextureFormat::Rgba8Unorm],
            ..PipelineDesc::default()
        })
        .unwrap()
}

//--------------------------------------------------------------------------------------------------

/// Fallback on unavailable preferred backend.
#[test]
fn fallback_from_preferred_backend() {
    let manager = manager_with(Some(BackendKind::Vulkan));
    let primary = manager.primary_kind();
    let available = manager.available_backends();

    assert!(!available.is_empty());
    assert!(available.contains(&primary));
    assert_eq!(*available.last().unwrap(), BackendKind::Software);

    if primary != BackendKind::Vulkan {
        // the probe rejected Vulkan on this host: it must be absent from the
        // availability list and the fallback must have left a warning behind
        assert!(!available.contains(&BackendKind::Vulkan));
        let device = manager.device();
        assert!(device.base().errors.contains(ErrorKind::BackendNotAvailable));
    }
}

/// A preferred backend this build never compiles cannot become primary, and
/// without fallback the failure surfaces.
#[test]
fn unsupported_preferred_without_fallback_fails() {
    let options = ManagerOptions {
        preferred_backend: Some(BackendKind::Direct3D12),
        auto_fallback: false,
        ..ManagerOptions::default()
    };
    let err = BackendManager::new(options).unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendNotAvailable);
}

/// Triangle on a 1280x720 swap chain: one draw call, one triangle, present
/// succeeds.
#[test]
fn triangle_frame_counts() {
    let manager = manager_with(Some(BackendKind::Software));
    let mut desc = SwapchainDesc::new(1280, 720);
    desc.format = TextureFormat::Rgba8Unorm;
    manager.create_swap_chain(&desc).unwrap();

    let device = manager.device();
    let pipeline = build_pipeline(device.as_ref());

    device.begin_frame().unwrap();
    let mut cb = device.create_command_buffer().unwrap();
    cb.begin().unwrap();
    let pass = device
        .create_render_pass(&RenderPassDesc::clear_swap_chain([0.2, 0.3, 0.4, 1.0]))
        .unwrap();
    cb.begin_render_pass(&pass).unwrap();
    cb.set_viewport(Viewport::new(0.0, 0.0, 1280.0, 720.0)).unwrap();
    cb.bind_pipeline(pipeline).unwrap();
    cb.draw(DrawParams {
        vertex_count: 3,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    })
    .unwrap();
    cb.end_render_pass().unwrap();
    cb.end().unwrap();
    device.submit_command_buffer(&mut cb).unwrap();

    let frame = device.end_frame().unwrap();
    assert_eq!(frame.counters.draw_calls, 1);
    assert_eq!(frame.counters.triangles, 1);
    device.present().unwrap();
}

/// Resize under load: 100 frames, then a resize; the next frame presents
/// without error and dimensions update.
#[test]
fn resize_under_load() {
    let manager = manager_with(Some(BackendKind::Software));
    manager
        .create_swap_chain(&SwapchainDesc::new(1280, 720))
        .unwrap();
    let renderer = AdaptiveRenderer::new(manager.clone());

    let mut payload = |device: &dyn GraphicsDevice, cb: &mut CommandBuffer| {
        let pass =
            device.create_render_pass(&RenderPassDesc::clear_swap_chain([0.1, 0.1, 0.1, 1.0]))?;
        cb.begin_render_pass(&pass)?;
        cb.end_render_pass()
    };

    for _ in 0..100 {
        renderer.render(&mut payload).unwrap();
    }

    manager.resize_swap_chain(1920, 1080).unwrap();
    {
        let device = manager.device();
        assert_eq!(device.dimensions(), (1920, 1080));
    }

    // frame 101
    renderer.render(&mut payload).unwrap();
}

/// Backend switch destroys the old device and leaves both registries empty.
#[test]
fn switch_backend_preserves_registry_emptiness() {
    let manager = manager_with(Some(BackendKind::Software));
    manager
        .create_swap_chain(&SwapchainDesc::new(640, 480))
        .unwrap();

    {
        let device = manager.device();
        let t1 = device
            .create_texture(&TextureDesc::new(32, 32, TextureFormat::Rgba8Unorm))
            .unwrap();
        let t2 = device
            .create_texture(&TextureDesc::new(64, 64, TextureFormat::Rgba8Unorm))
            .unwrap();
        device.destroy_texture(t1).unwrap();
        device.destroy_texture(t2).unwrap();
    }

    // try a switch to OpenGL; headless hosts reject it and keep software
    let switched = manager.switch_backend(BackendKind::OpenGl).unwrap();
    if switched {
        assert_eq!(manager.primary_kind(), BackendKind::OpenGl);
    } else {
        assert_eq!(manager.primary_kind(), BackendKind::Software);
        assert!(manager
            .device()
            .base()
            .errors
            .contains(ErrorKind::BackendNotAvailable));
    }

    let stats = manager.device().resource_stats();
    assert_eq!(stats.total_resources(), 0);
}

/// A switch request is honoured between frames by the adaptive renderer.
#[test]
fn switch_request_between_frames() {
    let manager = manager_with(Some(BackendKind::Software));
    manager
        .create_swap_chain(&SwapchainDesc::new(320, 240))
        .unwrap();
    let renderer = AdaptiveRenderer::new(manager.clone());

    let mut payload = |device: &dyn GraphicsDevice, cb: &mut CommandBuffer| {
        let pass =
            device.create_render_pass(&RenderPassDesc::clear_swap_chain([0.0, 0.0, 0.0, 1.0]))?;
        cb.begin_render_pass(&pass)?;
        cb.end_render_pass()
    };

    renderer.render(&mut payload).unwrap();
    // switching to the current kind is a no-op success
    manager.request_switch(BackendKind::Software).unwrap();
    renderer.render(&mut payload).unwrap();
    assert_eq!(manager.primary_kind(), BackendKind::Software);
}

/// Pipeline cache: byte-equal descriptors yield the same pipeline object.
#[test]
fn pipeline_cache_across_equal_descriptors() {
    let manager = manager_with(Some(BackendKind::Software));
    let device = manager.device();

    let vs = device
        .create_shader(&ShaderDesc::from_text(VS, ShaderStage::Vertex))
        .unwrap();
    let fs = device
        .create_shader(&ShaderDesc::from_text(FS, ShaderStage::Fragment))
        .unwrap();
    let desc = PipelineDesc {
        vertex_shader: Some(vs),
        fragment_shader: Some(fs),
        color_formats: vec![TextureFormat::Rgba8Unorm],
        ..PipelineDesc::default()
    };
    let p1 = device.create_pipeline(&desc).unwrap();
    let p2 = device.create_pipeline(&desc).unwrap();
    assert_eq!(p1, p2);
    assert_eq!(device.base().pipeline_cache.misses(), 1);
    assert_eq!(device.base().pipeline_cache.hits(), 1);
}

/// Shader include resolution through the device contract.
#[test]
fn shader_include_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let include_dir = dir.path().join("shaders/common");
    std::fs::create_dir_all(&include_dir).unwrap();
    std::fs::write(
        include_dir.join("lighting.glsl"),
        "float lambert(vec3 n, vec3 l) { return max(dot(n, l), 0.0); }\n",
    )
    .unwrap();

    let manager = manager_with(Some(BackendKind::Software));
    let device = manager.device();

    let src = "#version 450\n#include \"lighting.glsl\"\nvoid main() { gl_Position = vec4(0.0); }\n";
    let mut desc = ShaderDesc::from_text(src, ShaderStage::Vertex);
    desc.options.include_paths = vec![include_dir.clone()];
    device.create_shader(&desc).unwrap();

    // cyclic include aborts with ShaderCompilationFailed
    std::fs::write(include_dir.join("a.glsl"), "#include \"b.glsl\"\n").unwrap();
    std::fs::write(include_dir.join("b.glsl"), "#include \"a.glsl\"\n").unwrap();
    let mut desc = ShaderDesc::from_text(
        "#version 450\n#include \"a.glsl\"\nvoid main() {}\n",
        ShaderStage::Vertex,
    );
    desc.options.include_paths = vec![include_dir];
    let err = device.create_shader(&desc).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ShaderCompilationFailed);
}

/// The manager's teardown drains every owned device.
#[test]
fn manager_deinit_closes_registry() {
    let manager = manager_with(Some(BackendKind::Software));
    {
        let device = manager.device();
        device
            .create_texture(&TextureDesc::new(16, 16, TextureFormat::Rgba8Unorm))
            .unwrap();
    }
    manager.deinit().unwrap();
    assert_eq!(manager.device().resource_stats().total_resources(), 0);
}
