//! Contract-level tests for the software backend.

use ember_render::command::{DrawParams, Viewport};
use ember_render::device::{DeviceOptions, GraphicsDevice};
use ember_render::renderpass::{RenderPassDesc, RenderTargetDesc};
use ember_render::shader::{ShaderDesc, ShaderStage};
use ember_render::swapchain::{SwapchainDesc, SwapchainState};
use ember_render::texture::{TextureDesc, TextureUsage};
use ember_render::{
    BufferDesc, BufferUsage, ErrorKind, PipelineDesc, ResourceId, TextureFormat,
};
use ember_render_soft::SoftwareDevice;

const VS: &str = "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n";
const FS: &str =
    "#version 450\nlayout(location = 0) out vec4 o_color;\nvoid main() { o_color = vec4(1.0); }\n";

fn device() -> SoftwareDevice {
    SoftwareDevice::new(&DeviceOptions::default()).unwrap()
}

fn device_with_swapchain(width: u32, height: u32) -> SoftwareDevice {
    let device = device();
    let mut desc = SwapchainDesc::new(width, height);
    desc.format = TextureFormat::Rgba8Unorm;
    device.create_swap_chain(&desc).unwrap();
    device
}

fn simple_pipeline(device: &SoftwareDevice) -> ember_render::PipelineId {
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
    device.create_pipeline(&desc).unwrap()
}

//--------------------------------------------------------------------------------------------------

#[test]
fn triangle_on_swap_chain_counts_one_draw() {
    let device = device_with_swapchain(1280, 720);
    let pipeline = simple_pipeline(&device);

    device.begin_frame().unwrap();

    let mut cb = device.create_command_buffer().unwrap();
    cb.begin().unwrap();
    let pass = device
        .create_render_pass(&RenderPassDesc::clear_swap_chain([0.2, 0.3, 0.4, 1.0]))
        .unwrap();
    cb.begin_render_pass(&pass).unwrap();
    cb.set_viewport(Viewport::new(0.0, 0.0, 1280.0, 720.0)).unwrap();
    cb.bind_pipeline(pipeline).unwrap();
    cb.draw(DrawParams::vertices(3)).unwrap();
    cb.end_render_pass().unwrap();
    cb.end().unwrap();
    device.submit_command_buffer(&mut cb).unwrap();

    let frame = device.end_frame().unwrap();
    assert_eq!(frame.counters.draw_calls, 1);
    assert_eq!(frame.counters.triangles, 1);

    device.present().unwrap();

    // the clear color must land exactly in untouched pixels: bottom-right
    // corner of the previous image
    let image = device.read_swapchain_image().unwrap();
    // presented image rotated; check the recorded one by rotating back:
    // with 2 buffers, the drawn image is the other one. Instead verify via a
    // fresh draw-less frame on the current image.
    assert_eq!(image.len(), 1280 * 720 * 4);
}

#[test]
fn clear_color_is_honoured_exactly() {
    let device = device_with_swapchain(16, 16);
    device.begin_frame().unwrap();
    let mut cb = device.create_command_buffer().unwrap();
    cb.begin().unwrap();
    let pass = device
        .create_render_pass(&RenderPassDesc::clear_swap_chain([0.2, 0.4, 0.6, 1.0]))
        .unwrap();
    cb.begin_render_pass(&pass).unwrap();
    cb.end_render_pass().unwrap();
    cb.end().unwrap();
    device.submit_command_buffer(&mut cb).unwrap();
    device.end_frame().unwrap();

    let image = device.read_swapchain_image().unwrap();
    let expected = [
        (0.2f32 * 255.0 + 0.5) as u8,
        (0.4f32 * 255.0 + 0.5) as u8,
        (0.6f32 * 255.0 + 0.5) as u8,
        255,
    ];
    assert_eq!(&image[0..4], &expected);
    assert_eq!(&image[image.len() - 4..], &expected);
}

#[test]
fn deterministic_placeholder_output() {
    let render = |device: &SoftwareDevice| {
        let pipeline = simple_pipeline(device);
        device.begin_frame().unwrap();
        let mut cb = device.create_command_buffer().unwrap();
        cb.begin().unwrap();
        let pass = device
            .create_render_pass(&RenderPassDesc::clear_swap_chain([0.0, 0.0, 0.0, 1.0]))
            .unwrap();
        cb.begin_render_pass(&pass).unwrap();
        cb.bind_pipeline(pipeline).unwrap();
        cb.draw(DrawParams::vertices(3)).unwrap();
        cb.end_render_pass().unwrap();
        cb.end().unwrap();
        device.submit_command_buffer(&mut cb).unwrap();
        device.end_frame().unwrap();
        device.read_swapchain_image().unwrap()
    };

    let a = render(&device_with_swapchain(64, 64));
    let b = render(&device_with_swapchain(64, 64));
    assert_eq!(a, b);
}

#[test]
fn resize_swap_chain_and_minimise() {
    let device = device_with_swapchain(1280, 720);
    assert_eq!(device.dimensions(), (1280, 720));

    device.resize_swap_chain(1920, 1080).unwrap();
    assert_eq!(device.dimensions(), (1920, 1080));
    assert_eq!(device.swap_chain_state(), SwapchainState::Ready);
    device.present().unwrap();

    // repeating the same resize is observationally one call
    device.resize_swap_chain(1920, 1080).unwrap();
    assert_eq!(device.dimensions(), (1920, 1080));

    // zero extent defers: minimised, presents succeed with no work
    device.resize_swap_chain(0, 0).unwrap();
    assert_eq!(device.swap_chain_state(), SwapchainState::Minimised);
    device.present().unwrap();
    assert_eq!(device.dimensions(), (1920, 1080));

    device.resize_swap_chain(800, 600).unwrap();
    assert_eq!(device.swap_chain_state(), SwapchainState::Ready);
    device.present().unwrap();
}

#[test]
fn pipeline_cache_returns_same_object_and_creates_once() {
    let device = device();
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
    let p2 = device.create_pipeline(&desc.clone()).unwrap();
    assert_eq!(p1, p2);
    assert_eq!(device.native_pipeline_creations(), 1);

    let mut other = desc.clone();
    other.topology = ember_render::pipeline::PrimitiveTopology::LineList;
    let p3 = device.create_pipeline(&other).unwrap();
    assert_ne!(p1, p3);
    assert_eq!(device.native_pipeline_creations(), 2);
}

#[test]
fn registry_is_empty_after_deinit() {
    let mut device = device_with_swapchain(64, 64);
    let texture = device
        .create_texture(&TextureDesc::new(32, 32, TextureFormat::Rgba8Unorm))
        .unwrap();
    let _buffer = device
        .create_buffer(&BufferDesc::new(1024, BufferUsage::VERTEX))
        .unwrap();
    let _pipeline = simple_pipeline(&device);
    let _target = device
        .create_render_target(
            &RenderTargetDesc::new(32, 32, TextureFormat::Rgba8Unorm)
                .with_depth(TextureFormat::Depth24Stencil8),
        )
        .unwrap();
    device.destroy_texture(texture).unwrap();

    assert!(device.resource_stats().total_resources() > 0);
    device.deinit().unwrap();

    let stats = device.resource_stats();
    assert_eq!(stats.total_resources(), 0);
    assert_eq!(stats.total_bytes(), 0);
    // memory accounting closes out with the registry
    assert_eq!(
        device.base().memory_stats.total_allocated(),
        device.base().memory_stats.total_freed()
    );
}

#[test]
fn memory_accounting_matches_registry() {
    let device = device();
    let t = device
        .create_texture(&TextureDesc::new(16, 16, TextureFormat::Rgba8Unorm))
        .unwrap();
    let b = device
        .create_buffer(&BufferDesc::new(512, BufferUsage::UNIFORM))
        .unwrap();

    let stats = device.resource_stats();
    assert_eq!(
        device.base().memory_stats.live_bytes(),
        stats.total_bytes()
    );

    device.destroy_texture(t).unwrap();
    device.destroy_buffer(b).unwrap();
    assert_eq!(device.base().memory_stats.live_bytes(), 0);
}

#[test]
fn submit_rejects_stale_resources() {
    let device = device_with_swapchain(64, 64);
    let pipeline = simple_pipeline(&device);

    let mut cb = device.create_command_buffer().unwrap();
    cb.begin().unwrap();
    let pass = device
        .create_render_pass(&RenderPassDesc::clear_swap_chain([0.0, 0.0, 0.0, 1.0]))
        .unwrap();
    cb.begin_render_pass(&pass).unwrap();
    cb.bind_pipeline(pipeline).unwrap();
    cb.draw(DrawParams::vertices(3)).unwrap();
    cb.end_render_pass().unwrap();
    cb.end().unwrap();

    device.destroy_pipeline(pipeline).unwrap();
    let err = device.submit_command_buffer(&mut cb).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidCommandBuffer);
}

#[test]
fn update_buffer_bounds_checked() {
    let device = device();
    let buffer = device
        .create_buffer(&BufferDesc::new(16, BufferUsage::UNIFORM).host_visible())
        .unwrap();
    device.update_buffer(buffer, 0, &[1; 16]).unwrap();
    device.update_buffer(buffer, 8, &[2; 8]).unwrap();
    let err = device.update_buffer(buffer, 9, &[3; 8]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidMemoryAccess);
}

#[test]
fn shader_stage_detection_and_reflection() {
    let device = device();
    let src = "#version 450\n#pragma stage(fragment)\nlayout(location = 0) out vec4 o;\nvoid main() {}\n";
    let mut desc = ShaderDesc::from_text(src, ShaderStage::Fragment);
    desc.stage = None; // force detection
    desc.options.reflect = true;
    let shader = device.create_shader(&desc).unwrap();

    let registry = device.base().registry.lock();
    let record = registry.shader(shader).unwrap();
    assert_eq!(record.stage, ShaderStage::Fragment);
    let reflection = record.reflection.as_ref().unwrap();
    assert_eq!(reflection.outputs.len(), 1);
}

#[test]
fn debug_names_round_trip() {
    let device = device();
    let texture = device
        .create_texture(
            &TextureDesc::new(8, 8, TextureFormat::R8Unorm).with_usage(TextureUsage::SAMPLED),
        )
        .unwrap();
    device.set_debug_name(ResourceId::Texture(texture), "shadow.map");
    let registry = device.base().registry.lock();
    assert_eq!(
        registry.name_of(ResourceId::Texture(texture)),
        Some("shadow.map")
    );
    assert_eq!(
        registry.find_by_name("shadow.map"),
        Some(ResourceId::Texture(texture))
    );
}

#[test]
fn lost_semantics_never_apply_but_destroyed_device_rejects_work() {
    let mut device = device();
    device.deinit().unwrap();
    let err = device
        .create_buffer(&BufferDesc::new(4, BufferUsage::VERTEX))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
}
