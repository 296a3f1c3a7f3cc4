//! Minimal frame loop: probe, select, draw a triangle, print the counters.
//!
//! Runs on any host; without GPU drivers the manager falls back to the
//! software rasteriser.

use std::sync::Arc;

use ember_render::command::{CommandBuffer, DrawParams, Viewport};
use ember_render::device::GraphicsDevice;
use ember_render::renderpass::RenderPassDesc;
use ember_render::shader::{ShaderDesc, ShaderStage};
use ember_render::swapchain::SwapchainDesc;
use ember_render::{BackendKind, PipelineDesc, TextureFormat};
use ember_renderer::{AdaptiveRenderer, BackendManager, ManagerOptions};

const VS: &str = r#"
#version 450
layout(location = 0) out vec3 v_color;
vec2 POS[3] = vec2[](vec2(0.0, -0.5), vec2(0.5, 0.5), vec2(-0.5, 0.5));
vec3 COL[3] = vec3[](vec3(1, 0, 0), vec3(0, 1, 0), vec3(0, 0, 1));
void main() {
    gl_Position = vec4(POS[gl_VertexIndex], 0.0, 1.0);
    v_color = COL[gl_VertexIndex];
}
"#;

const FS: &str = r#"
#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 o_color;
void main() { o_color = vec4(v_color, 1.0); }
"#;

fn main() -> ember_render::Result<()> {
    pretty_env_logger::init();

    // headless demo: no window, GLSL straight into the device, so ask for
    // the software backend up front
    let options = ManagerOptions {
        preferred_backend: Some(BackendKind::Software),
        ..ManagerOptions::default()
    };
    let manager = Arc::new(BackendManager::new(options)?);
    println!("primary backend: {}", manager.primary_kind());
    println!("available: {:?}", manager.available_backends());

    let mut swapchain = SwapchainDesc::new(1280, 720);
    swapchain.format = TextureFormat::Rgba8Unorm;
    manager.create_swap_chain(&swapchain)?;

    let pipeline = {
        let device = manager.device();
        let vs = device.create_shader(&ShaderDesc::from_text(VS, ShaderStage::Vertex))?;
        let fs = device.create_shader(&ShaderDesc::from_text(FS, ShaderStage::Fragment))?;
        device.create_pipeline(&PipelineDesc {
            vertex_shader: Some(vs),
            fragment_shader: Some(fs),
            color_formats: vec![TextureFormat::Rgba8Unorm],
            ..PipelineDesc::default()
        })?
    };

    let renderer = AdaptiveRenderer::new(manager.clone());
    let mut payload = |device: &dyn GraphicsDevice, cb: &mut CommandBuffer| {
        let pass =
            device.create_render_pass(&RenderPassDesc::clear_swap_chain([0.1, 0.1, 0.12, 1.0]))?;
        cb.begin_render_pass(&pass)?;
        cb.set_viewport(Viewport::new(0.0, 0.0, 1280.0, 720.0))?;
        cb.bind_pipeline(pipeline)?;
        cb.draw(DrawParams::vertices(3))?;
        cb.end_render_pass()
    };

    let mut last = None;
    for _ in 0..60 {
        last = Some(renderer.render(&mut payload)?);
    }
    if let Some(frame) = last {
        println!(
            "frame {}: {} draw call(s), {} triangle(s), {:?} cpu",
            frame.frame_index, frame.counters.draw_calls, frame.counters.triangles, frame.cpu_time
        );
    }

    manager.deinit()
}
