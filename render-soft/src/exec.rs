//! Synchronous replay of a recorded command stream against host memory.

use std::time::{Duration, Instant};

use ember_render::base::BackendBase;
use ember_render::command::{ScissorRect, Viewport};
use ember_render::error::{ErrorKind, GraphicsError, Result};
use ember_render::format::TextureFormat;
use ember_render::registry::{RenderTargetId, ResourceRegistry, TextureId};
use ember_render::renderpass::{LoadOp, PassTarget, RenderPass};

use crate::resources::{SoftCmd, SoftPipeline, SoftSwapchain, SoftTexture};

/// Packs a normalised color into the format's byte layout.
fn pack_color(format: TextureFormat, color: [f32; 4]) -> ([u8; 4], usize) {
    let to_u8 = |c: f32| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    let [r, g, b, a] = color;
    match format {
        TextureFormat::Rgba8Unorm => ([to_u8(r), to_u8(g), to_u8(b), to_u8(a)], 4),
        TextureFormat::Bgra8Unorm => ([to_u8(b), to_u8(g), to_u8(r), to_u8(a)], 4),
        TextureFormat::Rgb8Unorm => ([to_u8(r), to_u8(g), to_u8(b), 0], 3),
        TextureFormat::Rg8Unorm => ([to_u8(r), to_u8(g), 0, 0], 2),
        TextureFormat::R8Unorm => ([to_u8(r), 0, 0, 0], 1),
        // depth formats never reach color packing; exec clears them separately
        TextureFormat::Depth24Stencil8 | TextureFormat::Depth32Float => ([0, 0, 0, 0], 4),
    }
}

fn fill_color(data: &mut [u8], format: TextureFormat, color: [f32; 4]) {
    let (bytes, stride) = pack_color(format, color);
    for pixel in data.chunks_exact_mut(stride) {
        pixel.copy_from_slice(&bytes[..stride]);
    }
}

fn fill_depth(data: &mut [u8], format: TextureFormat, depth: f32, stencil: u32) {
    match format {
        TextureFormat::Depth32Float => {
            let bytes = depth.to_le_bytes();
            for pixel in data.chunks_exact_mut(4) {
                pixel.copy_from_slice(&bytes);
            }
        }
        TextureFormat::Depth24Stencil8 => {
            let d24 = (depth.clamp(0.0, 1.0) * 16_777_215.0) as u32;
            let packed = (d24 << 8) | (stencil & 0xff);
            let bytes = packed.to_le_bytes();
            for pixel in data.chunks_exact_mut(4) {
                pixel.copy_from_slice(&bytes);
            }
        }
        _ => {}
    }
}

//--------------------------------------------------------------------------------------------------

/// Where the open render pass draws to, resolved once at `BeginRenderPass`.
enum Target {
    SwapChain,
    Offscreen {
        colors: Vec<TextureId>,
        width: u32,
        height: u32,
    },
}

/// Timings the replay hands back for the profiler.
#[derive(Default)]
pub struct ExecStats {
    pub draw_time: Duration,
    pub transfer_time: Duration,
}

pub struct ExecContext<'a> {
    pub registry: &'a mut ResourceRegistry,
    pub swapchain: &'a mut Option<SoftSwapchain>,
    pub base: &'a BackendBase,
}

struct ReplayState {
    target: Option<Target>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    pipeline_key: u64,
    draw_index: u64,
}

pub fn execute(ctx: &mut ExecContext, commands: &[SoftCmd]) -> Result<ExecStats> {
    let mut stats = ExecStats::default();
    let mut state = ReplayState {
        target: None,
        viewport: None,
        scissor: None,
        pipeline_key: 0,
        draw_index: 0,
    };

    for cmd in commands {
        match cmd {
            SoftCmd::BeginRenderPass(pass) => begin_pass(ctx, &mut state, pass)?,
            SoftCmd::EndRenderPass => {
                state.target = None;
                state.viewport = None;
                state.scissor = None;
            }
            SoftCmd::SetViewport(viewport) => state.viewport = Some(*viewport),
            SoftCmd::SetScissor(rect) => state.scissor = Some(*rect),
            SoftCmd::BindPipeline(pipeline) => {
                let record = ctx.registry.pipeline(*pipeline).ok_or_else(|| {
                    GraphicsError::new(ErrorKind::InvalidResource, "pipeline destroyed")
                })?;
                state.pipeline_key = record
                    .handle
                    .downcast_ref::<SoftPipeline>()
                    .map(|p| p.cache_key)
                    .unwrap_or(record.cache_key);
            }
            SoftCmd::Draw(params) => {
                let start = Instant::now();
                rasterize(ctx, &mut state, u64::from(params.first_vertex))?;
                stats.draw_time += start.elapsed();
            }
            SoftCmd::DrawIndexed(params) => {
                let start = Instant::now();
                rasterize(ctx, &mut state, u64::from(params.first_index))?;
                stats.draw_time += start.elapsed();
            }
            SoftCmd::Dispatch(..) => {
                // compute is accepted but has no observable effect here
            }
            SoftCmd::Barrier(_) => {
                // no-op backend: transitions are identity
            }
            SoftCmd::BeginDebugGroup(name) => ctx.base.enter_debug_group(name),
            SoftCmd::EndDebugGroup => ctx.base.leave_debug_group(),
            SoftCmd::BindVertexBuffer { .. }
            | SoftCmd::BindIndexBuffer { .. }
            | SoftCmd::BindUniformBuffer { .. }
            | SoftCmd::BindTexture { .. }
            | SoftCmd::PushConstants { .. } => {
                // bindings carry no work for the placeholder rasteriser
            }
        }
    }
    Ok(stats)
}

fn begin_pass(ctx: &mut ExecContext, state: &mut ReplayState, pass: &RenderPass) -> Result<()> {
    match pass.desc.target {
        PassTarget::SwapChain => {
            let swapchain = ctx.swapchain.as_mut().ok_or_else(|| {
                GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain exists")
            })?;
            if pass.desc.color_ops[0].load == LoadOp::Clear {
                let format = swapchain.desc.format;
                let current = swapchain.current;
                fill_color(
                    &mut swapchain.images[current],
                    format,
                    pass.desc.clear_color,
                );
            }
            state.target = Some(Target::SwapChain);
        }
        PassTarget::Offscreen(id) => {
            state.target = Some(begin_offscreen_pass(ctx, id, pass)?);
        }
    }
    Ok(())
}

fn begin_offscreen_pass(
    ctx: &mut ExecContext,
    id: RenderTargetId,
    pass: &RenderPass,
) -> Result<Target> {
    let (colors, depth, width, height) = {
        let record = ctx
            .registry
            .render_target(id)
            .ok_or_else(|| GraphicsError::new(ErrorKind::InvalidResource, "render target destroyed"))?;
        (
            record.color_textures.clone(),
            record.depth_texture,
            record.desc.width,
            record.desc.height,
        )
    };

    for (index, &texture) in colors.iter().enumerate() {
        let clear = pass
            .desc
            .color_ops
            .get(index)
            .map_or(false, |ops| ops.load == LoadOp::Clear);
        if clear {
            let clear_color = pass.desc.clear_color;
            if let Some(record) = ctx.registry.texture_mut(texture) {
                let format = record.desc.format;
                if let Some(soft) = record.handle.downcast_mut::<SoftTexture>() {
                    fill_color(&mut soft.data, format, clear_color);
                }
            }
        }
    }

    if let (Some(texture), Some(ops)) = (depth, pass.desc.depth_ops) {
        if ops.load == LoadOp::Clear {
            let (clear_depth, clear_stencil) = (pass.desc.clear_depth, pass.desc.clear_stencil);
            if let Some(record) = ctx.registry.texture_mut(texture) {
                let format = record.desc.format;
                if let Some(soft) = record.handle.downcast_mut::<SoftTexture>() {
                    fill_depth(&mut soft.data, format, clear_depth, clear_stencil);
                }
            }
        }
    }

    Ok(Target::Offscreen {
        colors,
        width,
        height,
    })
}

/// Deterministic placeholder output: one flat-colored triangle spanning the
/// viewport, color derived from the bound pipeline's cache key and the draw
/// ordinal. Identical streams produce identical images.
fn rasterize(ctx: &mut ExecContext, state: &mut ReplayState, seed: u64) -> Result<()> {
    let draw_index = state.draw_index;
    state.draw_index += 1;

    let key = state
        .pipeline_key
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed)
        .wrapping_add(draw_index);
    let color = [
        ((key >> 16) & 0xff) as f32 / 255.0,
        ((key >> 8) & 0xff) as f32 / 255.0,
        (key & 0xff) as f32 / 255.0,
        1.0,
    ];

    match state.target {
        Some(Target::SwapChain) => {
            let swapchain = ctx.swapchain.as_mut().ok_or_else(|| {
                GraphicsError::new(ErrorKind::InvalidOperation, "no swap chain exists")
            })?;
            let (width, height, format) = (
                swapchain.desc.width,
                swapchain.desc.height,
                swapchain.desc.format,
            );
            let current = swapchain.current;
            rasterize_into(
                &mut swapchain.images[current],
                width,
                height,
                format,
                state.viewport,
                state.scissor,
                color,
            );
        }
        Some(Target::Offscreen {
            ref colors,
            width,
            height,
        }) => {
            let colors = colors.clone();
            for texture in colors {
                if let Some(record) = ctx.registry.texture_mut(texture) {
                    let format = record.desc.format;
                    if let Some(soft) = record.handle.downcast_mut::<SoftTexture>() {
                        rasterize_into(
                            &mut soft.data,
                            width,
                            height,
                            format,
                            state.viewport,
                            state.scissor,
                            color,
                        );
                    }
                }
            }
        }
        None => {
            // the wrapper rejects draws outside a pass; reaching this is a bug
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "draw replayed outside a render pass",
            ));
        }
    }
    Ok(())
}

fn rasterize_into(
    data: &mut [u8],
    width: u32,
    height: u32,
    format: TextureFormat,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    color: [f32; 4],
) {
    let (bytes, stride) = pack_color(format, color);

    let (vx, vy, vw, vh) = match viewport {
        Some(v) => (
            v.x.max(0.0) as u32,
            v.y.max(0.0) as u32,
            v.width.max(0.0) as u32,
            v.height.max(0.0) as u32,
        ),
        None => (0, 0, width, height),
    };

    let (sx0, sy0, sx1, sy1) = match scissor {
        Some(s) => (
            s.x.max(0) as u32,
            s.y.max(0) as u32,
            (s.x.max(0) as u32).saturating_add(s.width),
            (s.y.max(0) as u32).saturating_add(s.height),
        ),
        None => (0, 0, width, height),
    };

    let x0 = vx.max(sx0);
    let y0 = vy.max(sy0);
    let x1 = (vx + vw).min(sx1).min(width);
    let y1 = (vy + vh).min(sy1).min(height);
    if x0 >= x1 || y0 >= y1 || vw == 0 || vh == 0 {
        return;
    }

    for y in y0..y1 {
        // left-aligned triangle: span shrinks with each row
        let frac = f64::from(y - vy) / f64::from(vh.max(1));
        let span_end = vx + ((f64::from(vw) * (1.0 - frac)) as u32);
        let row_end = span_end.clamp(x0, x1);
        for x in x0..row_end {
            let index = (y as usize * width as usize + x as usize) * stride;
            if index + stride <= data.len() {
                data[index..index + stride].copy_from_slice(&bytes[..stride]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_color_respects_format_swizzle() {
        let (rgba, n) = pack_color(TextureFormat::Rgba8Unorm, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!((&rgba[..n], n), (&[255u8, 0, 0, 255][..], 4));
        let (bgra, n) = pack_color(TextureFormat::Bgra8Unorm, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!((&bgra[..n], n), (&[0u8, 0, 255, 255][..], 4));
        let (r, n) = pack_color(TextureFormat::R8Unorm, [0.5, 0.0, 0.0, 1.0]);
        assert_eq!(n, 1);
        assert_eq!(r[0], 128);
    }

    #[test]
    fn rasterize_covers_part_of_the_viewport() {
        let mut data = vec![0u8; 8 * 8 * 4];
        rasterize_into(
            &mut data,
            8,
            8,
            TextureFormat::Rgba8Unorm,
            None,
            None,
            [1.0, 1.0, 1.0, 1.0],
        );
        let touched = data.chunks_exact(4).filter(|p| p[3] != 0).count();
        assert!(touched > 0 && touched < 64);
        // top-left pixel is inside the triangle, bottom-right outside
        assert_eq!(&data[0..4], &[255, 255, 255, 255]);
        assert_eq!(&data[(7 * 8 + 7) * 4..(7 * 8 + 7) * 4 + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn scissor_clips_rasterization() {
        let mut data = vec![0u8; 8 * 8 * 4];
        rasterize_into(
            &mut data,
            8,
            8,
            TextureFormat::Rgba8Unorm,
            None,
            Some(ScissorRect {
                x: 4,
                y: 0,
                width: 4,
                height: 8,
            }),
            [1.0, 1.0, 1.0, 1.0],
        );
        // nothing left of the scissor
        for y in 0..8 {
            for x in 0..4 {
                assert_eq!(data[(y * 8 + x) * 4 + 3], 0);
            }
        }
    }
}
