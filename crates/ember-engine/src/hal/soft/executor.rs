use bytemuck::pod_read_unaligned;

use super::device::SoftDevice;
use super::raster::{self, Canvas, RasterVertex, Sampled};
use crate::hal::{
    Access, ColorVertex, Command, GpuError, GpuResult, PipelineId, ResourceId, ResourceKind,
    RootSignatureId, ScissorRect, TexturedVertex, VertexBufferView, VertexLayout, Viewport,
};

/// Pipeline state of one command list while it executes.
///
/// Command lists never inherit state from each other.
#[derive(Default)]
struct Bindings {
    pipeline: Option<PipelineId>,
    root_signature: Option<RootSignatureId>,
    shader_resource: Option<ResourceId>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    render_target: Option<ResourceId>,
    vertex_buffer: Option<VertexBufferView>,
}

/// Executes one command list against device memory.
///
/// Stops at the first invalid command; the caller removes the device.
pub(super) fn execute_list(device: &mut SoftDevice, commands: &[Command]) -> GpuResult<()> {
    let mut bindings = Bindings::default();
    for command in commands {
        execute_command(device, &mut bindings, command)?;
    }
    device.stats.lists_executed += 1;
    Ok(())
}

fn execute_command(device: &mut SoftDevice, b: &mut Bindings, command: &Command) -> GpuResult<()> {
    match *command {
        Command::SetPipeline(id) => {
            if !device.pipelines.contains_key(&id) {
                return Err(GpuError::InvalidCall(format!("unknown pipeline {id:?}")));
            }
            b.pipeline = Some(id);
        }
        Command::SetRootSignature(id) => {
            if !device.root_signatures.contains_key(&id) {
                return Err(GpuError::InvalidCall(format!("unknown root signature {id:?}")));
            }
            b.root_signature = Some(id);
        }
        Command::SetShaderResource { resource, .. } => {
            device.resource(resource)?;
            b.shader_resource = Some(resource);
        }
        Command::SetViewport(vp) => b.viewport = Some(vp),
        Command::SetScissor(sc) => b.scissor = Some(sc),
        Command::Barrier(t) => {
            let res = device.resource_mut(t.resource)?;
            if res.state != t.before {
                return Err(GpuError::BarrierMismatch {
                    resource: t.resource,
                    declared: t.before,
                    actual: res.state,
                });
            }
            res.state = t.after;
        }
        Command::SetRenderTarget(id) => {
            if !device.resource(id)?.desc.render_target {
                return Err(GpuError::InvalidCall(format!("{id} was not created as a render target")));
            }
            b.render_target = Some(id);
        }
        Command::ClearRenderTarget { target, color } => {
            require(device, target, Access::RenderTargetWrite)?;
            let res = device.resource_mut(target)?;
            let ResourceKind::Texture2d { width, height, format } = res.desc.kind else {
                return Err(GpuError::InvalidCall(format!("clearing non-texture {target}")));
            };
            Canvas { pixels: &mut res.bytes, width, height, format }.fill(color);
        }
        Command::SetVertexBuffer(view) => {
            device.resource(view.resource)?;
            b.vertex_buffer = Some(view);
        }
        Command::Draw { vertex_count, instance_count } => {
            for _ in 0..instance_count {
                draw(device, b, vertex_count)?;
            }
            device.stats.draws += 1;
        }
        Command::CopyBuffer { src, dst, size } => {
            require(device, src, Access::CopyRead)?;
            require(device, dst, Access::CopyWrite)?;
            let len = size as usize;
            let data = device
                .resource(src)?
                .bytes
                .get(..len)
                .ok_or_else(|| out_of_bounds("copy source", src))?
                .to_vec();
            device
                .resource_mut(dst)?
                .bytes
                .get_mut(..len)
                .ok_or_else(|| out_of_bounds("copy destination", dst))?
                .copy_from_slice(&data);
            device.stats.copies += 1;
        }
        Command::CopyBufferToTexture { src, dst, row_pitch } => {
            require(device, src, Access::CopyRead)?;
            require(device, dst, Access::CopyWrite)?;
            let (width, height, bpp) = texture_extent(device, dst)?;
            let row = (width * bpp) as usize;
            let staged = device.resource(src)?.bytes.clone();
            let texels = &mut device.resource_mut(dst)?.bytes;
            for y in 0..height as usize {
                let from = y * row_pitch as usize;
                let line = staged
                    .get(from..from + row)
                    .ok_or_else(|| out_of_bounds("copy source", src))?;
                texels[y * row..(y + 1) * row].copy_from_slice(line);
            }
            device.stats.copies += 1;
        }
        Command::CopyTextureToBuffer { src, dst, row_pitch } => {
            require(device, src, Access::CopyRead)?;
            require(device, dst, Access::CopyWrite)?;
            let (width, height, bpp) = texture_extent(device, src)?;
            let row = (width * bpp) as usize;
            let texels = device.resource(src)?.bytes.clone();
            let out = &mut device.resource_mut(dst)?.bytes;
            for y in 0..height as usize {
                let to = y * row_pitch as usize;
                out.get_mut(to..to + row)
                    .ok_or_else(|| out_of_bounds("copy destination", dst))?
                    .copy_from_slice(&texels[y * row..(y + 1) * row]);
            }
            device.stats.copies += 1;
        }
    }
    Ok(())
}

fn draw(device: &mut SoftDevice, b: &Bindings, vertex_count: u32) -> GpuResult<()> {
    let pipeline_id = b.pipeline.ok_or_else(|| missing("pipeline"))?;
    let root_id = b.root_signature.ok_or_else(|| missing("root signature"))?;
    let viewport = b.viewport.ok_or_else(|| missing("viewport"))?;
    let scissor = b.scissor.ok_or_else(|| missing("scissor rect"))?;
    let target = b.render_target.ok_or_else(|| missing("render target"))?;
    let view = b.vertex_buffer.ok_or_else(|| missing("vertex buffer"))?;

    let pipeline = device
        .pipelines
        .get(&pipeline_id)
        .cloned()
        .ok_or_else(|| GpuError::InvalidCall(format!("unknown pipeline {pipeline_id:?}")))?;
    if pipeline.root_signature != root_id {
        return Err(GpuError::InvalidCall(format!(
            "pipeline `{}` was built for a different root signature",
            pipeline.label
        )));
    }
    let needs_texture = device
        .root_signatures
        .get(&root_id)
        .is_some_and(|r| r.shader_resource_table);

    require(device, target, Access::RenderTargetWrite)?;
    require(device, view.resource, Access::VertexRead)?;
    if view.stride != pipeline.vertex_layout.stride() {
        return Err(GpuError::InvalidCall(format!(
            "vertex stride {} does not match pipeline `{}` ({})",
            view.stride,
            pipeline.label,
            pipeline.vertex_layout.stride()
        )));
    }

    let vertices = fetch_vertices(device, &view, pipeline.vertex_layout, vertex_count)?;

    let texture = match (needs_texture, b.shader_resource) {
        (false, _) => None,
        (true, Some(id)) => {
            require(device, id, Access::ShaderRead)?;
            Some(id)
        }
        (true, None) => return Err(missing("shader resource")),
    };

    let mut pixels = std::mem::take(&mut device.resource_mut(target)?.bytes);
    let result = rasterize(device, target, texture, &mut pixels, &viewport, &scissor, &vertices);
    device.resource_mut(target)?.bytes = pixels;
    result
}

#[allow(clippy::too_many_arguments)]
fn rasterize(
    device: &SoftDevice,
    target: ResourceId,
    texture: Option<ResourceId>,
    pixels: &mut [u8],
    viewport: &Viewport,
    scissor: &ScissorRect,
    vertices: &[RasterVertex],
) -> GpuResult<()> {
    let ResourceKind::Texture2d { width, height, format } = device.resource(target)?.desc.kind else {
        return Err(GpuError::InvalidCall(format!("render target {target} is not a texture")));
    };
    let mut canvas = Canvas { pixels, width, height, format };

    let sampled = match texture {
        Some(id) => {
            let res = device.resource(id)?;
            let ResourceKind::Texture2d { width, height, format } = res.desc.kind else {
                return Err(GpuError::InvalidCall(format!("shader resource {id} is not a texture")));
            };
            Some(Sampled { texels: &res.bytes, width, height, format })
        }
        None => None,
    };

    for tri in vertices.chunks_exact(3) {
        let tri = [tri[0], tri[1], tri[2]];
        match &sampled {
            Some(tex) => raster::triangle(&mut canvas, viewport, scissor, tri, |v| tex.sample([v[0], v[1]])),
            None => raster::triangle(&mut canvas, viewport, scissor, tri, |v| v),
        }
    }
    Ok(())
}

fn fetch_vertices(
    device: &SoftDevice,
    view: &VertexBufferView,
    layout: VertexLayout,
    count: u32,
) -> GpuResult<Vec<RasterVertex>> {
    let stride = view.stride as usize;
    let needed = stride * count as usize;
    let bytes = device.resource(view.resource)?.bytes.as_slice();
    if needed > view.size as usize || needed > bytes.len() {
        return Err(GpuError::InvalidCall(format!(
            "draw of {count} vertices reads past the end of vertex buffer {}",
            view.resource
        )));
    }

    let vertices = bytes[..needed]
        .chunks_exact(stride)
        .map(|raw| match layout {
            VertexLayout::PositionColor => {
                let v: ColorVertex = pod_read_unaligned(raw);
                RasterVertex { ndc: [v.position[0], v.position[1]], varying: v.color }
            }
            VertexLayout::PositionUv => {
                let v: TexturedVertex = pod_read_unaligned(raw);
                RasterVertex { ndc: [v.position[0], v.position[1]], varying: [v.uv[0], v.uv[1], 0.0, 0.0] }
            }
        })
        .collect();
    Ok(vertices)
}

fn require(device: &SoftDevice, id: ResourceId, access: Access) -> GpuResult<()> {
    let state = device.resource(id)?.state;
    if state.permits(access) {
        Ok(())
    } else {
        Err(GpuError::InvalidResourceAccess { resource: id, state, access })
    }
}

fn texture_extent(device: &SoftDevice, id: ResourceId) -> GpuResult<(u32, u32, u32)> {
    match device.resource(id)?.desc.kind {
        ResourceKind::Texture2d { width, height, format } => Ok((width, height, format.bytes_per_pixel())),
        ResourceKind::Buffer { .. } => Err(GpuError::InvalidCall(format!("{id} is not a texture"))),
    }
}

fn missing(what: &str) -> GpuError {
    GpuError::InvalidCall(format!("draw without a bound {what}"))
}

fn out_of_bounds(what: &str, id: ResourceId) -> GpuError {
    GpuError::InvalidCall(format!("{what} {id} is too small for the copy"))
}
