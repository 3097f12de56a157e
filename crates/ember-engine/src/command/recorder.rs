use std::sync::Arc;

use crate::device::Device;
use crate::hal::{
    GpuError, GpuResult, PipelineId, ResourceState, RootSignatureId, ScissorRect, Transition,
    VertexBufferView, Viewport,
};
use crate::present::{BackBuffer, DescriptorHandle, DescriptorHeap};

use super::{CommandAllocator, CommandList};

/// Everything one frame's draw reads.
#[derive(Debug, Copy, Clone)]
pub struct FrameInputs<'a> {
    /// Allocator the frame records into.
    pub allocator_index: usize,
    pub back_buffer: BackBuffer,
    pub rtv_heap: &'a DescriptorHeap,
    /// Shader-resource heap and the table bound at root slot 0.
    pub srv: Option<(&'a DescriptorHeap, DescriptorHandle)>,
    pub vertex_buffer: VertexBufferView,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
}

/// Builds the per-frame instruction stream into one reused command list.
#[derive(Debug)]
pub struct CommandRecorder {
    pipeline: PipelineId,
    root_signature: RootSignatureId,
    viewport: Viewport,
    scissor: ScissorRect,
    allocators: Vec<CommandAllocator>,
    list: CommandList,
}

impl CommandRecorder {
    /// Creates `allocator_count` allocators and the frame list.
    ///
    /// The list is closed right away so the first frame can reset it.
    pub fn new(
        device: &Arc<Device>,
        pipeline: PipelineId,
        root_signature: RootSignatureId,
        viewport: Viewport,
        scissor: ScissorRect,
        allocator_count: usize,
    ) -> GpuResult<Self> {
        if allocator_count == 0 {
            return Err(GpuError::Creation { what: "command recorder", reason: "no allocators".into() });
        }
        let allocators: Vec<_> =
            (0..allocator_count).map(|i| CommandAllocator::new(format!("frame allocator {i}"))).collect();
        let mut list = CommandList::new(device, &allocators[0], "frame", Some(pipeline))?;
        list.close()?;

        Ok(Self { pipeline, root_signature, viewport, scissor, allocators, list })
    }

    pub fn allocator_count(&self) -> usize {
        self.allocators.len()
    }

    pub fn allocator(&self, index: usize) -> GpuResult<&CommandAllocator> {
        self.allocators
            .get(index)
            .ok_or_else(|| GpuError::InvalidCall(format!("no frame allocator {index}")))
    }

    pub fn list(&self) -> &CommandList {
        &self.list
    }

    /// Records one frame: clear the back buffer, draw, hand it back to presentation.
    pub fn record_frame(&mut self, frame: &FrameInputs<'_>) -> GpuResult<&CommandList> {
        let allocator = self.allocator(frame.allocator_index)?.clone();
        let back_buffer = frame.back_buffer.resource;

        allocator.reset()?;
        self.list.reset(&allocator, Some(self.pipeline))?;

        let list = &mut self.list;
        list.set_root_signature(self.root_signature)?;
        match frame.srv {
            Some((heap, table)) => {
                list.set_descriptor_heaps(&[heap])?;
                list.set_graphics_root_descriptor_table(0, heap, table)?;
            }
            None => list.set_descriptor_heaps(&[])?,
        }
        list.set_viewport(self.viewport)?;
        list.set_scissor_rect(self.scissor)?;

        let to_target = Transition::new(back_buffer, ResourceState::Present, ResourceState::RenderTarget);
        list.resource_barrier(&[to_target])?;

        list.set_render_target(frame.rtv_heap, frame.back_buffer.rtv)?;
        list.clear_render_target_view(frame.rtv_heap, frame.back_buffer.rtv, frame.clear_color)?;

        list.set_vertex_buffer(frame.vertex_buffer)?;
        list.draw_instanced(frame.vertex_count, 1)?;

        list.resource_barrier(&[to_target.reversed()])?;
        list.close()?;

        log::trace!("recorded frame into back buffer {back_buffer}");
        Ok(&self.list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceContext, GpuInit, GpuResource};
    use crate::hal::soft::SoftBackend;
    use crate::hal::{
        ColorVertex, Command, DescriptorKind, Fence, PipelineDesc, ResourceDesc, RootSignatureDesc,
        TextureFormat, VertexLayout,
    };
    use crate::present::{FrameResources, SwapChain};

    struct Fixture {
        ctx: DeviceContext,
        frames: FrameResources,
        recorder: CommandRecorder,
        vb: GpuResource,
    }

    fn fixture() -> Fixture {
        let ctx = DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default()).unwrap();
        let device = ctx.device().clone();
        let mut chain = SwapChain::create(ctx.queue(), None, 32, 32, 2, false).unwrap();
        let frames = FrameResources::create(&device, &mut chain, 0).unwrap();

        let rs = device
            .create_root_signature(&RootSignatureDesc { label: "rs".into(), shader_resource_table: false })
            .unwrap();
        let pso = device
            .create_pipeline(&PipelineDesc {
                label: "pso".into(),
                root_signature: rs,
                vertex_layout: VertexLayout::PositionColor,
                target_format: TextureFormat::Rgba8Unorm,
            })
            .unwrap();
        let recorder =
            CommandRecorder::new(&device, pso, rs, Viewport::from_size(32, 32), ScissorRect::from_size(32, 32), 2)
                .unwrap();

        // Pretend the vertex buffer was already uploaded.
        let vb = device
            .create_resource(&ResourceDesc {
                initial_state: ResourceState::VertexBuffer,
                ..ResourceDesc::buffer("vb", 3 * VertexLayout::PositionColor.stride() as u64)
            })
            .unwrap();
        Fixture { ctx, frames, recorder, vb }
    }

    fn inputs<'a>(frames: &'a FrameResources, vb: &GpuResource, index: u32) -> FrameInputs<'a> {
        FrameInputs {
            allocator_index: index as usize,
            back_buffer: *frames.back_buffer(index).unwrap(),
            rtv_heap: frames.rtv_heap(),
            srv: None,
            vertex_buffer: VertexBufferView {
                resource: vb.id(),
                stride: std::mem::size_of::<ColorVertex>() as u32,
                size: 3 * std::mem::size_of::<ColorVertex>() as u32,
            },
            vertex_count: 3,
            clear_color: [0.2, 0.2, 0.2, 1.0],
        }
    }

    #[test]
    fn frame_follows_the_fixed_sequence() {
        let mut f = fixture();
        let frame = inputs(&f.frames, &f.vb, 0);
        let list = f.recorder.record_frame(&frame).unwrap();
        let commands = list.recorded().unwrap();

        let kinds: Vec<&str> = commands
            .iter()
            .map(|c| match c {
                Command::SetPipeline(_) => "pipeline",
                Command::SetRootSignature(_) => "root",
                Command::SetViewport(_) => "viewport",
                Command::SetScissor(_) => "scissor",
                Command::Barrier(_) => "barrier",
                Command::SetRenderTarget(_) => "target",
                Command::ClearRenderTarget { .. } => "clear",
                Command::SetVertexBuffer(_) => "vb",
                Command::Draw { .. } => "draw",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            ["pipeline", "root", "viewport", "scissor", "barrier", "target", "clear", "vb", "draw", "barrier"]
        );
        assert!(commands.contains(&Command::ClearRenderTarget {
            target: frame.back_buffer.resource,
            color: [0.2, 0.2, 0.2, 1.0],
        }));
    }

    #[test]
    fn back_buffer_ends_the_frame_in_its_starting_state() {
        let mut f = fixture();
        let frame = inputs(&f.frames, &f.vb, 1);
        let list = f.recorder.record_frame(&frame).unwrap();
        assert_eq!(list.final_states()[&frame.back_buffer.resource], ResourceState::Present);
    }

    #[test]
    fn busy_allocator_fails_the_frame() {
        let mut f = fixture();
        let frame = inputs(&f.frames, &f.vb, 0);
        f.recorder.record_frame(&frame).unwrap();
        f.ctx.queue().execute(&[f.recorder.list()]).unwrap();

        let fence = Fence::new(0);
        f.recorder.allocator(0).unwrap().stamp(&fence, 1);
        assert!(matches!(f.recorder.record_frame(&frame), Err(GpuError::AllocatorBusy { .. })));
    }

    #[test]
    fn descriptor_table_needs_a_shader_resource_view() {
        let mut f = fixture();
        let heap = DescriptorHeap::new(f.ctx.device(), "srv", DescriptorKind::ShaderResource, 1).unwrap();
        let table = heap.start();
        let mut frame = inputs(&f.frames, &f.vb, 0);
        frame.srv = Some((&heap, table));
        // Slot never written.
        assert!(f.recorder.record_frame(&frame).is_err());
    }
}
