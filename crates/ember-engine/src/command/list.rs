use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::Device;
use crate::hal::{
    Access, Command, DescriptorKind, Fence, GpuError, GpuResult, PipelineId, ResourceId,
    ResourceKind, ResourceState, RootSignatureId, ScissorRect, Transition, VertexBufferView, Viewport,
    TEXTURE_PITCH_ALIGNMENT,
};
use crate::present::{Descriptor, DescriptorHandle, DescriptorHeap};

/// Recording state of a [`CommandList`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ListState {
    Recording,
    Closed,
}

struct AllocatorMemory {
    label: String,
    commands: Vec<Command>,
    /// Bumped on every reset; lists recorded before it are stale.
    generation: u64,
    recording: bool,
    executed: bool,
    /// Fence value signaled after the last submission of this memory.
    stamp: Option<(Fence, u64)>,
}

impl AllocatorMemory {
    fn check_idle(&self) -> GpuResult<()> {
        match &self.stamp {
            Some((fence, value)) => {
                let completed = fence.completed_value();
                if completed < *value {
                    return Err(GpuError::AllocatorBusy {
                        label: self.label.clone(),
                        pending: *value,
                        completed,
                    });
                }
                Ok(())
            }
            None if self.executed => Err(GpuError::InvalidCall(format!(
                "allocator `{}` was submitted without a fence signal",
                self.label
            ))),
            None => Ok(()),
        }
    }
}

/// Backing memory for recorded command lists.
///
/// Cheap to clone: clones are handles to the same memory.
#[derive(Clone)]
pub struct CommandAllocator {
    inner: Arc<Mutex<AllocatorMemory>>,
}

impl CommandAllocator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AllocatorMemory {
                label: label.into(),
                commands: Vec::new(),
                generation: 0,
                recording: false,
                executed: false,
                stamp: None,
            })),
        }
    }

    pub fn label(&self) -> String {
        self.inner.lock().label.clone()
    }

    /// Frees all recorded commands.
    ///
    /// Fails with [`GpuError::AllocatorBusy`] while the GPU may still be
    /// executing them.
    pub fn reset(&self) -> GpuResult<()> {
        let mut mem = self.inner.lock();
        if mem.recording {
            return Err(GpuError::InvalidCall(format!(
                "allocator `{}` reset while a command list records into it",
                mem.label
            )));
        }
        mem.check_idle()?;
        mem.commands.clear();
        mem.generation += 1;
        mem.executed = false;
        mem.stamp = None;
        Ok(())
    }

    /// Whether the GPU has finished with everything submitted from this allocator.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().check_idle().is_ok()
    }

    /// Number of commands currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records that the fence reaches `value` once this memory is consumed.
    pub(crate) fn stamp(&self, fence: &Fence, value: u64) {
        self.inner.lock().stamp = Some((fence.clone(), value));
    }

    pub(crate) fn mark_executed(&self) {
        let mut mem = self.inner.lock();
        mem.executed = true;
        mem.stamp = None;
    }

    fn begin_recording(&self) -> GpuResult<(usize, u64)> {
        let mut mem = self.inner.lock();
        if mem.recording {
            return Err(GpuError::InvalidCall(format!(
                "allocator `{}` already has a command list recording",
                mem.label
            )));
        }
        mem.check_idle()?;
        mem.recording = true;
        Ok((mem.commands.len(), mem.generation))
    }

    fn same_memory(&self, other: &CommandAllocator) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mem = self.inner.lock();
        f.debug_struct("CommandAllocator")
            .field("label", &mem.label)
            .field("commands", &mem.commands.len())
            .field("recording", &mem.recording)
            .field("stamp", &mem.stamp.as_ref().map(|(_, v)| *v))
            .finish()
    }
}

#[derive(Debug, Default)]
struct Bindings {
    pipeline: Option<PipelineId>,
    root_signature: Option<RootSignatureId>,
    shader_resource: Option<ResourceId>,
    viewport: bool,
    scissor: bool,
    render_target: Option<ResourceId>,
    vertex_buffer: Option<VertexBufferView>,
}

/// Mutable recording buffer for one submission.
///
/// Every call is validated against the resource states the list will leave
/// behind, starting from the states committed by earlier submissions. The
/// first violation is returned as an error and nothing is recorded for it.
pub struct CommandList {
    label: String,
    device: Arc<Device>,
    allocator: CommandAllocator,
    start: usize,
    end: usize,
    generation: u64,
    state: ListState,
    states: HashMap<ResourceId, ResourceState>,
    bound_heaps: Vec<DescriptorHandle>,
    bindings: Bindings,
}

impl CommandList {
    /// Creates a list in the recording state, with `pipeline` bound if given.
    pub fn new(
        device: &Arc<Device>,
        allocator: &CommandAllocator,
        label: impl Into<String>,
        pipeline: Option<PipelineId>,
    ) -> GpuResult<Self> {
        let (start, generation) = allocator.begin_recording()?;
        let mut list = Self {
            label: label.into(),
            device: device.clone(),
            allocator: allocator.clone(),
            start,
            end: start,
            generation,
            state: ListState::Recording,
            states: HashMap::new(),
            bound_heaps: Vec::new(),
            bindings: Bindings::default(),
        };
        if let Some(pipeline) = pipeline {
            list.set_pipeline(pipeline)?;
        }
        Ok(list)
    }

    /// Starts a new recording into `allocator`.
    ///
    /// The list must be closed and the allocator's earlier content finished.
    pub fn reset(&mut self, allocator: &CommandAllocator, pipeline: Option<PipelineId>) -> GpuResult<()> {
        if self.state != ListState::Closed {
            return Err(self.wrong_state(ListState::Closed));
        }
        let (start, generation) = allocator.begin_recording()?;
        self.allocator = allocator.clone();
        self.start = start;
        self.end = start;
        self.generation = generation;
        self.state = ListState::Recording;
        self.states.clear();
        self.bound_heaps.clear();
        self.bindings = Bindings::default();
        if let Some(pipeline) = pipeline {
            self.set_pipeline(pipeline)?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> GpuResult<()> {
        self.check_recording()?;
        let mut mem = self.allocator.inner.lock();
        self.end = mem.commands.len();
        mem.recording = false;
        drop(mem);
        self.state = ListState::Closed;
        log::trace!("command list `{}` closed with {} command(s)", self.label, self.end - self.start);
        Ok(())
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn allocator(&self) -> &CommandAllocator {
        &self.allocator
    }

    /// Whether this list records into `allocator`.
    pub fn uses(&self, allocator: &CommandAllocator) -> bool {
        self.allocator.same_memory(allocator)
    }

    /// Commands recorded since the last reset.
    pub fn recorded(&self) -> GpuResult<Vec<Command>> {
        let mem = self.allocator.inner.lock();
        if mem.generation != self.generation {
            return Err(GpuError::InvalidCall(format!(
                "allocator of `{}` was reset after the list was recorded",
                self.label
            )));
        }
        let end = if self.state == ListState::Recording { mem.commands.len() } else { self.end };
        Ok(mem.commands[self.start..end].to_vec())
    }

    /// Resource states as they will be after this list executes.
    pub fn final_states(&self) -> &HashMap<ResourceId, ResourceState> {
        &self.states
    }

    /// State of `id` at this point of the recording.
    pub fn tracked_state(&self, id: ResourceId) -> GpuResult<ResourceState> {
        match self.states.get(&id) {
            Some(state) => Ok(*state),
            None => self.device.resource_state(id),
        }
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) -> GpuResult<()> {
        self.push(Command::SetPipeline(pipeline))?;
        self.bindings.pipeline = Some(pipeline);
        Ok(())
    }

    pub fn set_root_signature(&mut self, root_signature: RootSignatureId) -> GpuResult<()> {
        self.push(Command::SetRootSignature(root_signature))?;
        self.bindings.root_signature = Some(root_signature);
        Ok(())
    }

    /// Makes `heaps` visible to descriptor-table bindings.
    pub fn set_descriptor_heaps(&mut self, heaps: &[&DescriptorHeap]) -> GpuResult<()> {
        self.check_recording()?;
        if heaps.iter().filter(|h| h.kind() == DescriptorKind::ShaderResource).count() > 1 {
            return Err(GpuError::InvalidCall("only one shader-resource heap may be bound".into()));
        }
        self.bound_heaps = heaps.iter().map(|h| h.start()).collect();
        Ok(())
    }

    /// Binds the shader-resource table starting at `handle` to root `slot`.
    pub fn set_graphics_root_descriptor_table(
        &mut self,
        slot: u32,
        heap: &DescriptorHeap,
        handle: DescriptorHandle,
    ) -> GpuResult<()> {
        self.check_recording()?;
        if !self.bound_heaps.contains(&heap.start()) {
            return Err(GpuError::InvalidCall("descriptor table from a heap that is not bound".into()));
        }
        let Descriptor::ShaderResourceView(resource) = heap.resolve(handle)? else {
            return Err(GpuError::InvalidCall("descriptor table must point at a shader-resource view".into()));
        };
        self.push(Command::SetShaderResource { slot, resource })?;
        self.bindings.shader_resource = Some(resource);
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> GpuResult<()> {
        self.push(Command::SetViewport(viewport))?;
        self.bindings.viewport = true;
        Ok(())
    }

    pub fn set_scissor_rect(&mut self, scissor: ScissorRect) -> GpuResult<()> {
        self.push(Command::SetScissor(scissor))?;
        self.bindings.scissor = true;
        Ok(())
    }

    /// Records state transitions. Each `before` must match the tracked state.
    pub fn resource_barrier(&mut self, transitions: &[Transition]) -> GpuResult<()> {
        self.check_recording()?;
        for t in transitions {
            let actual = self.tracked_state(t.resource)?;
            if actual != t.before {
                return Err(GpuError::BarrierMismatch { resource: t.resource, declared: t.before, actual });
            }
        }
        for t in transitions {
            self.push(Command::Barrier(*t))?;
            self.states.insert(t.resource, t.after);
        }
        Ok(())
    }

    pub fn set_render_target(&mut self, heap: &DescriptorHeap, handle: DescriptorHandle) -> GpuResult<()> {
        self.check_recording()?;
        let target = Self::render_target_view(heap, handle)?;
        self.push(Command::SetRenderTarget(target))?;
        self.bindings.render_target = Some(target);
        Ok(())
    }

    pub fn clear_render_target_view(
        &mut self,
        heap: &DescriptorHeap,
        handle: DescriptorHandle,
        color: [f32; 4],
    ) -> GpuResult<()> {
        self.check_recording()?;
        let target = Self::render_target_view(heap, handle)?;
        self.require(target, Access::RenderTargetWrite)?;
        self.push(Command::ClearRenderTarget { target, color })
    }

    pub fn set_vertex_buffer(&mut self, view: VertexBufferView) -> GpuResult<()> {
        self.check_recording()?;
        self.tracked_state(view.resource)?;
        self.push(Command::SetVertexBuffer(view))?;
        self.bindings.vertex_buffer = Some(view);
        Ok(())
    }

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) -> GpuResult<()> {
        self.check_recording()?;
        let missing = |what: &str| GpuError::InvalidCall(format!("draw without a bound {what}"));
        if self.bindings.pipeline.is_none() {
            return Err(missing("pipeline"));
        }
        if self.bindings.root_signature.is_none() {
            return Err(missing("root signature"));
        }
        if !self.bindings.viewport {
            return Err(missing("viewport"));
        }
        if !self.bindings.scissor {
            return Err(missing("scissor rect"));
        }
        let target = self.bindings.render_target.ok_or_else(|| missing("render target"))?;
        let vb = self.bindings.vertex_buffer.ok_or_else(|| missing("vertex buffer"))?;

        self.require(target, Access::RenderTargetWrite)?;
        self.require(vb.resource, Access::VertexRead)?;
        if vertex_count as u64 * vb.stride as u64 > vb.size as u64 {
            return Err(GpuError::InvalidCall(format!(
                "{vertex_count} vertices of stride {} overrun a {}-byte vertex buffer view",
                vb.stride, vb.size
            )));
        }
        if let Some(texture) = self.bindings.shader_resource {
            self.require(texture, Access::ShaderRead)?;
        }
        self.push(Command::Draw { vertex_count, instance_count })
    }

    /// Copies `size` bytes from the start of `src` to the start of `dst`.
    pub fn copy_buffer_region(&mut self, dst: ResourceId, src: ResourceId, size: u64) -> GpuResult<()> {
        self.check_recording()?;
        self.require(dst, Access::CopyWrite)?;
        self.require(src, Access::CopyRead)?;
        for id in [dst, src] {
            let available = self.device.resource_desc(id)?.kind.byte_size();
            if available < size {
                return Err(GpuError::InvalidCall(format!("{id} holds {available} bytes, copy needs {size}")));
            }
        }
        self.push(Command::CopyBuffer { src, dst, size })
    }

    /// Copies a whole texture out of a buffer whose rows are `row_pitch` apart.
    pub fn copy_buffer_to_texture(&mut self, dst: ResourceId, src: ResourceId, row_pitch: u32) -> GpuResult<()> {
        self.check_recording()?;
        self.require(dst, Access::CopyWrite)?;
        self.require(src, Access::CopyRead)?;
        self.check_texture_copy(dst, src, row_pitch)?;
        self.push(Command::CopyBufferToTexture { src, dst, row_pitch })
    }

    /// Copies a whole texture into a buffer with rows `row_pitch` apart.
    pub fn copy_texture_to_buffer(&mut self, dst: ResourceId, src: ResourceId, row_pitch: u32) -> GpuResult<()> {
        self.check_recording()?;
        self.require(dst, Access::CopyWrite)?;
        self.require(src, Access::CopyRead)?;
        self.check_texture_copy(src, dst, row_pitch)?;
        self.push(Command::CopyTextureToBuffer { src, dst, row_pitch })
    }

    fn check_texture_copy(&self, texture: ResourceId, buffer: ResourceId, row_pitch: u32) -> GpuResult<()> {
        let ResourceKind::Texture2d { width, height, format } = self.device.resource_desc(texture)?.kind else {
            return Err(GpuError::InvalidCall(format!("{texture} is not a texture")));
        };
        let row_bytes = width as u64 * format.bytes_per_pixel() as u64;
        if row_pitch % TEXTURE_PITCH_ALIGNMENT != 0 || (row_pitch as u64) < row_bytes {
            return Err(GpuError::InvalidCall(format!(
                "row pitch {row_pitch} is not a {TEXTURE_PITCH_ALIGNMENT}-aligned pitch for a {width}-wide texture"
            )));
        }
        let needed = row_pitch as u64 * (height as u64).saturating_sub(1) + row_bytes;
        let available = self.device.resource_desc(buffer)?.kind.byte_size();
        if available < needed {
            return Err(GpuError::InvalidCall(format!("{buffer} holds {available} bytes, copy needs {needed}")));
        }
        Ok(())
    }

    fn render_target_view(heap: &DescriptorHeap, handle: DescriptorHandle) -> GpuResult<ResourceId> {
        match heap.resolve(handle)? {
            Descriptor::RenderTargetView(id) => Ok(id),
            other => Err(GpuError::InvalidCall(format!("{other:?} is not a render-target view"))),
        }
    }

    fn require(&self, id: ResourceId, access: Access) -> GpuResult<()> {
        let state = self.tracked_state(id)?;
        if state.permits(access) {
            Ok(())
        } else {
            Err(GpuError::InvalidResourceAccess { resource: id, state, access })
        }
    }

    fn check_recording(&self) -> GpuResult<()> {
        match self.state {
            ListState::Recording => Ok(()),
            actual => Err(GpuError::InvalidListState {
                label: self.label.clone(),
                expected: ListState::Recording,
                actual,
            }),
        }
    }

    fn wrong_state(&self, expected: ListState) -> GpuError {
        GpuError::InvalidListState { label: self.label.clone(), expected, actual: self.state }
    }

    fn push(&mut self, command: Command) -> GpuResult<()> {
        self.check_recording()?;
        self.allocator.inner.lock().commands.push(command);
        Ok(())
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        if self.state == ListState::Recording {
            self.allocator.inner.lock().recording = false;
        }
    }
}

impl fmt::Debug for CommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("tracked", &self.states.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceContext, GpuInit, GpuResource};
    use crate::hal::soft::SoftBackend;
    use crate::hal::{ResourceDesc, TextureFormat};

    fn context() -> DeviceContext {
        DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default()).unwrap()
    }

    fn buffer(ctx: &DeviceContext, label: &str) -> GpuResource {
        ctx.device().create_resource(&ResourceDesc::buffer(label, 64)).unwrap()
    }

    #[test]
    fn new_lists_record_and_close_once() {
        let ctx = context();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();
        assert_eq!(list.state(), ListState::Recording);

        list.close().unwrap();
        assert_eq!(list.state(), ListState::Closed);
        assert!(matches!(
            list.close(),
            Err(GpuError::InvalidListState { expected: ListState::Recording, actual: ListState::Closed, .. })
        ));
    }

    #[test]
    fn recording_into_a_closed_list_is_rejected() {
        let ctx = context();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();
        list.close().unwrap();
        assert!(list.set_viewport(Viewport::from_size(4, 4)).is_err());
        assert!(list.recorded().unwrap().is_empty());
    }

    #[test]
    fn reset_requires_a_closed_list() {
        let ctx = context();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();
        assert!(matches!(
            list.reset(&alloc, None),
            Err(GpuError::InvalidListState { expected: ListState::Closed, .. })
        ));
    }

    #[test]
    fn busy_allocator_cannot_be_reset() {
        let ctx = context();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();
        list.close().unwrap();

        let fence = Fence::new(0);
        alloc.stamp(&fence, 1);
        assert!(matches!(alloc.reset(), Err(GpuError::AllocatorBusy { pending: 1, completed: 0, .. })));
        assert!(matches!(list.reset(&alloc, None), Err(GpuError::AllocatorBusy { .. })));

        fence.complete(1);
        alloc.reset().unwrap();
        list.reset(&alloc, None).unwrap();
        assert_eq!(list.state(), ListState::Recording);
    }

    #[test]
    fn allocator_reset_invalidates_old_recordings() {
        let ctx = context();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();
        list.set_viewport(Viewport::from_size(4, 4)).unwrap();
        list.close().unwrap();
        assert_eq!(list.recorded().unwrap().len(), 1);

        alloc.reset().unwrap();
        assert!(list.recorded().is_err());
    }

    #[test]
    fn one_recording_list_per_allocator() {
        let ctx = context();
        let alloc = CommandAllocator::new("a");
        let _first = CommandList::new(ctx.device(), &alloc, "first", None).unwrap();
        assert!(CommandList::new(ctx.device(), &alloc, "second", None).is_err());
        assert!(alloc.reset().is_err());
    }

    #[test]
    fn barriers_track_state_and_reject_mismatches() {
        let ctx = context();
        let vb = buffer(&ctx, "vb");
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();

        let to_vertex = Transition::new(vb.id(), ResourceState::CopyDest, ResourceState::VertexBuffer);
        list.resource_barrier(&[to_vertex]).unwrap();
        assert_eq!(list.tracked_state(vb.id()).unwrap(), ResourceState::VertexBuffer);

        let err = list.resource_barrier(&[to_vertex]).unwrap_err();
        assert!(matches!(
            err,
            GpuError::BarrierMismatch { declared: ResourceState::CopyDest, actual: ResourceState::VertexBuffer, .. }
        ));
        // Committed state only changes on submission.
        assert_eq!(ctx.device().resource_state(vb.id()).unwrap(), ResourceState::CopyDest);
    }

    #[test]
    fn transition_and_back_restores_the_state() {
        let ctx = context();
        let vb = buffer(&ctx, "vb");
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();

        let t = Transition::new(vb.id(), ResourceState::CopyDest, ResourceState::CopySource);
        list.resource_barrier(&[t]).unwrap();
        list.resource_barrier(&[t.reversed()]).unwrap();
        list.close().unwrap();
        assert_eq!(list.final_states()[&vb.id()], ResourceState::CopyDest);
    }

    #[test]
    fn copies_check_access_states() {
        let ctx = context();
        let dst = buffer(&ctx, "dst");
        let src = ctx.device().create_resource(&ResourceDesc::upload_buffer("src", 64)).unwrap();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();

        // Reversed direction: dst (upload, generic read) cannot be written.
        assert!(matches!(
            list.copy_buffer_region(src.id(), dst.id(), 64),
            Err(GpuError::InvalidResourceAccess { access: Access::CopyWrite, .. })
        ));
        list.copy_buffer_region(dst.id(), src.id(), 64).unwrap();
        assert!(list.copy_buffer_region(dst.id(), src.id(), 65).is_err());
    }

    #[test]
    fn texture_copies_need_aligned_pitch() {
        let ctx = context();
        let tex = ctx
            .device()
            .create_resource(&ResourceDesc::texture2d("t", 16, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let src = ctx.device().create_resource(&ResourceDesc::upload_buffer("src", 1024)).unwrap();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();

        assert!(list.copy_buffer_to_texture(tex.id(), src.id(), 64).is_err());
        assert!(matches!(
            list.copy_buffer_to_texture(tex.id(), src.id(), 0xFFFF_FF00),
            Err(GpuError::InvalidCall(_))
        ));
        list.copy_buffer_to_texture(tex.id(), src.id(), 256).unwrap();
    }

    #[test]
    fn draw_without_bindings_is_rejected() {
        let ctx = context();
        let alloc = CommandAllocator::new("a");
        let mut list = CommandList::new(ctx.device(), &alloc, "l", None).unwrap();
        assert!(matches!(list.draw_instanced(3, 1), Err(GpuError::InvalidCall(_))));
    }
}
