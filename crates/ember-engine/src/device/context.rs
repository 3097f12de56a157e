use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::{CommandList, ListState};
use crate::hal::{
    AdapterInfo, Backend, DescriptorKind, FeatureLevel, Fence, GpuError, GpuResult, PipelineDesc,
    PipelineId, ResourceDesc, ResourceId, ResourceState, RootSignatureDesc, RootSignatureId,
};

use super::{select_adapter, GpuInit};

struct ResourceRecord {
    desc: ResourceDesc,
    /// State after the last submitted command list.
    state: ResourceState,
}

/// Logical device: exclusive owner of every GPU-side object.
///
/// Shared through `Arc` by the queue, swap chain, heaps and recorders. All
/// calls are expected from the render thread; the locks only make the type
/// `Sync`.
pub struct Device {
    backend: Mutex<Box<dyn Backend>>,
    adapter: AdapterInfo,
    feature_level: FeatureLevel,
    registry: Mutex<HashMap<ResourceId, ResourceRecord>>,
    next_heap_base: Mutex<u64>,
}

impl Device {
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.lock().name()
    }

    pub(crate) fn with_backend<R>(&self, f: impl FnOnce(&mut dyn Backend) -> R) -> R {
        let mut backend = self.backend.lock();
        f(backend.as_mut())
    }

    /// Creates a buffer or texture. The returned handle must be handed back to
    /// [`Device::release`]; dropping it leaks the GPU memory.
    pub fn create_resource(&self, desc: &ResourceDesc) -> GpuResult<GpuResource> {
        let id = self.with_backend(|b| b.create_resource(desc))?;
        self.registry
            .lock()
            .insert(id, ResourceRecord { desc: desc.clone(), state: desc.initial_state });
        log::trace!("created {id} `{}` ({:?}, {:?})", desc.label, desc.kind, desc.heap);
        Ok(GpuResource { id, desc: desc.clone() })
    }

    /// Tracks a resource the backend created on its own (swap chain buffers).
    pub(crate) fn adopt(&self, id: ResourceId, desc: ResourceDesc) {
        let state = desc.initial_state;
        self.registry.lock().insert(id, ResourceRecord { desc, state });
    }

    /// Stops tracking a resource the backend owns.
    pub(crate) fn disown(&self, id: ResourceId) {
        self.registry.lock().remove(&id);
    }

    /// Destroys a resource. Fails if queued GPU work still references it.
    pub fn release(&self, resource: GpuResource) -> GpuResult<()> {
        self.with_backend(|b| b.destroy_resource(resource.id))?;
        self.registry.lock().remove(&resource.id);
        log::trace!("released {} `{}`", resource.id, resource.desc.label);
        Ok(())
    }

    /// State of `id` as of the last submitted command list.
    pub fn resource_state(&self, id: ResourceId) -> GpuResult<ResourceState> {
        self.registry
            .lock()
            .get(&id)
            .map(|r| r.state)
            .ok_or(GpuError::UnknownResource(id))
    }

    pub fn resource_desc(&self, id: ResourceId) -> GpuResult<ResourceDesc> {
        self.registry
            .lock()
            .get(&id)
            .map(|r| r.desc.clone())
            .ok_or(GpuError::UnknownResource(id))
    }

    /// Number of resources currently tracked, swap chain buffers included.
    pub fn live_resources(&self) -> usize {
        self.registry.lock().len()
    }

    pub(crate) fn commit_states(&self, states: &HashMap<ResourceId, ResourceState>) {
        let mut registry = self.registry.lock();
        for (id, state) in states {
            if let Some(record) = registry.get_mut(id) {
                record.state = *state;
            }
        }
    }

    pub fn write_mapped(&self, resource: &GpuResource, offset: u64, bytes: &[u8]) -> GpuResult<()> {
        self.with_backend(|b| b.write_mapped(resource.id, offset, bytes))
    }

    pub fn read_mapped(&self, resource: &GpuResource, offset: u64, len: u64) -> GpuResult<Vec<u8>> {
        self.with_backend(|b| b.read_mapped(resource.id, offset, len))
    }

    pub fn create_root_signature(&self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureId> {
        self.with_backend(|b| b.create_root_signature(desc))
    }

    pub fn create_pipeline(&self, desc: &PipelineDesc) -> GpuResult<PipelineId> {
        self.with_backend(|b| b.create_pipeline(desc))
    }

    pub fn create_fence(&self, initial: u64) -> GpuResult<Fence> {
        self.with_backend(|b| b.create_fence(initial))
    }

    pub fn descriptor_increment(&self, kind: DescriptorKind) -> u32 {
        self.backend.lock().descriptor_increment(kind)
    }

    /// Reserves `bytes` of descriptor address space and returns its start.
    pub(crate) fn reserve_descriptors(&self, bytes: u64) -> u64 {
        let mut next = self.next_heap_base.lock();
        let base = *next;
        // Keep a gap so a handle past the end never aliases the next heap.
        *next += bytes.max(1) + 0x1000;
        base
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("adapter", &self.adapter.name)
            .field("feature_level", &self.feature_level)
            .field("live_resources", &self.live_resources())
            .finish()
    }
}

/// Owning handle to a device buffer or texture.
///
/// Not `Clone`: exactly one owner decides when the memory is released.
#[derive(Debug)]
pub struct GpuResource {
    id: ResourceId,
    desc: ResourceDesc,
}

impl GpuResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }
}

/// The device's single direct queue. FIFO; completion is asynchronous.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    device: Arc<Device>,
}

impl CommandQueue {
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Submits closed command lists and commits their final resource states.
    pub fn execute(&self, lists: &[&CommandList]) -> GpuResult<()> {
        let mut streams = Vec::with_capacity(lists.len());
        for list in lists {
            if list.state() != ListState::Closed {
                return Err(GpuError::InvalidListState {
                    label: list.label().to_string(),
                    expected: ListState::Closed,
                    actual: list.state(),
                });
            }
            streams.push(list.recorded()?);
        }

        let refs: Vec<&[_]> = streams.iter().map(Vec::as_slice).collect();
        self.device.with_backend(|b| b.execute(&refs))?;

        for list in lists {
            self.device.commit_states(list.final_states());
            list.allocator().mark_executed();
        }
        log::trace!("queue: executed {} command list(s)", lists.len());
        Ok(())
    }

    /// Enqueues a fence signal behind all previously submitted work.
    pub fn signal(&self, fence: &Fence, value: u64) -> GpuResult<()> {
        self.device.with_backend(|b| b.signal(fence, value))
    }

    pub(crate) fn present(&self, sync_interval: u32) -> GpuResult<()> {
        self.device.with_backend(|b| b.present(sync_interval))
    }
}

/// Opens a device on `adapter` at `level`.
pub fn create_device(
    mut backend: Box<dyn Backend>,
    adapter: AdapterInfo,
    level: FeatureLevel,
) -> GpuResult<Arc<Device>> {
    backend.open_device(&adapter, level)?;
    log::info!("{} device created on `{}` at feature level {level}", backend.name(), adapter.name);
    Ok(Arc::new(Device {
        backend: Mutex::new(backend),
        adapter,
        feature_level: level,
        registry: Mutex::new(HashMap::new()),
        next_heap_base: Mutex::new(0x10000),
    }))
}

/// The single graphics-capable queue of `device`.
pub fn create_queue(device: &Arc<Device>) -> CommandQueue {
    CommandQueue { device: device.clone() }
}

/// Device plus its queue, created together at startup.
#[derive(Debug)]
pub struct DeviceContext {
    device: Arc<Device>,
    queue: CommandQueue,
}

impl DeviceContext {
    /// Selects an adapter and opens the device and queue on it.
    pub fn new(mut backend: Box<dyn Backend>, init: &GpuInit) -> GpuResult<Self> {
        if init.debug_layer {
            log::info!("{} debug layer enabled", backend.name());
        }
        let adapter = select_adapter(backend.as_mut(), init)?;
        let device = create_device(backend, adapter, init.min_feature_level)?;
        let queue = create_queue(&device);
        Ok(Self { device, queue })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::SoftBackend;
    use crate::hal::HeapKind;

    fn context() -> DeviceContext {
        DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default()).unwrap()
    }

    #[test]
    fn opens_on_the_hardware_adapter() {
        let ctx = context();
        assert!(!ctx.device().adapter().is_software);
        assert_eq!(ctx.device().feature_level(), FeatureLevel::Level11_0);
        assert_eq!(ctx.device().backend_name(), "soft");
    }

    #[test]
    fn resources_are_tracked_until_released() {
        let ctx = context();
        let device = ctx.device();
        let buf = device.create_resource(&ResourceDesc::buffer("vb", 64)).unwrap();
        assert_eq!(buf.desc().heap, HeapKind::Default);
        assert_eq!(device.resource_state(buf.id()).unwrap(), ResourceState::CopyDest);
        assert_eq!(device.live_resources(), 1);

        let id = buf.id();
        device.release(buf).unwrap();
        assert_eq!(device.live_resources(), 0);
        assert!(matches!(device.resource_state(id), Err(GpuError::UnknownResource(_))));
    }

    #[test]
    fn descriptor_ranges_do_not_overlap() {
        let ctx = context();
        let a = ctx.device().reserve_descriptors(64);
        let b = ctx.device().reserve_descriptors(64);
        assert!(b >= a + 64);
    }
}
