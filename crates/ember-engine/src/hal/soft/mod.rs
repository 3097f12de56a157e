//! Reference GPU that executes command streams on a worker thread.
//!
//! Queue work travels over a channel and is processed strictly in order, so
//! the CPU genuinely runs ahead of the "GPU" and fence waits are real waits.
//! Resource states, barriers and CPU access to in-flight memory are checked
//! the way a debug layer would; any violation removes the device.

mod device;
mod executor;
mod raster;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::Mutex;

pub use device::{PresentedImage, SoftStats};

use self::device::{SoftDevice, SoftSwapChain};
use super::{
    AdapterInfo, Backend, Command, DescriptorKind, FeatureLevel, Fence, GpuError, GpuResult,
    HeapKind, PipelineDesc, PipelineId, PowerPreference, ResourceDesc, ResourceId, ResourceKind,
    ResourceState, RootSignatureDesc, RootSignatureId, SurfaceHandle, SwapChainDesc, TextureFormat,
};

/// Configuration of the reference GPU.
#[derive(Debug, Clone)]
pub struct SoftConfig {
    /// Adapters reported by enumeration, in system order.
    pub adapters: Vec<AdapterInfo>,
    /// Artificial delay applied to every executed command list.
    pub execution_latency: Duration,
}

impl Default for SoftConfig {
    fn default() -> Self {
        Self {
            adapters: vec![
                AdapterInfo {
                    index: 0,
                    name: "Ember Reference Rasterizer".into(),
                    vendor_id: 0x1414,
                    dedicated_memory: 0,
                    is_software: true,
                    max_feature_level: FeatureLevel::Level12_1,
                },
                AdapterInfo {
                    index: 1,
                    name: "Ember Simulated GPU".into(),
                    vendor_id: 0x10de,
                    dedicated_memory: 512 * 1024 * 1024,
                    is_software: false,
                    max_feature_level: FeatureLevel::Level12_0,
                },
            ],
            execution_latency: Duration::ZERO,
        }
    }
}

enum GpuWork {
    Execute { lists: Vec<Vec<Command>>, referenced: Vec<ResourceId> },
    Present { sync_interval: u32 },
    Signal { fence: Fence, value: u64 },
}

/// Backend running the reference GPU.
pub struct SoftBackend {
    config: SoftConfig,
    shared: Arc<Mutex<SoftDevice>>,
    queue: Option<Sender<GpuWork>>,
    worker: Option<JoinHandle<()>>,
    opened: Option<AdapterInfo>,
    next_id: u64,
    buffer_count: u32,
    /// Back buffer index as seen by `current_back_buffer_index`.
    cpu_index: u32,
}

impl SoftBackend {
    pub fn new(config: SoftConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(SoftDevice::default())),
            queue: None,
            worker: None,
            opened: None,
            next_id: 1,
            buffer_count: 0,
            cpu_index: 0,
        }
    }

    /// Read-only view on device memory and counters.
    pub fn probe(&self) -> SoftProbe {
        SoftProbe { shared: self.shared.clone() }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn require_device(&self) -> GpuResult<()> {
        if self.opened.is_none() {
            return Err(GpuError::InvalidCall("device not opened".into()));
        }
        self.shared.lock().check_alive()
    }

    fn submit(&self, work: GpuWork) -> GpuResult<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| GpuError::InvalidCall("device not opened".into()))?;
        queue
            .send(work)
            .map_err(|_| GpuError::DeviceRemoved("gpu worker stopped".into()))
    }
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new(SoftConfig::default())
    }
}

impl Backend for SoftBackend {
    fn name(&self) -> &'static str {
        "soft"
    }

    fn enumerate_adapters(&mut self, preference: PowerPreference) -> Vec<AdapterInfo> {
        let mut adapters = self.config.adapters.clone();
        if preference == PowerPreference::HighPerformance {
            // Hardware first, biggest memory first; software adapters last.
            adapters.sort_by_key(|a| (a.is_software, std::cmp::Reverse(a.dedicated_memory)));
        }
        adapters
    }

    fn probe_device(&mut self, adapter: &AdapterInfo, level: FeatureLevel) -> bool {
        self.config
            .adapters
            .get(adapter.index)
            .is_some_and(|a| a.max_feature_level >= level)
    }

    fn open_device(&mut self, adapter: &AdapterInfo, level: FeatureLevel) -> GpuResult<()> {
        if self.opened.is_some() {
            return Err(GpuError::InvalidCall("device already opened".into()));
        }
        if !self.probe_device(adapter, level) {
            return Err(GpuError::DeviceCreation {
                adapter: adapter.name.clone(),
                reason: format!("feature level {level} is not supported"),
            });
        }

        let (tx, rx) = flume::unbounded();
        let shared = self.shared.clone();
        let latency = self.config.execution_latency;
        let worker = thread::Builder::new()
            .name("ember-soft-gpu".into())
            .spawn(move || run_queue(rx, shared, latency))
            .map_err(|e| GpuError::Creation { what: "gpu worker thread", reason: e.to_string() })?;

        log::debug!("soft device opened on `{}` at feature level {level}", adapter.name);
        self.queue = Some(tx);
        self.worker = Some(worker);
        self.opened = Some(adapter.clone());
        Ok(())
    }

    fn descriptor_increment(&self, kind: DescriptorKind) -> u32 {
        match kind {
            DescriptorKind::RenderTarget => 32,
            DescriptorKind::ShaderResource => 64,
        }
    }

    fn create_resource(&mut self, desc: &ResourceDesc) -> GpuResult<ResourceId> {
        self.require_device()?;
        if desc.kind.byte_size() == 0 {
            return Err(GpuError::Creation {
                what: "resource",
                reason: format!("`{}` has zero size", desc.label),
            });
        }
        if desc.render_target
            && (desc.heap != HeapKind::Default || !matches!(desc.kind, ResourceKind::Texture2d { .. }))
        {
            return Err(GpuError::Creation {
                what: "resource",
                reason: format!("`{}`: render targets must be default-heap textures", desc.label),
            });
        }

        let id = ResourceId(self.next_id());
        self.shared.lock().insert(id, desc.clone());
        Ok(id)
    }

    fn destroy_resource(&mut self, id: ResourceId) -> GpuResult<()> {
        let mut device = self.shared.lock();
        let res = device.resource(id)?;
        if res.in_flight > 0 {
            return Err(GpuError::ResourceInUse(id));
        }
        device.resources.remove(&id);
        Ok(())
    }

    fn write_mapped(&mut self, id: ResourceId, offset: u64, bytes: &[u8]) -> GpuResult<()> {
        let mut device = self.shared.lock();
        device.check_alive()?;
        let res = device.resource_mut(id)?;
        if res.desc.heap != HeapKind::Upload {
            return Err(GpuError::Map { resource: id, reason: "not in the upload heap".into() });
        }
        if res.in_flight > 0 {
            return Err(GpuError::ResourceInUse(id));
        }
        let start = offset as usize;
        let dst = res
            .bytes
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| GpuError::Map { resource: id, reason: "write past the end".into() })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn read_mapped(&mut self, id: ResourceId, offset: u64, len: u64) -> GpuResult<Vec<u8>> {
        let device = self.shared.lock();
        device.check_alive()?;
        let res = device.resource(id)?;
        if res.desc.heap != HeapKind::Readback {
            return Err(GpuError::Map { resource: id, reason: "not in the readback heap".into() });
        }
        if res.in_flight > 0 {
            return Err(GpuError::ResourceInUse(id));
        }
        let start = offset as usize;
        res.bytes
            .get(start..start + len as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| GpuError::Map { resource: id, reason: "read past the end".into() })
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureId> {
        self.require_device()?;
        let id = RootSignatureId(self.next_id());
        self.shared.lock().root_signatures.insert(id, desc.clone());
        Ok(id)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineId> {
        self.require_device()?;
        let id = PipelineId(self.next_id());
        let mut device = self.shared.lock();
        if !device.root_signatures.contains_key(&desc.root_signature) {
            return Err(GpuError::Creation {
                what: "pipeline state",
                reason: format!("`{}` references an unknown root signature", desc.label),
            });
        }
        device.pipelines.insert(id, desc.clone());
        Ok(id)
    }

    fn create_swap_chain(
        &mut self,
        surface: Option<&SurfaceHandle>,
        desc: &SwapChainDesc,
    ) -> GpuResult<TextureFormat> {
        self.require_device()?;
        if desc.buffer_count < 2 {
            return Err(GpuError::Creation {
                what: "swap chain",
                reason: format!("flip model needs at least 2 buffers, got {}", desc.buffer_count),
            });
        }
        if self.shared.lock().swap_chain.is_some() {
            return Err(GpuError::InvalidCall("swap chain already created".into()));
        }
        if surface.is_some() {
            log::debug!("soft backend presents offscreen; window contents are not updated");
        }

        let mut buffers = Vec::with_capacity(desc.buffer_count as usize);
        for i in 0..desc.buffer_count {
            let id = ResourceId(self.next_id());
            let buffer = ResourceDesc {
                label: format!("back buffer {i}"),
                kind: ResourceKind::Texture2d { width: desc.width, height: desc.height, format: desc.format },
                heap: HeapKind::Default,
                initial_state: ResourceState::Present,
                render_target: true,
            };
            self.shared.lock().insert(id, buffer);
            buffers.push(id);
        }

        self.shared.lock().swap_chain = Some(SoftSwapChain { buffers, gpu_index: 0 });
        self.buffer_count = desc.buffer_count;
        self.cpu_index = 0;
        Ok(desc.format)
    }

    fn swap_chain_buffer(&mut self, index: u32) -> GpuResult<ResourceId> {
        let device = self.shared.lock();
        device
            .swap_chain
            .as_ref()
            .and_then(|c| c.buffers.get(index as usize).copied())
            .ok_or_else(|| GpuError::InvalidCall(format!("no swap chain buffer {index}")))
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.cpu_index
    }

    fn create_fence(&mut self, initial: u64) -> GpuResult<Fence> {
        self.require_device()?;
        Ok(Fence::new(initial))
    }

    fn execute(&mut self, lists: &[&[Command]]) -> GpuResult<()> {
        self.require_device()?;
        let mut referenced: Vec<ResourceId> =
            lists.iter().flat_map(|l| l.iter()).flat_map(Command::resources).collect();
        referenced.sort_unstable();
        referenced.dedup();

        {
            let mut device = self.shared.lock();
            for id in &referenced {
                device.resource(*id)?;
            }
            for id in &referenced {
                device.resource_mut(*id)?.in_flight += 1;
            }
        }

        let lists = lists.iter().map(|l| l.to_vec()).collect();
        self.submit(GpuWork::Execute { lists, referenced })
    }

    fn present(&mut self, sync_interval: u32) -> GpuResult<()> {
        self.require_device()?;
        if self.buffer_count == 0 {
            return Err(GpuError::InvalidCall("present without a swap chain".into()));
        }
        self.submit(GpuWork::Present { sync_interval })?;
        self.cpu_index = (self.cpu_index + 1) % self.buffer_count;
        Ok(())
    }

    fn signal(&mut self, fence: &Fence, value: u64) -> GpuResult<()> {
        // Accepted on a removed device too, so shutdown can still drain.
        self.submit(GpuWork::Signal { fence: fence.clone(), value })
    }
}

impl Drop for SoftBackend {
    fn drop(&mut self) {
        self.queue = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("soft gpu worker panicked");
            }
        }
    }
}

fn run_queue(rx: Receiver<GpuWork>, shared: Arc<Mutex<SoftDevice>>, latency: Duration) {
    for work in rx.iter() {
        match work {
            GpuWork::Execute { lists, referenced } => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                let mut device = shared.lock();
                if device.removed.is_none() {
                    for list in &lists {
                        if let Err(e) = executor::execute_list(&mut device, list) {
                            log::error!("soft gpu: command list faulted: {e}");
                            device.removed = Some(e.to_string());
                            break;
                        }
                    }
                }
                for id in referenced {
                    if let Some(res) = device.resources.get_mut(&id) {
                        res.in_flight = res.in_flight.saturating_sub(1);
                    }
                }
            }
            GpuWork::Present { sync_interval } => {
                let mut device = shared.lock();
                if device.removed.is_none() {
                    if let Err(e) = device.present(sync_interval) {
                        log::error!("soft gpu: present faulted: {e}");
                        device.removed = Some(e.to_string());
                    }
                }
            }
            GpuWork::Signal { fence, value } => {
                shared.lock().stats.signals += 1;
                // Signals land even on a removed device so no CPU wait hangs.
                fence.complete(value);
            }
        }
    }
}

/// Inspection handle on the reference GPU's memory.
#[derive(Clone)]
pub struct SoftProbe {
    shared: Arc<Mutex<SoftDevice>>,
}

impl SoftProbe {
    pub fn stats(&self) -> SoftStats {
        self.shared.lock().stats
    }

    /// The most recently presented back buffer.
    pub fn last_present(&self) -> Option<PresentedImage> {
        self.shared.lock().last_present.clone()
    }

    pub fn removed_reason(&self) -> Option<String> {
        self.shared.lock().removed.clone()
    }

    /// Number of live resources, swap chain buffers included.
    pub fn live_resources(&self) -> usize {
        self.shared.lock().resources.len()
    }

    /// GPU-timeline state of a resource.
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.shared.lock().resources.get(&id).map(|r| r.state)
    }

    /// Back buffer index the GPU will present next.
    pub fn gpu_back_buffer_index(&self) -> Option<u32> {
        self.shared.lock().swap_chain.as_ref().map(|c| c.gpu_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{FenceEvent, Transition, VertexLayout};

    fn opened() -> SoftBackend {
        let mut backend = SoftBackend::default();
        let adapter = backend.enumerate_adapters(PowerPreference::Unspecified)[1].clone();
        backend.open_device(&adapter, FeatureLevel::Level11_0).unwrap();
        backend
    }

    fn flush(backend: &mut SoftBackend, value: u64) {
        let fence = backend.create_fence(0).unwrap();
        backend.signal(&fence, value).unwrap();
        let event = FenceEvent::new();
        fence.set_event_on_completion(value, &event);
        event.wait();
    }

    #[test]
    fn high_performance_puts_hardware_first() {
        let mut backend = SoftBackend::default();
        let adapters = backend.enumerate_adapters(PowerPreference::HighPerformance);
        assert!(!adapters[0].is_software);
        assert!(adapters[1].is_software);
        assert_eq!(adapters[0].index, 1);
    }

    #[test]
    fn probe_respects_max_feature_level() {
        let mut backend = SoftBackend::default();
        let hw = backend.enumerate_adapters(PowerPreference::Unspecified)[1].clone();
        assert!(backend.probe_device(&hw, FeatureLevel::Level11_0));
        assert!(!backend.probe_device(&hw, FeatureLevel::Level12_1));
    }

    #[test]
    fn copy_runs_on_the_worker() {
        let mut backend = opened();
        let src = backend.create_resource(&ResourceDesc::upload_buffer("src", 8)).unwrap();
        let dst = backend.create_resource(&ResourceDesc::readback_buffer("dst", 8)).unwrap();
        backend.write_mapped(src, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        backend.execute(&[&[Command::CopyBuffer { src, dst, size: 8 }]]).unwrap();
        flush(&mut backend, 1);

        assert_eq!(backend.read_mapped(dst, 0, 8).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(backend.probe().stats().copies, 1);
    }

    #[test]
    fn in_flight_resources_cannot_be_touched() {
        let mut backend = SoftBackend::new(SoftConfig {
            execution_latency: Duration::from_millis(50),
            ..SoftConfig::default()
        });
        let adapter = backend.enumerate_adapters(PowerPreference::Unspecified)[1].clone();
        backend.open_device(&adapter, FeatureLevel::Level11_0).unwrap();

        let src = backend.create_resource(&ResourceDesc::upload_buffer("src", 4)).unwrap();
        let dst = backend.create_resource(&ResourceDesc::readback_buffer("dst", 4)).unwrap();
        backend.execute(&[&[Command::CopyBuffer { src, dst, size: 4 }]]).unwrap();

        assert!(matches!(backend.destroy_resource(src), Err(GpuError::ResourceInUse(_))));
        assert!(matches!(backend.write_mapped(src, 0, &[0; 4]), Err(GpuError::ResourceInUse(_))));

        flush(&mut backend, 1);
        backend.destroy_resource(src).unwrap();
    }

    #[test]
    fn barrier_mismatch_removes_device_but_signals_land() {
        let mut backend = opened();
        let fence = backend.create_fence(0).unwrap();
        let buf = backend.create_resource(&ResourceDesc::buffer("vb", 16)).unwrap();
        let bad = Transition::new(buf, ResourceState::VertexBuffer, ResourceState::CopyDest);
        backend.execute(&[&[Command::Barrier(bad)]]).unwrap();

        let event = FenceEvent::new();
        fence.set_event_on_completion(1, &event);
        backend.signal(&fence, 1).unwrap();
        event.wait();

        assert!(backend.probe().removed_reason().is_some());
        assert!(matches!(backend.execute(&[]), Err(GpuError::DeviceRemoved(_))));
    }

    #[test]
    fn present_rotates_both_indices() {
        let mut backend = opened();
        let desc = SwapChainDesc {
            width: 4,
            height: 4,
            buffer_count: 2,
            format: TextureFormat::Rgba8Unorm,
            vsync: false,
        };
        backend.create_swap_chain(None, &desc).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 0);

        backend.present(0).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 1);
        flush(&mut backend, 1);

        let probe = backend.probe();
        assert_eq!(probe.gpu_back_buffer_index(), Some(1));
        assert_eq!(probe.last_present().map(|i| i.buffer_index), Some(0));
        assert_eq!(probe.stats().vsync_presents, 0);
    }

    #[test]
    fn present_records_the_sync_interval() {
        let mut backend = opened();
        let desc = SwapChainDesc {
            width: 4,
            height: 4,
            buffer_count: 2,
            format: TextureFormat::Rgba8Unorm,
            vsync: true,
        };
        backend.create_swap_chain(None, &desc).unwrap();

        backend.present(2).unwrap();
        backend.present(0).unwrap();
        backend.present(1).unwrap();
        flush(&mut backend, 1);

        let stats = backend.probe().stats();
        assert_eq!(stats.presents, 3);
        assert_eq!(stats.vsync_presents, 2);
        assert_eq!(stats.last_sync_interval, 1);
    }

    #[test]
    fn pipelines_need_a_known_root_signature() {
        let mut backend = opened();
        let root = backend
            .create_root_signature(&RootSignatureDesc { label: "root".into(), shader_resource_table: false })
            .unwrap();
        let mut desc = PipelineDesc {
            label: "color".into(),
            root_signature: root,
            vertex_layout: VertexLayout::PositionColor,
            target_format: TextureFormat::Rgba8Unorm,
        };
        let first = backend.create_pipeline(&desc).unwrap();
        let second = backend.create_pipeline(&desc).unwrap();
        assert_ne!(first, second);
        assert_ne!(first.0, root.0);

        desc.root_signature = RootSignatureId(999);
        assert!(matches!(backend.create_pipeline(&desc), Err(GpuError::Creation { .. })));
    }

    #[test]
    fn swap_chain_needs_two_buffers() {
        let mut backend = opened();
        let desc = SwapChainDesc {
            width: 4,
            height: 4,
            buffer_count: 1,
            format: TextureFormat::Rgba8Unorm,
            vsync: false,
        };
        assert!(backend.create_swap_chain(None, &desc).is_err());
    }
}
