//! Hardware abstraction layer.
//!
//! The core (device context, presentation, recording, synchronization) is
//! written against [`Backend`]. A backend owns the actual GPU objects and
//! executes recorded [`Command`] streams asynchronously to the CPU.
//!
//! Two implementations exist:
//! - [`wgpu::WgpuBackend`] drives real hardware through wgpu
//! - [`soft::SoftBackend`] is a reference GPU running on a worker thread

mod command;
mod error;
mod fence;
mod surface;
mod types;
mod vertex;

pub mod soft;
pub mod wgpu;

pub use command::{Command, Transition, VertexBufferView};
pub use error::{GpuError, GpuResult};
pub use fence::{Fence, FenceEvent};
pub use surface::{DrawableSurface, SurfaceHandle};
pub use types::{
    Access, AdapterInfo, DescriptorKind, FeatureLevel, HeapKind, PipelineDesc, PipelineId,
    PowerPreference, ResourceDesc, ResourceId, ResourceKind, ResourceState, RootSignatureDesc,
    RootSignatureId, ScissorRect, SwapChainDesc, TextureFormat, Viewport, TEXTURE_PITCH_ALIGNMENT,
};
pub use vertex::{ColorVertex, TexturedVertex, VertexLayout};

/// A GPU implementation.
///
/// Calls arrive from a single CPU thread. `execute`, `present` and `signal`
/// enqueue work on the device's single direct queue and return before the GPU
/// has processed it; work is processed in submission order.
pub trait Backend: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Adapters in enumeration order for `preference`.
    fn enumerate_adapters(&mut self, preference: PowerPreference) -> Vec<AdapterInfo>;

    /// Whether a device could be created on `adapter` at `level`, without creating it.
    fn probe_device(&mut self, adapter: &AdapterInfo, level: FeatureLevel) -> bool;

    /// Creates the logical device and its direct queue.
    fn open_device(&mut self, adapter: &AdapterInfo, level: FeatureLevel) -> GpuResult<()>;

    /// Byte distance between consecutive descriptors of `kind`.
    fn descriptor_increment(&self, kind: DescriptorKind) -> u32;

    fn create_resource(&mut self, desc: &ResourceDesc) -> GpuResult<ResourceId>;

    /// Fails with [`GpuError::ResourceInUse`] while queued work still references `id`.
    fn destroy_resource(&mut self, id: ResourceId) -> GpuResult<()>;

    /// CPU write into an upload-heap resource.
    fn write_mapped(&mut self, id: ResourceId, offset: u64, bytes: &[u8]) -> GpuResult<()>;

    /// CPU read from a readback-heap resource.
    fn read_mapped(&mut self, id: ResourceId, offset: u64, len: u64) -> GpuResult<Vec<u8>>;

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureId>;

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineId>;

    /// Creates the swap chain; returns the format actually used for back buffers.
    ///
    /// Without a surface the back buffers are offscreen and presenting only
    /// rotates them.
    fn create_swap_chain(
        &mut self,
        surface: Option<&SurfaceHandle>,
        desc: &SwapChainDesc,
    ) -> GpuResult<TextureFormat>;

    /// Resource backing back buffer `index`, created in the present state.
    fn swap_chain_buffer(&mut self, index: u32) -> GpuResult<ResourceId>;

    /// Back buffer the next frame will be presented from, as the swap chain sees it.
    fn current_back_buffer_index(&self) -> u32;

    fn create_fence(&mut self, initial: u64) -> GpuResult<Fence>;

    /// Enqueues closed command streams for execution.
    fn execute(&mut self, lists: &[&[Command]]) -> GpuResult<()>;

    /// Enqueues presentation of the current back buffer.
    fn present(&mut self, sync_interval: u32) -> GpuResult<()>;

    /// Enqueues a fence signal that lands after all previously enqueued work.
    fn signal(&mut self, fence: &Fence, value: u64) -> GpuResult<()>;
}
