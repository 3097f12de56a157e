use std::sync::Arc;

use crate::device::Device;
use crate::hal::{DescriptorKind, GpuError, GpuResult};

use super::{BackBuffer, Descriptor, DescriptorHandle, DescriptorHeap, SwapChain};

/// Per-back-buffer render-target views plus the shared shader-resource heap.
#[derive(Debug)]
pub struct FrameResources {
    rtv_heap: DescriptorHeap,
    srv_heap: Option<DescriptorHeap>,
    back_buffers: Vec<BackBuffer>,
}

impl FrameResources {
    /// Creates the heaps and acquires the back buffers of `swap_chain`.
    ///
    /// `srv_capacity` of zero creates no shader-resource heap.
    pub fn create(device: &Arc<Device>, swap_chain: &mut SwapChain, srv_capacity: u32) -> GpuResult<Self> {
        let mut rtv_heap =
            DescriptorHeap::new(device, "rtv heap", DescriptorKind::RenderTarget, swap_chain.buffer_count())?;
        let back_buffers = swap_chain.acquire_back_buffers(&mut rtv_heap)?;
        let srv_heap = match srv_capacity {
            0 => None,
            n => Some(DescriptorHeap::new(device, "srv heap", DescriptorKind::ShaderResource, n)?),
        };
        Ok(Self { rtv_heap, srv_heap, back_buffers })
    }

    pub fn back_buffer(&self, index: u32) -> GpuResult<&BackBuffer> {
        self.back_buffers
            .get(index as usize)
            .ok_or_else(|| GpuError::InvalidCall(format!("no back buffer {index}")))
    }

    pub fn back_buffers(&self) -> &[BackBuffer] {
        &self.back_buffers
    }

    pub fn rtv_heap(&self) -> &DescriptorHeap {
        &self.rtv_heap
    }

    pub fn srv_heap(&self) -> Option<&DescriptorHeap> {
        self.srv_heap.as_ref()
    }

    /// Writes a shader-resource view into slot `index` of the SRV heap.
    pub fn write_srv(&mut self, index: u32, descriptor: Descriptor) -> GpuResult<DescriptorHandle> {
        self.srv_heap
            .as_mut()
            .ok_or_else(|| GpuError::InvalidCall("no shader-resource heap".into()))?
            .write(index, descriptor)
    }
}
