use std::sync::Arc;

use crate::device::{CommandQueue, Device};
use crate::hal::{
    GpuError, GpuResult, HeapKind, ResourceDesc, ResourceId, ResourceKind, ResourceState,
    SurfaceHandle, SwapChainDesc, TextureFormat,
};

use super::{Descriptor, DescriptorHandle, DescriptorHeap};

/// Number of back buffers in the flip chain.
pub const BUFFER_COUNT: u32 = 2;

/// Back buffer format requested from the backend.
pub const BACK_BUFFER_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// One back buffer and its render-target view.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BackBuffer {
    pub resource: ResourceId,
    pub rtv: DescriptorHandle,
}

/// Flip-model ring of back buffers bound to a window surface.
#[derive(Debug)]
pub struct SwapChain {
    device: Arc<Device>,
    queue: CommandQueue,
    width: u32,
    height: u32,
    buffer_count: u32,
    format: TextureFormat,
    buffers: Vec<ResourceId>,
}

impl SwapChain {
    /// Creates the chain on the queue that will present it.
    ///
    /// Without a surface the back buffers are offscreen.
    pub fn create(
        queue: &CommandQueue,
        surface: Option<&SurfaceHandle>,
        width: u32,
        height: u32,
        buffer_count: u32,
        vsync: bool,
    ) -> GpuResult<Self> {
        if width == 0 || height == 0 {
            return Err(GpuError::Creation {
                what: "swap chain",
                reason: format!("drawable area is {width}x{height}"),
            });
        }

        let device = queue.device().clone();
        let desc = SwapChainDesc { width, height, buffer_count, format: BACK_BUFFER_FORMAT, vsync };
        let format = device.with_backend(|b| b.create_swap_chain(surface, &desc))?;
        log::info!(
            "swap chain: {buffer_count} x {width}x{height} {format:?}{}",
            if surface.is_some() { "" } else { " (offscreen)" }
        );

        Ok(Self {
            device,
            queue: queue.clone(),
            width,
            height,
            buffer_count,
            format,
            buffers: Vec::new(),
        })
    }

    /// Retrieves every back buffer and writes its render-target view into
    /// `rtv_heap` at the slot matching its index.
    pub fn acquire_back_buffers(&mut self, rtv_heap: &mut DescriptorHeap) -> GpuResult<Vec<BackBuffer>> {
        if !self.buffers.is_empty() {
            return Err(GpuError::InvalidCall("back buffers already acquired".into()));
        }

        let mut out = Vec::with_capacity(self.buffer_count as usize);
        for index in 0..self.buffer_count {
            let resource = self.device.with_backend(|b| b.swap_chain_buffer(index))?;
            self.device.adopt(
                resource,
                ResourceDesc {
                    label: format!("back buffer {index}"),
                    kind: ResourceKind::Texture2d { width: self.width, height: self.height, format: self.format },
                    heap: HeapKind::Default,
                    initial_state: ResourceState::Present,
                    render_target: true,
                },
            );
            let rtv = rtv_heap.write(index, Descriptor::RenderTargetView(resource))?;
            self.buffers.push(resource);
            out.push(BackBuffer { resource, rtv });
        }
        Ok(out)
    }

    /// Presents the current back buffer.
    pub fn present(&self, sync_interval: u32) -> GpuResult<()> {
        self.queue.present(sync_interval)
    }

    /// Index of the back buffer the next frame renders into, as the chain reports it.
    pub fn current_back_buffer_index(&self) -> u32 {
        self.device.with_backend(|b| b.current_back_buffer_index())
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Stops tracking the back buffers; the backend frees them with the chain.
    pub fn release(self) {
        for id in &self.buffers {
            self.device.disown(*id);
        }
        log::debug!("swap chain released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceContext, GpuInit};
    use crate::hal::soft::SoftBackend;
    use crate::hal::DescriptorKind;

    fn context() -> DeviceContext {
        DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default()).unwrap()
    }

    #[test]
    fn zero_sized_chains_are_rejected() {
        let ctx = context();
        assert!(SwapChain::create(ctx.queue(), None, 0, 720, BUFFER_COUNT, false).is_err());
        assert!(SwapChain::create(ctx.queue(), None, 1280, 0, BUFFER_COUNT, false).is_err());
    }

    #[test]
    fn back_buffers_get_views_at_their_index() {
        let ctx = context();
        let mut chain = SwapChain::create(ctx.queue(), None, 64, 32, BUFFER_COUNT, false).unwrap();
        let mut heap = DescriptorHeap::new(ctx.device(), "rtv", DescriptorKind::RenderTarget, BUFFER_COUNT).unwrap();

        let buffers = chain.acquire_back_buffers(&mut heap).unwrap();
        assert_eq!(buffers.len(), 2);
        for (i, bb) in buffers.iter().enumerate() {
            assert_eq!(bb.rtv, heap.handle(i as u32).unwrap());
            assert_eq!(heap.resolve(bb.rtv).unwrap(), Descriptor::RenderTargetView(bb.resource));
            assert_eq!(ctx.device().resource_state(bb.resource).unwrap(), ResourceState::Present);
        }
        assert_eq!(chain.current_back_buffer_index(), 0);
    }
}
