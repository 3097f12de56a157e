use std::collections::HashMap;

use crate::hal::{
    GpuError, GpuResult, PipelineDesc, PipelineId, ResourceDesc, ResourceId, ResourceKind,
    ResourceState, RootSignatureDesc, RootSignatureId, TextureFormat,
};

/// Device memory and object tables of the software GPU.
///
/// Shared between the CPU-facing backend and the worker thread.
#[derive(Default)]
pub(super) struct SoftDevice {
    pub resources: HashMap<ResourceId, SoftResource>,
    pub pipelines: HashMap<PipelineId, PipelineDesc>,
    pub root_signatures: HashMap<RootSignatureId, RootSignatureDesc>,
    pub swap_chain: Option<SoftSwapChain>,
    /// Set once the device is lost; every later call reports it.
    pub removed: Option<String>,
    pub stats: SoftStats,
    pub last_present: Option<PresentedImage>,
}

pub(super) struct SoftResource {
    pub desc: ResourceDesc,
    pub bytes: Vec<u8>,
    /// State as the GPU timeline sees it.
    pub state: ResourceState,
    /// Queued submissions that reference this resource and have not executed yet.
    pub in_flight: u32,
}

pub(super) struct SoftSwapChain {
    pub buffers: Vec<ResourceId>,
    /// Index advanced when the GPU processes a present.
    pub gpu_index: u32,
}

/// Counters reported by the software GPU.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SoftStats {
    pub lists_executed: u64,
    pub draws: u64,
    pub copies: u64,
    pub presents: u64,
    /// Presents that waited for a vertical blank.
    pub vsync_presents: u64,
    /// Sync interval of the most recent present.
    pub last_sync_interval: u32,
    pub signals: u64,
}

/// Snapshot of a presented back buffer, tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedImage {
    pub buffer_index: u32,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub bytes: Vec<u8>,
}

impl PresentedImage {
    /// Linear RGBA color of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = ((y * self.width + x) * self.format.bytes_per_pixel()) as usize;
        let texel: [u8; 4] = self.bytes.get(at..at + 4)?.try_into().ok()?;
        Some(self.format.decode(texel))
    }
}

impl SoftDevice {
    pub fn check_alive(&self) -> GpuResult<()> {
        match &self.removed {
            Some(reason) => Err(GpuError::DeviceRemoved(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn resource(&self, id: ResourceId) -> GpuResult<&SoftResource> {
        self.resources.get(&id).ok_or(GpuError::UnknownResource(id))
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> GpuResult<&mut SoftResource> {
        self.resources.get_mut(&id).ok_or(GpuError::UnknownResource(id))
    }

    pub fn insert(&mut self, id: ResourceId, desc: ResourceDesc) {
        let len = desc.kind.byte_size() as usize;
        let state = desc.initial_state;
        self.resources.insert(
            id,
            SoftResource { desc, bytes: vec![0; len], state, in_flight: 0 },
        );
    }

    pub fn present(&mut self, sync_interval: u32) -> GpuResult<()> {
        let chain = self
            .swap_chain
            .as_mut()
            .ok_or_else(|| GpuError::InvalidCall("present without a swap chain".into()))?;
        let index = chain.gpu_index;
        let id = chain.buffers[index as usize];
        chain.gpu_index = (index + 1) % chain.buffers.len() as u32;

        let buffer = self.resources.get(&id).ok_or(GpuError::UnknownResource(id))?;
        if !buffer.state.permits(crate::hal::Access::Present) {
            return Err(GpuError::InvalidCall(format!(
                "presenting back buffer {index} while it is {:?}",
                buffer.state
            )));
        }

        if let ResourceKind::Texture2d { width, height, format } = buffer.desc.kind {
            self.last_present = Some(PresentedImage {
                buffer_index: index,
                width,
                height,
                format,
                bytes: buffer.bytes.clone(),
            });
        }
        self.stats.presents += 1;
        if sync_interval > 0 {
            self.stats.vsync_presents += 1;
        }
        self.stats.last_sync_interval = sync_interval;
        Ok(())
    }
}
