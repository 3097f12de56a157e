//! One-shot transfers of CPU-authored data into GPU memory, and the reverse
//! path used to inspect results.

mod readback;

use std::sync::Arc;

use crate::command::CommandList;
use crate::device::{Device, GpuResource};
use crate::hal::{
    GpuError, GpuResult, ResourceDesc, ResourceKind, ResourceState, Transition, TEXTURE_PITCH_ALIGNMENT,
};

pub use readback::{read_back, Readback};

/// Rounds a texture row size up to the copy alignment.
pub fn aligned_row_pitch(row_bytes: u32) -> u32 {
    row_bytes.div_ceil(TEXTURE_PITCH_ALIGNMENT) * TEXTURE_PITCH_ALIGNMENT
}

struct Staging {
    resource: GpuResource,
    /// Fence value signaled after the list copying out of it; `None` until submitted.
    fence_value: Option<u64>,
}

/// Owns staging buffers until the GPU has finished copying out of them.
pub struct UploadPipeline {
    device: Arc<Device>,
    pending: Vec<Staging>,
    uploaded_bytes: u64,
}

impl UploadPipeline {
    pub fn new(device: &Arc<Device>) -> Self {
        Self { device: device.clone(), pending: Vec::new(), uploaded_bytes: 0 }
    }

    /// Records a copy of `bytes` into `dest` followed by a barrier to the
    /// resource's steady state (vertex buffer for buffers, pixel shader
    /// resource for textures).
    ///
    /// `dest` must be in the copy-destination state. For textures `bytes`
    /// holds `height` rows `row_pitch` apart and `slice_pitch` covers the
    /// whole image; buffers ignore both pitches beyond a size check.
    pub fn upload(
        &mut self,
        list: &mut CommandList,
        dest: &GpuResource,
        bytes: &[u8],
        row_pitch: u32,
        slice_pitch: u32,
    ) -> GpuResult<()> {
        let label = &dest.desc().label;
        let (staging, copied, steady) = match dest.desc().kind {
            ResourceKind::Buffer { size } => {
                let len = bytes.len() as u64;
                if len == 0 || len > size {
                    return Err(GpuError::InvalidCall(format!(
                        "{len} bytes do not fit buffer `{label}` of {size} bytes"
                    )));
                }
                if (slice_pitch as u64) < len {
                    return Err(GpuError::InvalidCall(format!("slice pitch {slice_pitch} below {len} bytes")));
                }
                let staging = self.create_staging(label, len, |staging| {
                    self.device.write_mapped(staging, 0, bytes)
                })?;
                let copied = list.copy_buffer_region(dest.id(), staging.id(), len);
                (staging, copied, ResourceState::VertexBuffer)
            }
            ResourceKind::Texture2d { width, height, format } => {
                let row_bytes = width as u64 * format.bytes_per_pixel() as u64;
                if (row_pitch as u64) < row_bytes
                    || (slice_pitch as u64) < row_pitch as u64 * height as u64
                    || (bytes.len() as u64) < slice_pitch as u64
                {
                    return Err(GpuError::InvalidCall(format!(
                        "texture `{label}` ({width}x{height}) cannot be read from {} bytes at pitch {row_pitch}/{slice_pitch}",
                        bytes.len()
                    )));
                }
                // Fits: row_bytes <= row_pitch.
                let row_bytes = row_bytes as u32;
                let pitch = aligned_row_pitch(row_bytes);
                let staging = self.create_staging(label, pitch as u64 * height as u64, |staging| {
                    for (y, row) in bytes.chunks(row_pitch as usize).take(height as usize).enumerate() {
                        self.device.write_mapped(staging, y as u64 * pitch as u64, &row[..row_bytes as usize])?;
                    }
                    Ok(())
                })?;
                let copied = list.copy_buffer_to_texture(dest.id(), staging.id(), pitch);
                (staging, copied, ResourceState::PixelShaderResource)
            }
        };

        if let Err(err) = copied {
            self.device.release(staging)?;
            return Err(err);
        }
        log::debug!("upload: {} bytes into `{label}` via {}", bytes.len(), staging.id());
        self.uploaded_bytes += bytes.len() as u64;
        self.pending.push(Staging { resource: staging, fence_value: None });

        list.resource_barrier(&[Transition::new(dest.id(), ResourceState::CopyDest, steady)])
    }

    fn create_staging(
        &self,
        label: &str,
        size: u64,
        fill: impl FnOnce(&GpuResource) -> GpuResult<()>,
    ) -> GpuResult<GpuResource> {
        let staging = self.device.create_resource(&ResourceDesc::upload_buffer(format!("{label} staging"), size))?;
        match fill(&staging) {
            Ok(()) => Ok(staging),
            Err(err) => {
                // Not referenced by any list yet.
                self.device.release(staging)?;
                Err(err)
            }
        }
    }

    /// Stamps every staging buffer not yet submitted with the fence value
    /// signaled after its list.
    pub fn mark_submitted(&mut self, fence_value: u64) {
        for staging in self.pending.iter_mut().filter(|s| s.fence_value.is_none()) {
            staging.fence_value = Some(fence_value);
        }
    }

    /// Releases staging buffers whose copies the fence reports complete.
    pub fn release_completed(&mut self, completed: u64) -> GpuResult<usize> {
        let (done, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|s| matches!(s.fence_value, Some(v) if v <= completed));
        self.pending = keep;

        let released = done.len();
        for staging in done {
            self.device.release(staging.resource)?;
        }
        if released > 0 {
            log::debug!("upload: released {released} staging buffer(s) at fence {completed}");
        }
        Ok(released)
    }

    /// Releases everything. Only valid once the queue has been drained.
    pub fn release_all(&mut self) -> GpuResult<()> {
        for staging in self.pending.drain(..) {
            self.device.release(staging.resource)?;
        }
        Ok(())
    }

    /// Staging buffers still held.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandAllocator;
    use crate::device::{DeviceContext, GpuInit};
    use crate::hal::soft::SoftBackend;
    use crate::hal::TextureFormat;

    fn context() -> DeviceContext {
        DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default()).unwrap()
    }

    #[test]
    fn row_pitch_rounds_up_to_256() {
        assert_eq!(aligned_row_pitch(1), 256);
        assert_eq!(aligned_row_pitch(256), 256);
        assert_eq!(aligned_row_pitch(1024), 1024);
        assert_eq!(aligned_row_pitch(1028), 1280);
    }

    #[test]
    fn buffer_upload_ends_in_vertex_buffer_state() {
        let ctx = context();
        let dest = ctx.device().create_resource(&ResourceDesc::buffer("vb", 36)).unwrap();
        let alloc = CommandAllocator::new("setup");
        let mut list = CommandList::new(ctx.device(), &alloc, "setup", None).unwrap();

        let mut uploads = UploadPipeline::new(ctx.device());
        uploads.upload(&mut list, &dest, &[7u8; 36], 36, 36).unwrap();
        assert_eq!(list.tracked_state(dest.id()).unwrap(), ResourceState::VertexBuffer);
        assert_eq!(uploads.pending_count(), 1);
    }

    #[test]
    fn staging_waits_for_its_fence_value() {
        let ctx = context();
        let dest = ctx
            .device()
            .create_resource(&ResourceDesc::texture2d("tex", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let alloc = CommandAllocator::new("setup");
        let mut list = CommandList::new(ctx.device(), &alloc, "setup", None).unwrap();
        let mut uploads = UploadPipeline::new(ctx.device());
        uploads.upload(&mut list, &dest, &[1u8; 64], 16, 64).unwrap();
        assert_eq!(list.tracked_state(dest.id()).unwrap(), ResourceState::PixelShaderResource);

        // Unsubmitted staging is never released by fence progress.
        assert_eq!(uploads.release_completed(10).unwrap(), 0);
        uploads.mark_submitted(3);
        assert_eq!(uploads.release_completed(2).unwrap(), 0);
        assert_eq!(uploads.release_completed(3).unwrap(), 1);
        assert_eq!(uploads.pending_count(), 0);
    }

    #[test]
    fn oversized_or_short_sources_are_rejected() {
        let ctx = context();
        let dest = ctx.device().create_resource(&ResourceDesc::buffer("vb", 16)).unwrap();
        let tex = ctx
            .device()
            .create_resource(&ResourceDesc::texture2d("tex", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let alloc = CommandAllocator::new("setup");
        let mut list = CommandList::new(ctx.device(), &alloc, "setup", None).unwrap();
        let mut uploads = UploadPipeline::new(ctx.device());

        assert!(uploads.upload(&mut list, &dest, &[0u8; 17], 17, 17).is_err());
        assert!(uploads.upload(&mut list, &tex, &[0u8; 32], 16, 64).is_err());
        assert_eq!(uploads.pending_count(), 0);
        assert_eq!(ctx.device().live_resources(), 2);
    }

    #[test]
    fn huge_pitches_are_rejected_not_overflowed() {
        let ctx = context();
        let tex = ctx
            .device()
            .create_resource(&ResourceDesc::texture2d("tex", 4, 16, TextureFormat::Rgba8Unorm))
            .unwrap();
        let alloc = CommandAllocator::new("setup");
        let mut list = CommandList::new(ctx.device(), &alloc, "setup", None).unwrap();
        let mut uploads = UploadPipeline::new(ctx.device());

        assert!(matches!(
            uploads.upload(&mut list, &tex, &[0u8; 256], 0x1000_0000, 256),
            Err(GpuError::InvalidCall(_))
        ));
        assert!(matches!(
            uploads.upload(&mut list, &tex, &[0u8; 256], u32::MAX, u32::MAX),
            Err(GpuError::InvalidCall(_))
        ));
        assert_eq!(uploads.pending_count(), 0);
    }
}
