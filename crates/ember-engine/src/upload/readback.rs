use std::sync::Arc;

use crate::command::CommandList;
use crate::device::{Device, GpuResource};
use crate::hal::{GpuResult, ResourceDesc, ResourceId, ResourceKind, ResourceState, Transition};

use super::aligned_row_pitch;

/// Texture rows inside a readback buffer.
#[derive(Debug, Copy, Clone)]
struct RowLayout {
    row_bytes: u32,
    pitch: u32,
    rows: u32,
}

/// A readback buffer filled by a recorded copy.
///
/// The bytes are valid once the list holding the copy has been submitted and
/// the fence has passed it.
#[derive(Debug)]
pub struct Readback {
    resource: GpuResource,
    len: u64,
    layout: Option<RowLayout>,
}

/// Records a copy of `source` (buffer or texture) into a new readback buffer.
///
/// The source is moved to the copy-source state around the copy and returned
/// to the state it was tracked in.
pub fn read_back(device: &Arc<Device>, list: &mut CommandList, source: ResourceId) -> GpuResult<Readback> {
    let desc = device.resource_desc(source)?;
    let (size, layout) = match desc.kind {
        ResourceKind::Buffer { size } => (size, None),
        ResourceKind::Texture2d { width, height, format } => {
            let row_bytes = width * format.bytes_per_pixel();
            let pitch = aligned_row_pitch(row_bytes);
            (pitch as u64 * height as u64, Some(RowLayout { row_bytes, pitch, rows: height }))
        }
    };

    let state = list.tracked_state(source)?;
    let resource = device.create_resource(&ResourceDesc::readback_buffer(format!("{} readback", desc.label), size))?;

    let recorded = record_copy(list, source, state, resource.id(), size, layout);
    if let Err(err) = recorded {
        device.release(resource)?;
        return Err(err);
    }
    Ok(Readback { resource, len: desc.kind.byte_size(), layout })
}

fn record_copy(
    list: &mut CommandList,
    source: ResourceId,
    state: ResourceState,
    dst: ResourceId,
    size: u64,
    layout: Option<RowLayout>,
) -> GpuResult<()> {
    let to_source = Transition::new(source, state, ResourceState::CopySource);
    if state != ResourceState::CopySource {
        list.resource_barrier(&[to_source])?;
    }
    match layout {
        None => list.copy_buffer_region(dst, source, size)?,
        Some(rows) => list.copy_texture_to_buffer(dst, source, rows.pitch)?,
    }
    if state != ResourceState::CopySource {
        list.resource_barrier(&[to_source.reversed()])?;
    }
    Ok(())
}

impl Readback {
    /// Tightly packed copy of the source contents.
    pub fn bytes(&self, device: &Device) -> GpuResult<Vec<u8>> {
        match self.layout {
            None => device.read_mapped(&self.resource, 0, self.len),
            Some(rows) => {
                let mut out = Vec::with_capacity(self.len as usize);
                for y in 0..rows.rows {
                    let row = device.read_mapped(&self.resource, y as u64 * rows.pitch as u64, rows.row_bytes as u64)?;
                    out.extend_from_slice(&row);
                }
                Ok(out)
            }
        }
    }

    pub fn release(self, device: &Device) -> GpuResult<()> {
        device.release(self.resource)
    }
}
