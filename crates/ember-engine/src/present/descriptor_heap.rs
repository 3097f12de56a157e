use std::sync::Arc;

use crate::device::Device;
use crate::hal::{DescriptorKind, GpuError, GpuResult, ResourceId};

/// Address of one descriptor slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorHandle {
    pub ptr: u64,
}

impl DescriptorHandle {
    /// Handle `index` slots past this one.
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self { ptr: self.ptr + index as u64 * increment as u64 }
    }
}

/// A view written into a heap slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Descriptor {
    RenderTargetView(ResourceId),
    ShaderResourceView(ResourceId),
}

impl Descriptor {
    fn kind(self) -> DescriptorKind {
        match self {
            Descriptor::RenderTargetView(_) => DescriptorKind::RenderTarget,
            Descriptor::ShaderResourceView(_) => DescriptorKind::ShaderResource,
        }
    }

    pub fn resource(self) -> ResourceId {
        match self {
            Descriptor::RenderTargetView(id) | Descriptor::ShaderResourceView(id) => id,
        }
    }
}

/// Fixed-capacity table of view descriptors.
///
/// Slot `i` lives at `start + i * increment`, the increment being reported by
/// the backend for the heap's kind. Each slot is written once.
#[derive(Debug)]
pub struct DescriptorHeap {
    label: String,
    kind: DescriptorKind,
    start: DescriptorHandle,
    increment: u32,
    slots: Vec<Option<Descriptor>>,
}

impl DescriptorHeap {
    pub fn new(device: &Arc<Device>, label: impl Into<String>, kind: DescriptorKind, capacity: u32) -> GpuResult<Self> {
        let label = label.into();
        if capacity == 0 {
            return Err(GpuError::Creation {
                what: "descriptor heap",
                reason: format!("`{label}` has zero capacity"),
            });
        }
        let increment = device.descriptor_increment(kind);
        let base = device.reserve_descriptors(capacity as u64 * increment as u64);
        log::debug!("descriptor heap `{label}`: {capacity} x {kind:?}, increment {increment}");
        Ok(Self {
            label,
            kind,
            start: DescriptorHandle { ptr: base },
            increment,
            slots: vec![None; capacity as usize],
        })
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn start(&self) -> DescriptorHandle {
        self.start
    }

    /// Handle of slot `index`.
    pub fn handle(&self, index: u32) -> GpuResult<DescriptorHandle> {
        if index >= self.capacity() {
            return Err(GpuError::DescriptorOutOfRange { index, capacity: self.capacity() });
        }
        Ok(self.start.offset(index, self.increment))
    }

    /// Writes a view into slot `index`.
    pub fn write(&mut self, index: u32, descriptor: Descriptor) -> GpuResult<DescriptorHandle> {
        let handle = self.handle(index)?;
        if descriptor.kind() != self.kind {
            return Err(GpuError::InvalidCall(format!(
                "{descriptor:?} cannot live in {:?} heap `{}`",
                self.kind, self.label
            )));
        }
        let slot = &mut self.slots[index as usize];
        if slot.is_some() {
            return Err(GpuError::InvalidCall(format!(
                "slot {index} of heap `{}` is already written",
                self.label
            )));
        }
        *slot = Some(descriptor);
        Ok(handle)
    }

    /// The descriptor a handle points at.
    pub fn resolve(&self, handle: DescriptorHandle) -> GpuResult<Descriptor> {
        let out_of_heap = || {
            GpuError::InvalidCall(format!("handle {:#x} is not a slot of heap `{}`", handle.ptr, self.label))
        };
        let distance = handle.ptr.checked_sub(self.start.ptr).ok_or_else(out_of_heap)?;
        if distance % self.increment as u64 != 0 {
            return Err(out_of_heap());
        }
        let index = distance / self.increment as u64;
        if index >= self.capacity() as u64 {
            return Err(GpuError::DescriptorOutOfRange { index: index as u32, capacity: self.capacity() });
        }
        self.slots[index as usize].ok_or_else(|| {
            GpuError::InvalidCall(format!("slot {index} of heap `{}` was never written", self.label))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceContext, GpuInit};
    use crate::hal::soft::SoftBackend;

    fn device() -> Arc<Device> {
        DeviceContext::new(Box::new(SoftBackend::default()), &GpuInit::default())
            .unwrap()
            .device()
            .clone()
    }

    #[test]
    fn handles_are_start_plus_index_times_increment() {
        let device = device();
        let heap = DescriptorHeap::new(&device, "rtv", DescriptorKind::RenderTarget, 2).unwrap();
        let inc = device.descriptor_increment(DescriptorKind::RenderTarget);
        assert_eq!(heap.handle(1).unwrap().ptr, heap.start().ptr + inc as u64);
        assert!(matches!(
            heap.handle(2),
            Err(GpuError::DescriptorOutOfRange { index: 2, capacity: 2 })
        ));
    }

    #[test]
    fn written_views_resolve_from_their_handle() {
        let device = device();
        let mut heap = DescriptorHeap::new(&device, "rtv", DescriptorKind::RenderTarget, 2).unwrap();
        let id = ResourceId(42);
        let handle = heap.write(1, Descriptor::RenderTargetView(id)).unwrap();
        assert_eq!(heap.resolve(handle).unwrap(), Descriptor::RenderTargetView(id));
        assert!(heap.resolve(heap.handle(0).unwrap()).is_err());
    }

    #[test]
    fn slots_are_written_once_and_kind_checked() {
        let device = device();
        let mut heap = DescriptorHeap::new(&device, "srv", DescriptorKind::ShaderResource, 1).unwrap();
        assert!(heap.write(0, Descriptor::RenderTargetView(ResourceId(1))).is_err());
        heap.write(0, Descriptor::ShaderResourceView(ResourceId(1))).unwrap();
        assert!(heap.write(0, Descriptor::ShaderResourceView(ResourceId(2))).is_err());
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let device = device();
        let a = DescriptorHeap::new(&device, "a", DescriptorKind::RenderTarget, 1).unwrap();
        let b = DescriptorHeap::new(&device, "b", DescriptorKind::RenderTarget, 1).unwrap();
        assert!(a.resolve(b.start()).is_err());
        assert!(DescriptorHeap::new(&device, "empty", DescriptorKind::RenderTarget, 0).is_err());
    }
}
