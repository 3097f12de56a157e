use thiserror::Error;

use super::types::{Access, FeatureLevel, ResourceId, ResourceState};
use crate::command::ListState;

/// Errors raised by the GPU layer.
///
/// Every variant is fatal for the renderer: there is no retry or degraded
/// rendering path. Callers propagate them to the application, which terminates.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No adapter qualified during selection.
    #[error("no {} adapter can create a device at feature level {level}", adapter_kind(.software))]
    NoSuitableAdapter { level: FeatureLevel, software: bool },

    #[error("failed to create device on adapter `{adapter}`: {reason}")]
    DeviceCreation { adapter: String, reason: String },

    /// Creation of a device child object (heap, resource, fence, pipeline...) failed.
    #[error("failed to create {what}: {reason}")]
    Creation { what: &'static str, reason: String },

    /// The device is unusable; every later call fails the same way.
    #[error("device removed: {0}")]
    DeviceRemoved(String),

    /// A call the API contract forbids in the current situation.
    #[error("invalid call: {0}")]
    InvalidCall(String),

    #[error("command list `{label}` is {actual:?}, expected {expected:?}")]
    InvalidListState { label: String, expected: ListState, actual: ListState },

    #[error("command allocator `{label}` is still in use by the GPU (pending fence {pending}, completed {completed})")]
    AllocatorBusy { label: String, pending: u64, completed: u64 },

    #[error("barrier on {resource} declares before-state {declared:?} but the resource is {actual:?}")]
    BarrierMismatch { resource: ResourceId, declared: ResourceState, actual: ResourceState },

    #[error("{resource} is in state {state:?}, which does not permit {access:?}")]
    InvalidResourceAccess { resource: ResourceId, state: ResourceState, access: Access },

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    #[error("{0} is still referenced by GPU work that has not completed")]
    ResourceInUse(ResourceId),

    #[error("descriptor index {index} is out of range for a heap of capacity {capacity}")]
    DescriptorOutOfRange { index: u32, capacity: u32 },

    #[error("mapping {resource} failed: {reason}")]
    Map { resource: ResourceId, reason: String },
}

pub type GpuResult<T> = Result<T, GpuError>;

fn adapter_kind(software: &bool) -> &'static str {
    if *software { "software" } else { "hardware" }
}
