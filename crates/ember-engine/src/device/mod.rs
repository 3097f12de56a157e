//! Device context: adapter selection, the logical device and its queue.
//!
//! This module is responsible for:
//! - picking an adapter according to [`GpuInit`]
//! - opening the device and its single direct queue
//! - tracking every device resource and its committed state

mod adapter;
mod context;
mod init;

pub use adapter::select_adapter;
pub use context::{create_device, create_queue, CommandQueue, Device, DeviceContext, GpuResource};
pub use init::GpuInit;
