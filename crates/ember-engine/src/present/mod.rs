//! Presentation surface and per-frame views.

mod descriptor_heap;
mod frame_resources;
mod swap_chain;

pub use descriptor_heap::{Descriptor, DescriptorHandle, DescriptorHeap};
pub use frame_resources::FrameResources;
pub use swap_chain::{BackBuffer, SwapChain, BACK_BUFFER_FORMAT, BUFFER_COUNT};
