//! Command recording: allocators, validated command lists and the per-frame
//! recorder.

mod list;
mod recorder;

pub use list::{CommandAllocator, CommandList, ListState};
pub use recorder::{CommandRecorder, FrameInputs};
