//! CPU/GPU frame synchronization.

mod synchronizer;

pub use synchronizer::{FrameSynchronizer, Present, SyncMode, SyncStats};
