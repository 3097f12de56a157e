//! Ember engine crate.
//!
//! Explicit frame submission on top of a small hardware abstraction: a device
//! context, a flip-model swap chain, validated command recording, one-shot
//! uploads and fence-based CPU/GPU synchronization. The window, input, timing
//! and logging modules are the thin platform layer around it.

pub mod hal;

pub mod command;
pub mod device;
pub mod present;
pub mod renderer;
pub mod sync;
pub mod upload;

pub mod input;
pub mod logging;
pub mod time;
pub mod window;
