//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and Window and drives the renderer from it.
//! `headless` runs the same renderer without a window.

pub mod headless;
mod runtime;

pub use runtime::{create_backend, BackendKind, Runtime, RuntimeConfig};
