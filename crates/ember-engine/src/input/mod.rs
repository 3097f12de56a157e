//! Input subsystem.
//!
//! Public API is platform-agnostic; `translate_window_event` is the only
//! place that sees winit types.

mod state;
mod types;
mod platform;

pub use platform::translate_window_event;
pub use state::InputState;
pub use types::{InputEvent, Key, KeyState};
