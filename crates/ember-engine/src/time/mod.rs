//! Frame timing for the title-bar readout.
//!
//! Independent of the renderer: it only needs to be ticked once per frame.

mod fps;

pub use fps::{format_title, FpsCounter};
