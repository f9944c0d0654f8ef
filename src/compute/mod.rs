//! Compute module - Pure per-frame transforms between cube space and strip space.

mod color;
mod remap;

pub use color::*;
pub use remap::*;
