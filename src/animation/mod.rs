//! Animation decoding, replay and writing.
//!
//! An animation file is a single JSON array. Each element is one frame: a
//! 3-level nested array `[x][y][z]` of packed `0xRRGGBB` colors, and every
//! frame in a file shares the same shape.
//!
//! ```text
//! [
//!   [[[0xff0000, ...], ...], ...],   <- frame 0, indexed [x][y][z]
//!   [[[0x00ff00, ...], ...], ...],   <- frame 1
//!   ...
//! ]
//! ```
//!
//! [`JsonFrameSource`] decodes this format incrementally on a background
//! thread, and [`AnimationWriter`] produces it.

mod frame;
mod source;
mod writer;

pub use frame::{Frame, FrameError, Shape};
pub use source::{ErrorSignal, FrameSource, JsonFrameSource, QUEUE_CAPACITY, SourceError};
pub use writer::{AnimationStats, AnimationWriter};
