//! Schema module - Configuration and pattern types for the LED cube.

mod config;
mod pattern;

pub use config::*;
pub use pattern::*;
