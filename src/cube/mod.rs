//! Output back ends.
//!
//! A [`Cube`] accepts frames, stages them in whatever form its output needs,
//! and flushes them on [`render`](Cube::render). Two back ends exist:
//!
//! - [`HardwareCube`]: remaps frames onto the physical strip channels and
//!   transmits every channel in parallel.
//! - [`SimulatorCube`]: keeps a 3D LED model and draws it through a
//!   [`Viewport`] for development preview.
//!
//! Each back end decides for itself which of its errors are recoverable.

mod hardware;
mod simulator;

pub use hardware::{ChannelFailure, DeviceStrip, DriverError, HardwareCube, StripDriver};
pub use simulator::{
    Camera, Led, LedModel, SimulatorContext, SimulatorCube, TerminalViewport, Viewport,
    ViewportError, project,
};

use crate::animation::Frame;
use crate::compute::RemapError;

/// Uniform interface over output back ends.
pub trait Cube {
    /// Stage `frame` for the next render.
    fn set_leds(&mut self, frame: &Frame) -> Result<(), CubeError>;

    /// Flush the staged state to the output.
    ///
    /// Rendering again without an intervening [`set_leds`](Self::set_leds)
    /// repeats the last staged state.
    fn render(&mut self) -> Result<(), CubeError>;

    /// Release owned resources. Teardown failures are logged, not returned.
    fn finish(self: Box<Self>);

    /// Whether the render loop may keep going after `error`.
    fn is_recoverable(&self, error: &CubeError) -> bool;
}

/// Back-end errors.
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("Cannot map frame onto cube: {0}")]
    Remap(#[from] RemapError),
    #[error("Transmission failed on {}", describe_failures(.0))]
    Channels(Vec<ChannelFailure>),
    #[error("Strip driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("Viewport error: {0}")]
    Viewport(ViewportError),
    #[error("Shutdown requested by the viewer")]
    ShutdownRequested,
    #[error("Invalid cube configuration: {0}")]
    Config(#[from] crate::schema::ConfigError),
}

impl From<ViewportError> for CubeError {
    fn from(error: ViewportError) -> Self {
        match error {
            ViewportError::Closed => CubeError::ShutdownRequested,
            other => CubeError::Viewport(other),
        }
    }
}

fn describe_failures(failures: &[ChannelFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
