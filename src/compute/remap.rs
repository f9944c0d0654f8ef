//! Coordinate remapping from cube space to physical strip order.
//!
//! This is the only place that knows how the LED strip is wound through the
//! cube. The strip runs layer by layer from the bottom (`y = 0`) to the top.
//! Within a layer it runs row by row along `z`, and each row runs along `x`.
//! The resulting global strip position is cut into equal consecutive runs,
//! one per channel, so channel 0 holds the bottom layers and the last
//! channel holds the top layers.
//!
//! Frames are addressed `[x][y][z]` (see [`Frame`]).

use serde::{Deserialize, Serialize};

use crate::animation::{Frame, Shape};
use crate::schema::CubeGeometry;

/// Strip winding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winding {
    /// Every row starts at `x = 0` and every layer at `z = 0`.
    Straight,
    /// Boustrophedon: rows alternate direction and so do layers, so the
    /// strip never jumps back across the cube.
    #[default]
    Serpentine,
}

impl Winding {
    /// Global strip position of `(x, y, z)`.
    #[inline]
    pub fn strip_position(self, shape: Shape, x: usize, y: usize, z: usize) -> usize {
        let (width, _, depth) = shape;
        match self {
            Winding::Straight => (y * depth + z) * width + x,
            Winding::Serpentine => {
                // Odd layers walk their rows back towards z = 0.
                let row_in_layer = if y % 2 == 0 { z } else { depth - 1 - z };
                let row = y * depth + row_in_layer;
                // Odd rows (counted along the whole strip) run towards x = 0.
                let column = if row % 2 == 0 { x } else { width - 1 - x };
                row * width + column
            }
        }
    }
}

/// Physical location of one LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StripSlot {
    /// Channel index (0 = bottom run).
    pub channel: usize,
    /// Index along the channel's strip.
    pub index: usize,
}

/// Precomputed mapping from frame cells to per-channel LED buffers.
#[derive(Debug, Clone)]
pub struct Remapper {
    geometry: CubeGeometry,
    winding: Winding,
    /// Global strip position for each cell, in frame (`[x][y][z]`) order.
    positions: Vec<usize>,
}

impl Remapper {
    /// Build the lookup table for `geometry`.
    pub fn new(geometry: CubeGeometry, winding: Winding) -> Result<Self, RemapError> {
        if geometry.cell_count() == 0 || geometry.channels == 0 {
            return Err(RemapError::EmptyGeometry);
        }
        if geometry.led_count() != geometry.cell_count() {
            return Err(RemapError::LedCount {
                leds: geometry.led_count(),
                cells: geometry.cell_count(),
            });
        }

        let shape = geometry.shape();
        let mut positions = Vec::with_capacity(geometry.cell_count());
        for x in 0..geometry.width {
            for y in 0..geometry.height {
                for z in 0..geometry.depth {
                    positions.push(winding.strip_position(shape, x, y, z));
                }
            }
        }

        Ok(Self {
            geometry,
            winding,
            positions,
        })
    }

    /// Geometry this remapper was built for.
    pub fn geometry(&self) -> &CubeGeometry {
        &self.geometry
    }

    /// Winding scheme in use.
    pub fn winding(&self) -> Winding {
        self.winding
    }

    /// Physical slot of cube cell `(x, y, z)`.
    pub fn slot(&self, x: usize, y: usize, z: usize) -> StripSlot {
        let (_, height, depth) = self.geometry.shape();
        let position = self.positions[(x * height + y) * depth + z];
        StripSlot {
            channel: position / self.geometry.leds_per_channel,
            index: position % self.geometry.leds_per_channel,
        }
    }

    /// Allocate zeroed per-channel buffers of the right size.
    pub fn buffers(&self) -> Vec<Vec<u32>> {
        vec![vec![0; self.geometry.leds_per_channel]; self.geometry.channels]
    }

    /// Remap `frame` into freshly allocated channel buffers.
    pub fn remap(&self, frame: &Frame) -> Result<Vec<Vec<u32>>, RemapError> {
        let mut buffers = self.buffers();
        self.remap_into(frame, &mut buffers)?;
        Ok(buffers)
    }

    /// Remap `frame` into existing channel buffers, resizing them if needed.
    ///
    /// Every slot of every buffer is written exactly once.
    pub fn remap_into(&self, frame: &Frame, buffers: &mut Vec<Vec<u32>>) -> Result<(), RemapError> {
        if frame.shape() != self.geometry.shape() {
            return Err(RemapError::ShapeMismatch {
                frame: frame.shape(),
                cube: self.geometry.shape(),
            });
        }

        let per_channel = self.geometry.leds_per_channel;
        buffers.resize_with(self.geometry.channels, Vec::new);
        for buffer in buffers.iter_mut() {
            buffer.resize(per_channel, 0);
        }

        for (&position, &color) in self.positions.iter().zip(frame.cells()) {
            buffers[position / per_channel][position % per_channel] = color;
        }
        Ok(())
    }
}

/// Remapping errors.
#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("Frame shape {frame:?} does not match cube shape {cube:?}")]
    ShapeMismatch { frame: Shape, cube: Shape },
    #[error("Channels hold {leds} LEDs but the cube has {cells} cells")]
    LedCount { leds: usize, cells: usize },
    #[error("Cube geometry has no cells or no channels")]
    EmptyGeometry,
}
