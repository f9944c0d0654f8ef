//! Procedural animation patterns.
//!
//! A [`Pattern`] is a small serde description of an animation that can be
//! expanded into frames and written out in the playback file format.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::animation::{Frame, Shape};
use crate::compute::pack;

/// Cube axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    X,
    Y,
    Z,
}

impl Axis {
    /// Number of cells along this axis.
    pub fn extent(self, shape: Shape) -> usize {
        match self {
            Axis::X => shape.0,
            Axis::Y => shape.1,
            Axis::Z => shape.2,
        }
    }

    /// Coordinate of `(x, y, z)` along this axis.
    #[inline]
    pub fn coordinate(self, x: usize, y: usize, z: usize) -> usize {
        match self {
            Axis::X => x,
            Axis::Y => y,
            Axis::Z => z,
        }
    }
}

fn default_frames() -> usize {
    1
}

fn default_density() -> f32 {
    0.1
}

fn default_layer_colors() -> Vec<u32> {
    vec![pack(255, 0, 0), pack(0, 255, 0), pack(0, 0, 255)]
}

/// Predefined animations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Pattern {
    /// Every LED the same color.
    Solid {
        /// Packed `0xRRGGBB` color.
        color: u32,
        /// Number of identical frames.
        #[serde(default = "default_frames")]
        frames: usize,
    },
    /// Red, green and blue planes moving along `axis`, one step per frame.
    PlaneSweep {
        #[serde(default)]
        axis: Axis,
    },
    /// One horizontal layer lit per frame, bottom to top, cycling `colors`.
    LayerCycle {
        #[serde(default = "default_layer_colors")]
        colors: Vec<u32>,
    },
    /// Random colors on a random subset of LEDs.
    Sparkle {
        /// Probability of an LED being lit, 0.0-1.0.
        #[serde(default = "default_density")]
        density: f32,
        /// Random seed.
        seed: u64,
        /// Number of frames.
        frames: usize,
    },
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::PlaneSweep { axis: Axis::X }
    }
}

impl Pattern {
    /// Number of frames this pattern produces for `shape`.
    pub fn frame_count(&self, shape: Shape) -> usize {
        match self {
            Pattern::Solid { frames, .. } | Pattern::Sparkle { frames, .. } => *frames,
            // The sweep ends when the red plane reaches the far side.
            Pattern::PlaneSweep { axis } => axis.extent(shape),
            Pattern::LayerCycle { .. } => shape.1,
        }
    }

    /// Frame `index` of the animation.
    pub fn frame(&self, shape: Shape, index: usize) -> Frame {
        match self {
            Pattern::Solid { color, .. } => Frame::from_fn(shape, |_, _, _| *color),
            Pattern::PlaneSweep { axis } => Frame::from_fn(shape, |x, y, z| {
                match axis.coordinate(x, y, z).checked_sub(index) {
                    Some(0) => pack(255, 0, 0),
                    Some(1) => pack(0, 255, 0),
                    Some(2) => pack(0, 0, 255),
                    _ => 0,
                }
            }),
            Pattern::LayerCycle { colors } => {
                let color = if colors.is_empty() {
                    pack(255, 255, 255)
                } else {
                    colors[index % colors.len()]
                };
                Frame::from_fn(shape, |_, y, _| if y == index { color } else { 0 })
            }
            Pattern::Sparkle { density, seed, .. } => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
                let density = f64::from(density.clamp(0.0, 1.0));
                Frame::from_fn(shape, |_, _, _| {
                    if rng.gen_bool(density) {
                        rng.gen_range(1..=0xFF_FFFF)
                    } else {
                        0
                    }
                })
            }
        }
    }

    /// Every frame of the animation, in order.
    ///
    /// Frames are independent, so they are built in parallel.
    pub fn frames(&self, shape: Shape) -> Vec<Frame> {
        (0..self.frame_count(shape))
            .into_par_iter()
            .map(|index| self.frame(shape, index))
            .collect()
    }
}
