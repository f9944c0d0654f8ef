//! Configuration types for the physical cube rig.

use serde::{Deserialize, Serialize};

use crate::compute::Winding;

/// Default global brightness (0-255).
fn default_brightness() -> u8 {
    64
}

/// Default target frame rate (frames per second).
fn default_frame_rate() -> u32 {
    4
}

/// Default WS281x data rate in Hz.
fn default_frequency() -> u32 {
    800_000
}

/// Top-level cube configuration.
///
/// Everything here is fixed for a given physical rig; the defaults describe
/// the 8x8x8 cube wired as two strips of 256 LEDs each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeConfig {
    /// Cube width in LEDs (X dimension).
    pub width: usize,
    /// Cube height in LEDs (Y dimension, vertical).
    pub height: usize,
    /// Cube depth in LEDs (Z dimension).
    pub depth: usize,
    /// LEDs driven by each channel.
    pub leds_per_channel: usize,
    /// Physical channels, in wiring order (bottom first).
    pub channels: Vec<ChannelConfig>,
    /// Global brightness applied by the hardware back end (0-255).
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    /// Strip data rate in Hz.
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    /// Target frame rate of the render loop.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// How the strip winds through the cube.
    #[serde(default)]
    pub winding: Winding,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            width: 8,
            height: 8,
            depth: 8,
            leds_per_channel: 8 * 8 * 8 / 2,
            channels: vec![
                ChannelConfig {
                    gpio_pin: 18,
                    device: "/dev/ledcube0".to_string(),
                },
                ChannelConfig {
                    gpio_pin: 19,
                    device: "/dev/ledcube1".to_string(),
                },
            ],
            brightness: default_brightness(),
            frequency: default_frequency(),
            frame_rate: default_frame_rate(),
            winding: Winding::default(),
        }
    }
}

/// Configuration for one independently driven LED run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// GPIO pin carrying the channel's data line.
    pub gpio_pin: u8,
    /// Device node the channel's packets are written to.
    pub device: String,
}

/// Geometry consumed by the coordinate remapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeGeometry {
    /// Cube width (X).
    pub width: usize,
    /// Cube height (Y).
    pub height: usize,
    /// Cube depth (Z).
    pub depth: usize,
    /// Number of physical channels.
    pub channels: usize,
    /// LEDs per channel.
    pub leds_per_channel: usize,
}

impl CubeGeometry {
    /// Geometry with the LED count split evenly across `channels`.
    ///
    /// Returns `None` when the cube does not divide evenly.
    pub fn split(width: usize, height: usize, depth: usize, channels: usize) -> Option<Self> {
        let total = width * height * depth;
        if channels == 0 || total % channels != 0 {
            return None;
        }
        Some(Self {
            width,
            height,
            depth,
            channels,
            leds_per_channel: total / channels,
        })
    }

    /// Total number of cells in the cube (width * height * depth).
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Total number of physical LEDs across all channels.
    #[inline]
    pub fn led_count(&self) -> usize {
        self.channels * self.leds_per_channel
    }

    /// Cube shape as `(width, height, depth)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }
}

impl CubeConfig {
    /// Geometry view of this configuration.
    pub fn geometry(&self) -> CubeGeometry {
        CubeGeometry {
            width: self.width,
            height: self.height,
            depth: self.depth,
            channels: self.channels.len(),
            leds_per_channel: self.leds_per_channel,
        }
    }

    /// Number of cube cells (width * height * depth).
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.channels.is_empty() {
            return Err(ConfigError::InvalidChannels);
        }
        let wired = self.channels.len() * self.leds_per_channel;
        if wired != self.cell_count() {
            return Err(ConfigError::LedCountMismatch {
                wired,
                cells: self.cell_count(),
            });
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if let Some(j) = self.channels[..i]
                .iter()
                .position(|other| other.gpio_pin == channel.gpio_pin)
            {
                return Err(ConfigError::SharedPin {
                    first: j,
                    second: i,
                    pin: channel.gpio_pin,
                });
            }
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.frequency == 0 {
            return Err(ConfigError::InvalidFrequency);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cube dimensions (width, height, depth) must be non-zero")]
    InvalidDimensions,
    #[error("At least one channel must be configured")]
    InvalidChannels,
    #[error("Channels drive {wired} LEDs but the cube has {cells} cells")]
    LedCountMismatch { wired: usize, cells: usize },
    #[error("Channels {first} and {second} share GPIO pin {pin}")]
    SharedPin { first: usize, second: usize, pin: u8 },
    #[error("Frame rate must be positive")]
    InvalidFrameRate,
    #[error("Frequency must be positive")]
    InvalidFrequency,
}
