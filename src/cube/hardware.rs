//! Physical cube driven over two (or more) WS281x strip channels.
//!
//! Frames are remapped into per-channel buffers by [`Remapper`] and every
//! channel is transmitted on its own scoped thread, so a slow strip does not
//! hold up the others.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{Cube, CubeError};
use crate::animation::Frame;
use crate::compute::{Remapper, encode_grb};
use crate::schema::{ChannelConfig, CubeConfig};

/// Transmits one channel's LED buffer to the strip.
///
/// Implementations wrap whatever actually toggles the data pin. A call may
/// block until the whole buffer has been clocked out.
pub trait StripDriver: Send {
    /// Send `leds` (packed `0xRRGGBB`, strip order) to the strip.
    fn transmit(&mut self, leds: &[u32]) -> Result<(), DriverError>;

    /// Release the underlying device.
    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Strip driver errors.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("I/O error on {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("Strip holds {expected} LEDs, got a buffer of {actual}")]
    Length { expected: usize, actual: usize },
    #[error("Adalight frames carry 1 to {max} LEDs, got {count}", max = DeviceStrip::MAX_LEDS)]
    StripSize { count: usize },
    #[error("Strip is closed")]
    Closed,
    #[error("Transmission thread panicked")]
    Panicked,
}

impl DriverError {
    /// Transient failures may succeed on the next frame.
    pub fn is_transient(&self) -> bool {
        match self {
            DriverError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            DriverError::Length { .. }
            | DriverError::StripSize { .. }
            | DriverError::Closed
            | DriverError::Panicked => false,
        }
    }
}

/// One channel's transmission failure.
#[derive(Debug)]
pub struct ChannelFailure {
    /// Channel index (0 = bottom run).
    pub channel: usize,
    /// GPIO pin of the channel.
    pub gpio_pin: u8,
    /// What went wrong.
    pub error: DriverError,
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel {} (GPIO {}): {}",
            self.channel, self.gpio_pin, self.error
        )
    }
}

/// Strip driver writing Adalight-framed GRB packets to a device node.
///
/// Packet layout:
///
/// ```text
///   'A' 'd' 'a'
///   (LED count - 1) high byte, low byte
///   checksum (high ^ low ^ 0x55)
///   GRB bytes, brightness scaled, 3 per LED
/// ```
///
/// A new packet is not written until the previous one has had time to clock
/// out of the strip at the configured data rate.
pub struct DeviceStrip {
    device: String,
    file: Option<File>,
    led_count: usize,
    brightness: u8,
    frame_time: Duration,
    ready_at: Option<Instant>,
    /// Pre-allocated packet buffer.
    packet: Vec<u8>,
    /// Pre-allocated wire-format buffer.
    wire: Vec<u8>,
}

impl DeviceStrip {
    /// Size of the Adalight header in bytes.
    pub const HEADER_SIZE: usize = 6;

    /// Largest strip a 16-bit Adalight count can address.
    pub const MAX_LEDS: usize = 1 << 16;

    /// Low time that latches a WS281x strip.
    pub const LATCH: Duration = Duration::from_micros(50);

    /// Time to clock `led_count` LEDs (24 bits each) out at `frequency` Hz,
    /// latch included.
    pub fn wire_time(led_count: usize, frequency: u32) -> Duration {
        let bits = led_count as u64 * 24;
        Duration::from_nanos(bits * 1_000_000_000 / u64::from(frequency.max(1))) + Self::LATCH
    }

    /// Open the channel's device node for writing.
    pub fn open(
        channel: &ChannelConfig,
        led_count: usize,
        brightness: u8,
        frequency: u32,
    ) -> Result<Self, DriverError> {
        if led_count == 0 || led_count > Self::MAX_LEDS {
            return Err(DriverError::StripSize { count: led_count });
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&channel.device)
            .map_err(|source| DriverError::Io {
                device: channel.device.clone(),
                source,
            })?;
        let frame_time = Self::wire_time(led_count, frequency);
        debug!(
            "Opened {} for GPIO {} ({} LEDs, {:?} per frame)",
            channel.device, channel.gpio_pin, led_count, frame_time
        );

        Ok(Self {
            device: channel.device.clone(),
            file: Some(file),
            led_count,
            brightness,
            frame_time,
            ready_at: None,
            packet: Vec::with_capacity(Self::HEADER_SIZE + led_count * 3),
            wire: Vec::with_capacity(led_count * 3),
        })
    }

    /// Minimum time between two packets.
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Build the packet for `leds` into the internal buffer.
    ///
    /// `leds` holds between 1 and [`MAX_LEDS`](Self::MAX_LEDS) entries.
    fn build_packet(&mut self, leds: &[u32]) {
        encode_grb(leds, self.brightness, &mut self.wire);

        let count = leds.len() - 1;
        let count_hi = (count >> 8) as u8;
        let count_lo = count as u8;
        self.packet.clear();
        self.packet.extend_from_slice(b"Ada");
        self.packet.push(count_hi);
        self.packet.push(count_lo);
        self.packet.push(count_hi ^ count_lo ^ 0x55);
        self.packet.extend_from_slice(&self.wire);
    }
}

impl StripDriver for DeviceStrip {
    fn transmit(&mut self, leds: &[u32]) -> Result<(), DriverError> {
        if leds.len() != self.led_count {
            return Err(DriverError::Length {
                expected: self.led_count,
                actual: leds.len(),
            });
        }
        if self.file.is_none() {
            return Err(DriverError::Closed);
        }

        if let Some(ready_at) = self.ready_at
            && let Some(wait) = ready_at.checked_duration_since(Instant::now())
        {
            thread::sleep(wait);
        }

        self.build_packet(leds);
        let Self {
            device,
            file,
            packet,
            frame_time,
            ready_at,
            ..
        } = self;
        let to_driver_error = |source| DriverError::Io {
            device: device.clone(),
            source,
        };
        let file = file.as_mut().ok_or(DriverError::Closed)?;
        file.write_all(packet).map_err(to_driver_error)?;
        file.flush().map_err(to_driver_error)?;
        *ready_at = Some(Instant::now() + *frame_time);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.file.take() {
            Some(file) => file.sync_all().map_err(|source| DriverError::Io {
                device: self.device.clone(),
                source,
            }),
            None => Err(DriverError::Closed),
        }
    }
}

/// A strip channel owned by the cube.
struct Channel {
    config: ChannelConfig,
    driver: Box<dyn StripDriver>,
}

/// Cube back end driving physical LED strips.
pub struct HardwareCube {
    remapper: Remapper,
    channels: Vec<Channel>,
    /// Staged per-channel buffers in strip order.
    staged: Vec<Vec<u32>>,
}

impl HardwareCube {
    /// Open every configured channel's device.
    pub fn open(config: &CubeConfig) -> Result<Self, CubeError> {
        config.validate()?;
        let drivers = config
            .channels
            .iter()
            .map(|channel| {
                DeviceStrip::open(
                    channel,
                    config.leds_per_channel,
                    config.brightness,
                    config.frequency,
                )
                    .map(|strip| Box::new(strip) as Box<dyn StripDriver>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Hardware cube {}x{}x{} on {} channel(s) at {} Hz",
            config.width,
            config.height,
            config.depth,
            config.channels.len(),
            config.frequency
        );
        Self::with_drivers(config, drivers)
    }

    /// Build a cube from already opened drivers, one per configured channel.
    pub fn with_drivers(
        config: &CubeConfig,
        drivers: Vec<Box<dyn StripDriver>>,
    ) -> Result<Self, CubeError> {
        config.validate()?;
        if drivers.len() != config.channels.len() {
            return Err(CubeError::Config(crate::schema::ConfigError::InvalidChannels));
        }

        let remapper = Remapper::new(config.geometry(), config.winding)?;
        debug!("Remapping with {:?} winding", remapper.winding());
        let staged = remapper.buffers();
        let channels = config
            .channels
            .iter()
            .cloned()
            .zip(drivers)
            .map(|(config, driver)| Channel { config, driver })
            .collect();

        Ok(Self {
            remapper,
            channels,
            staged,
        })
    }
}

impl Cube for HardwareCube {
    fn set_leds(&mut self, frame: &Frame) -> Result<(), CubeError> {
        self.remapper.remap_into(frame, &mut self.staged)?;
        Ok(())
    }

    fn render(&mut self) -> Result<(), CubeError> {
        let staged = &self.staged;
        let channels = &mut self.channels;

        // Each channel transmits on its own thread; every result is awaited
        // before returning so no failure is lost.
        let failures: Vec<ChannelFailure> = thread::scope(|scope| {
            let pending: Vec<_> = channels
                .iter_mut()
                .zip(staged)
                .enumerate()
                .map(|(index, (channel, leds))| {
                    let gpio_pin = channel.config.gpio_pin;
                    let driver = &mut channel.driver;
                    (index, gpio_pin, scope.spawn(move || driver.transmit(leds)))
                })
                .collect();

            pending
                .into_iter()
                .filter_map(|(channel, gpio_pin, handle)| {
                    let result = handle.join().unwrap_or(Err(DriverError::Panicked));
                    result.err().map(|error| ChannelFailure {
                        channel,
                        gpio_pin,
                        error,
                    })
                })
                .collect()
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CubeError::Channels(failures))
        }
    }

    fn finish(mut self: Box<Self>) {
        for (index, channel) in self.channels.iter_mut().enumerate() {
            if let Err(e) = channel.driver.close() {
                warn!(
                    "Failed to close channel {index} (GPIO {}): {e}",
                    channel.config.gpio_pin
                );
            }
        }
        info!("Hardware cube released");
    }

    fn is_recoverable(&self, error: &CubeError) -> bool {
        match error {
            CubeError::Channels(failures) => failures.iter().all(|f| f.error.is_transient()),
            _ => false,
        }
    }
}
