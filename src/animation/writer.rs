//! Streaming writer for animation files.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::frame::{Frame, Shape};

/// Writes frames as a JSON array `[frame][x][y][z]`, one frame per line.
///
/// Usage:
/// ```ignore
/// let mut writer = AnimationWriter::create("animation.json")?;
/// for frame in &frames {
///     writer.write_frame(frame)?;
/// }
/// let stats = writer.finalize()?;
/// ```
pub struct AnimationWriter<W: Write> {
    writer: W,
    shape: Option<Shape>,
    frames_written: u64,
    bytes_written: u64,
}

impl AnimationWriter<BufWriter<File>> {
    /// Create (or truncate) an animation file.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> AnimationWriter<W> {
    /// Start an animation on `writer`, emitting the opening bracket.
    pub fn new(mut writer: W) -> io::Result<Self> {
        writer.write_all(b"[")?;
        Ok(Self {
            writer,
            shape: None,
            frames_written: 0,
            bytes_written: 1,
        })
    }

    /// Append one frame.
    ///
    /// All frames must share the shape of the first one.
    pub fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let expected = *self.shape.get_or_insert(frame.shape());
        if frame.shape() != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Frame shape {:?} does not match animation shape {:?}",
                    frame.shape(),
                    expected
                ),
            ));
        }

        let encoded = serde_json::to_vec(frame)?;
        if self.frames_written > 0 {
            self.writer.write_all(b",")?;
            self.bytes_written += 1;
        }
        self.writer.write_all(b"\n")?;
        self.writer.write_all(&encoded)?;
        self.bytes_written += 1 + encoded.len() as u64;
        self.frames_written += 1;
        Ok(())
    }

    /// Get number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Close the array and flush.
    pub fn finalize(mut self) -> io::Result<AnimationStats> {
        self.writer.write_all(b"\n]\n")?;
        self.writer.flush()?;
        self.bytes_written += 3;

        Ok(AnimationStats {
            frame_count: self.frames_written,
            total_bytes: self.bytes_written,
            shape: self.shape,
        })
    }
}

/// Statistics from a writing session.
#[derive(Debug, Clone)]
pub struct AnimationStats {
    /// Total frames written.
    pub frame_count: u64,
    /// Total output size in bytes.
    pub total_bytes: u64,
    /// Shape shared by all frames (None if nothing was written).
    pub shape: Option<Shape>,
}

impl std::fmt::Display for AnimationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} frames, {} bytes", self.frame_count, self.total_bytes)?;
        if let Some((w, h, d)) = self.shape {
            write!(f, " ({w}x{h}x{d})")?;
        }
        Ok(())
    }
}
