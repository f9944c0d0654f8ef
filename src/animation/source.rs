//! Streaming frame sources.
//!
//! [`JsonFrameSource`] decodes a JSON array of frames on a background
//! thread and hands each frame over a bounded queue as soon as it is parsed.
//! Every frame handed over is retained; once the queue closes the retained
//! animation is replayed in a loop. Decode failures travel out of band
//! through an [`ErrorSignal`] that the consumer polls.

use std::fmt;
use std::io::{self, BufRead, Read};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvError, Sender, TryRecvError, bounded};
use log::{debug, info, warn};
use serde::de::{self, DeserializeSeed, SeqAccess, Visitor};

use super::frame::{Frame, Shape};

/// Capacity of the decode-to-consumer hand-off queue.
pub const QUEUE_CAPACITY: usize = 32;

/// Anything that yields an endless sequence of frames.
pub trait FrameSource {
    /// Next frame in playback order.
    fn next_frame(&mut self) -> Result<Frame, SourceError>;

    /// Human-readable name used in diagnostics.
    fn description(&self) -> &str;
}

/// Frame source decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error while reading frames: {0}")]
    Io(#[from] io::Error),
    #[error("Expected a JSON array, found {found}")]
    NotAnArray { found: String },
    #[error("Frame {index} is invalid: {source}")]
    Json {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Frame {index} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: Shape,
        actual: Shape,
    },
    #[error("Animation contains no frames")]
    NoFrames,
    #[error("Failed to start decoder thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Out-of-band channel carrying the first fatal decode error.
///
/// Polling is non-blocking. Once an error has been observed it is latched,
/// so every later poll reports it again.
pub struct ErrorSignal {
    rx: Receiver<SourceError>,
    latched: Option<SourceError>,
}

impl ErrorSignal {
    fn new() -> (Sender<SourceError>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { rx, latched: None })
    }

    fn failed(error: SourceError) -> Self {
        let (_, rx) = bounded(0);
        Self {
            rx,
            latched: Some(error),
        }
    }

    /// Pending or previously observed error, if any.
    pub fn poll(&mut self) -> Option<&SourceError> {
        if self.latched.is_none() {
            match self.rx.try_recv() {
                Ok(error) => self.latched = Some(error),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }
        }
        self.latched.as_ref()
    }

    /// Take ownership of the error, leaving the signal empty.
    pub fn take(&mut self) -> Option<SourceError> {
        self.poll();
        self.latched.take()
    }
}

impl fmt::Debug for ErrorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSignal")
            .field("latched", &self.latched)
            .finish_non_exhaustive()
    }
}

/// Frame source backed by a JSON array `[frame][x][y][z]` of packed colors.
pub struct JsonFrameSource {
    description: String,
    queue: Option<Receiver<Frame>>,
    decoder: Option<JoinHandle<()>>,
    animation: Vec<Frame>,
    shape: Option<Shape>,
    replay_index: usize,
}

impl JsonFrameSource {
    /// Validate the opening `[` and start decoding in the background.
    ///
    /// The error signal is always returned. When the stream cannot be read
    /// or does not start with an array, the signal already carries the
    /// error and no source is produced.
    pub fn open<R>(description: impl Into<String>, mut reader: R) -> (Option<Self>, ErrorSignal)
    where
        R: BufRead + Send + 'static,
    {
        let description = description.into();
        if let Err(e) = expect_array(&mut reader) {
            return (None, ErrorSignal::failed(e));
        }

        let (error_tx, signal) = ErrorSignal::new();
        let (frame_tx, frame_rx) = bounded(QUEUE_CAPACITY);

        let spawned = thread::Builder::new()
            .name("frame-decoder".to_string())
            .spawn({
                let description = description.clone();
                move || decode_frames(&description, reader, &frame_tx, &error_tx)
            });
        let decoder = match spawned {
            Ok(handle) => handle,
            Err(e) => return (None, ErrorSignal::failed(SourceError::Spawn(e))),
        };

        info!("Decoding animation from {description}");
        let source = Self {
            description,
            queue: Some(frame_rx),
            decoder: Some(decoder),
            animation: Vec::new(),
            shape: None,
            replay_index: 0,
        };
        (Some(source), signal)
    }

    /// Number of frames handed to the consumer so far.
    pub fn frames_decoded(&self) -> usize {
        self.animation.len()
    }

    /// True once the queue has closed and frames come from the retained animation.
    pub fn is_replaying(&self) -> bool {
        self.queue.is_none()
    }

    /// Shape shared by every frame, once the first frame has arrived.
    pub fn shape(&self) -> Option<Shape> {
        self.shape
    }

    /// Frames retained for replay.
    pub fn animation(&self) -> &[Frame] {
        &self.animation
    }

    /// Block until the decoder finishes and every frame has been retained.
    ///
    /// Returns the number of frames in the animation.
    pub fn drain(&mut self) -> usize {
        while let Some(queue) = &self.queue {
            match queue.recv() {
                Ok(frame) => self.retain(frame),
                Err(RecvError) => self.close_queue(),
            }
        }
        self.animation.len()
    }

    fn retain(&mut self, frame: Frame) {
        self.shape.get_or_insert(frame.shape());
        self.animation.push(frame);
    }

    fn close_queue(&mut self) {
        self.queue = None;
        if let Some(decoder) = self.decoder.take()
            && decoder.join().is_err()
        {
            warn!("Decoder thread for {} panicked", self.description);
        }
        info!(
            "Replaying {} frame(s) from {}",
            self.animation.len(),
            self.description
        );
    }

    fn replay(&mut self) -> Result<Frame, SourceError> {
        let frame = self
            .animation
            .get(self.replay_index)
            .cloned()
            .ok_or(SourceError::NoFrames)?;
        self.replay_index = (self.replay_index + 1) % self.animation.len();
        Ok(frame)
    }
}

impl FrameSource for JsonFrameSource {
    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if let Some(queue) = &self.queue {
            match queue.recv() {
                Ok(frame) => {
                    self.retain(frame.clone());
                    return Ok(frame);
                }
                Err(RecvError) => self.close_queue(),
            }
        }
        self.replay()
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for JsonFrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFrameSource")
            .field("description", &self.description)
            .field("frames", &self.animation.len())
            .field("shape", &self.shape)
            .field("replaying", &self.is_replaying())
            .finish()
    }
}

impl fmt::Display for JsonFrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} frame(s) decoded",
            self.description,
            self.animation.len()
        )?;
        if let Some((w, h, d)) = self.shape {
            write!(f, ", {w}x{h}x{d}")?;
        }
        write!(f, ")")
    }
}

/// Skip a leading BOM and whitespace and check that an array follows.
///
/// The opening `[` itself is left in the stream for the decoder.
fn expect_array<R: BufRead>(reader: &mut R) -> Result<(), SourceError> {
    const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
    let mut at_start = true;
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SourceError::Io(e)),
        };
        if buf.is_empty() {
            return Err(SourceError::NotAnArray {
                found: describe(None),
            });
        }
        if at_start && buf.starts_with(&BOM) {
            reader.consume(BOM.len());
            at_start = false;
            continue;
        }
        at_start = false;

        let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        let next = buf.get(skip).copied();
        reader.consume(skip);
        match next {
            Some(b'[') => return Ok(()),
            Some(other) => {
                return Err(SourceError::NotAnArray {
                    found: describe(Some(other)),
                });
            }
            None => {}
        }
    }
}

fn describe(byte: Option<u8>) -> String {
    match byte {
        None => "end of input".to_string(),
        Some(b) if b.is_ascii_graphic() => format!("`{}`", b as char),
        Some(b) => format!("byte 0x{b:02x}"),
    }
}

/// Why the decoder stopped before the end of the array.
enum Halt {
    Failed(SourceError),
    Disconnected,
}

/// Array visitor forwarding each element to the queue as soon as it parses.
struct FrameSink<'a> {
    frames: &'a Sender<Frame>,
    shape: Option<Shape>,
    /// Frames sent so far, which is also the index of the element being parsed.
    sent: usize,
    halt: Option<Halt>,
}

impl<'de> DeserializeSeed<'de> for &mut FrameSink<'_> {
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for &mut FrameSink<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of frames")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while let Some(frame) = seq.next_element::<Frame>()? {
            let expected = *self.shape.get_or_insert(frame.shape());
            if frame.shape() != expected {
                self.halt = Some(Halt::Failed(SourceError::ShapeMismatch {
                    index: self.sent,
                    expected,
                    actual: frame.shape(),
                }));
                return Err(de::Error::custom("frame shape changed"));
            }
            // Blocks while the queue is full; fails only if the consumer is gone.
            if self.frames.send(frame).is_err() {
                self.halt = Some(Halt::Disconnected);
                return Err(de::Error::custom("frame consumer went away"));
            }
            self.sent += 1;
        }
        Ok(())
    }
}

/// Decoder thread body. Dropping `frames` on return closes the queue.
///
/// Running out of input, wherever it happens, ends the animation cleanly.
/// Any other failure is sent once through `errors`.
fn decode_frames<R: Read>(
    description: &str,
    reader: R,
    frames: &Sender<Frame>,
    errors: &Sender<SourceError>,
) {
    let mut sink = FrameSink {
        frames,
        shape: None,
        sent: 0,
        halt: None,
    };
    // Bytes after the closing `]` are never read.
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let outcome = (&mut sink).deserialize(&mut deserializer);
    let sent = sink.sent;

    let error = match (outcome, sink.halt) {
        (_, Some(Halt::Disconnected)) => {
            debug!("Consumer of {description} went away after {sent} frame(s)");
            return;
        }
        (_, Some(Halt::Failed(e))) => e,
        (Ok(()), None) => {
            debug!("Finished decoding {sent} frame(s) from {description}");
            return;
        }
        (Err(e), None) if e.is_eof() => {
            warn!(
                "{description} ended early at line {}, column {}; keeping {sent} complete frame(s)",
                e.line(),
                e.column()
            );
            return;
        }
        (Err(e), None) if e.is_io() => SourceError::Io(e.into()),
        (Err(source), None) => SourceError::Json {
            index: sent,
            source,
        },
    };
    // Capacity 1 and a single send, so this never blocks.
    let _ = errors.send(error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn open_str(input: &'static str) -> (Option<JsonFrameSource>, ErrorSignal) {
        JsonFrameSource::open("test input", Cursor::new(input.as_bytes()))
    }

    fn color_frame(shape: Shape, seed: u32) -> Frame {
        Frame::from_fn(shape, |x, y, z| seed * 1000 + (x * 100 + y * 10 + z) as u32)
    }

    fn animation_json(frames: &[Frame]) -> String {
        serde_json::to_string(frames).unwrap()
    }

    #[test]
    fn test_single_cell_repeats_forever() {
        let (source, mut errors) = open_str("[[[[0]]]]");
        let mut source = source.unwrap();
        for _ in 0..5 {
            let frame = source.next_frame().unwrap();
            assert_eq!(frame.shape(), (1, 1, 1));
            assert_eq!(frame.get(0, 0, 0), 0);
        }
        assert!(errors.poll().is_none());
        assert!(source.is_replaying());
    }

    #[test]
    fn test_replay_wraps_to_first_frame() {
        let frames = [color_frame((2, 2, 2), 1), color_frame((2, 2, 2), 2)];
        let json = animation_json(&frames);
        let (source, mut errors) = JsonFrameSource::open("two frames", Cursor::new(json));
        let mut source = source.unwrap();

        assert_eq!(source.next_frame().unwrap(), frames[0]);
        assert_eq!(source.next_frame().unwrap(), frames[1]);
        assert_eq!(source.next_frame().unwrap(), frames[0]);
        assert_eq!(source.next_frame().unwrap(), frames[1]);
        assert!(errors.poll().is_none());
        assert_eq!(source.frames_decoded(), 2);
    }

    #[test]
    fn test_truncated_stream_replays_complete_frames() {
        let (source, mut errors) = open_str("[[[[1]]], [[[2]]], [[[3");
        let mut source = source.unwrap();
        assert_eq!(source.drain(), 2);
        assert!(errors.poll().is_none());

        let colors: Vec<u32> = (0..5)
            .map(|_| source.next_frame().unwrap().get(0, 0, 0))
            .collect();
        assert_eq!(colors, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_malformed_tail_is_decode_error() {
        for input in ["[[[[1]]], [[[oops", r#"[[[[1]]], {"x": tru"#, "[[[[1]]],]"] {
            let (source, mut errors) = open_str(input);
            let mut source = source.unwrap();
            assert_eq!(source.drain(), 1, "{input}");
            assert!(
                matches!(errors.poll(), Some(SourceError::Json { index: 1, .. })),
                "{input}: {:?}",
                errors.poll()
            );
        }
    }

    #[test]
    fn test_eof_between_elements_is_clean() {
        for input in ["[[[[1]]],", "[[[[1]]]", "[[[[1]]]   "] {
            let (source, mut errors) = open_str(input);
            assert_eq!(source.unwrap().drain(), 1, "{input}");
            assert!(errors.poll().is_none(), "{input}");
        }
    }

    #[test]
    fn test_missing_separator_is_decode_error() {
        let (source, mut errors) = open_str("[[[[1]]] [[[2]]]]");
        assert_eq!(source.unwrap().drain(), 1);
        assert!(matches!(
            errors.poll(),
            Some(SourceError::Json { index: 1, .. })
        ));
    }

    #[test]
    fn test_bytes_after_array_are_ignored() {
        let (source, mut errors) = open_str("[[[[1]]]] trailing garbage {");
        assert_eq!(source.unwrap().drain(), 1);
        assert!(errors.poll().is_none());
    }

    #[test]
    fn test_skips_byte_order_mark_and_whitespace() {
        let (source, mut errors) = JsonFrameSource::open(
            "bom",
            Cursor::new(b"\xEF\xBB\xBF \n [[[[9]]]]".to_vec()),
        );
        let mut source = source.unwrap();
        assert_eq!(source.next_frame().unwrap().get(0, 0, 0), 9);
        assert!(errors.poll().is_none());
    }

    #[test]
    fn test_empty_input_is_not_an_array() {
        let (source, mut errors) = open_str("  \n");
        assert!(source.is_none());
        assert!(matches!(
            errors.poll(),
            Some(SourceError::NotAnArray { found }) if found == "end of input"
        ));
    }

    #[test]
    fn test_small_read_buffer() {
        let input = "[[[[1,2],[3,4]]],[[[5,6],[7,8]]]]";
        let reader = BufReader::with_capacity(1, Cursor::new(input.as_bytes()));
        let (source, mut errors) = JsonFrameSource::open("tiny buffer", reader);
        let mut source = source.unwrap();
        assert_eq!(source.drain(), 2);
        assert_eq!(source.shape(), Some((1, 2, 2)));
        assert!(errors.poll().is_none());
    }

    #[test]
    fn test_object_input_fails_without_source() {
        let (source, mut errors) = open_str(r#"{"not":"an array"}"#);
        assert!(source.is_none());
        assert!(matches!(
            errors.poll(),
            Some(SourceError::NotAnArray { found }) if found == "`{`"
        ));
    }

    #[test]
    fn test_read_failure_fails_without_source() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk on fire"))
            }
        }

        let (source, mut errors) = JsonFrameSource::open("broken", BufReader::new(Broken));
        assert!(source.is_none());
        assert!(matches!(errors.poll(), Some(SourceError::Io(_))));
    }

    #[test]
    fn test_invalid_element_signals_once_and_stops() {
        let (source, mut errors) = open_str(r#"[[[[1]]], [[["red"]]], [[[3]]]]"#);
        let mut source = source.unwrap();
        assert_eq!(source.drain(), 1);

        assert!(matches!(
            errors.poll(),
            Some(SourceError::Json { index: 1, .. })
        ));
        // Latched: still reported on later polls.
        assert!(errors.poll().is_some());
        assert!(errors.take().is_some());
        assert!(errors.poll().is_none());
    }

    #[test]
    fn test_shape_mismatch_is_decode_error() {
        let (source, mut errors) = open_str("[[[[1]]], [[[1, 2]]]]");
        let mut source = source.unwrap();
        assert_eq!(source.drain(), 1);
        assert!(matches!(
            errors.poll(),
            Some(SourceError::ShapeMismatch {
                index: 1,
                expected: (1, 1, 1),
                actual: (1, 1, 2),
            })
        ));
    }

    #[test]
    fn test_empty_array_has_no_frames() {
        let (source, mut errors) = open_str("[]");
        let mut source = source.unwrap();
        assert!(matches!(source.next_frame(), Err(SourceError::NoFrames)));
        assert!(errors.poll().is_none());
    }

    /// Reader that releases bytes only when the test allows it.
    struct Gated {
        data: Vec<u8>,
        pos: usize,
        allowed: Arc<Mutex<usize>>,
    }

    impl Read for Gated {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                let limit = (*self.allowed.lock().unwrap()).min(self.data.len());
                if self.pos < limit {
                    let n = (limit - self.pos).min(buf.len());
                    buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                    self.pos += n;
                    return Ok(n);
                }
                if self.pos == self.data.len() {
                    return Ok(0);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn test_frames_stream_before_input_completes() {
        let first = "[[[[7]]],";
        let data = format!("{first}[[[8]]]]").into_bytes();
        let allowed = Arc::new(Mutex::new(first.len()));
        let reader = Gated {
            data,
            pos: 0,
            allowed: Arc::clone(&allowed),
        };

        let (source, _errors) = JsonFrameSource::open("gated", BufReader::new(reader));
        let mut source = source.unwrap();

        // Only the first element has been released, yet it is available.
        assert_eq!(source.next_frame().unwrap().get(0, 0, 0), 7);
        assert!(!source.is_replaying());

        *allowed.lock().unwrap() = usize::MAX;
        assert_eq!(source.next_frame().unwrap().get(0, 0, 0), 8);
        assert_eq!(source.next_frame().unwrap().get(0, 0, 0), 7);
    }

    /// Reader that counts the bytes handed out.
    struct Counting {
        inner: Cursor<Vec<u8>>,
        read: Arc<AtomicUsize>,
    }

    impl Read for Counting {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    #[test]
    fn test_decoder_stalls_on_full_queue() {
        // Six-digit colors give every element the same encoded length.
        let frames: Vec<Frame> = (0..(QUEUE_CAPACITY as u32 * 3))
            .map(|i| Frame::from_fn((1, 1, 1), |_, _, _| 100_000 + i))
            .collect();
        let json = animation_json(&frames);
        let element_len = "[[[100000]]],".len();
        let read = Arc::new(AtomicUsize::new(0));
        let reader = Counting {
            inner: Cursor::new(json.clone().into_bytes()),
            read: Arc::clone(&read),
        };
        let (source, mut errors) =
            JsonFrameSource::open("many", BufReader::with_capacity(1, reader));
        let mut source = source.unwrap();

        // Nobody consumes: the decoder fills the queue, parses one more
        // frame and blocks sending it.
        std::thread::sleep(Duration::from_millis(200));
        let stalled = read.load(Ordering::SeqCst);
        assert!(stalled >= QUEUE_CAPACITY * element_len, "read {stalled}");
        assert!(
            stalled <= 1 + (QUEUE_CAPACITY + 2) * element_len,
            "read {stalled} bytes of {}",
            json.len()
        );
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(read.load(Ordering::SeqCst), stalled);

        for expected in &frames {
            assert_eq!(&source.next_frame().unwrap(), expected);
        }
        assert_eq!(&source.next_frame().unwrap(), &frames[0]);
        assert_eq!(read.load(Ordering::SeqCst), json.len());
        assert!(errors.poll().is_none());
    }

    #[test]
    fn test_display_names_source() {
        let (source, _) = open_str("[[[[1, 2]]]]");
        let mut source = source.unwrap();
        source.drain();
        assert_eq!(source.to_string(), "test input (1 frame(s) decoded, 1x1x2)");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn animation() -> impl Strategy<Value = Vec<Frame>> {
            (1usize..4, 1usize..4, 1usize..4, 1usize..8).prop_flat_map(|(w, h, d, n)| {
                proptest::collection::vec(
                    proptest::collection::vec(0u32..=0xFF_FFFF, w * h * d),
                    n,
                )
                .prop_map(move |frames| {
                    frames
                        .into_iter()
                        .map(|cells| Frame::from_cells((w, h, d), cells).unwrap())
                        .collect()
                })
            })
        }

        proptest! {
            #[test]
            fn test_decode_encode_roundtrip(frames in animation()) {
                let json = animation_json(&frames);
                let (source, mut errors) = JsonFrameSource::open("prop", Cursor::new(json.clone()));
                let mut source = source.unwrap();
                prop_assert_eq!(source.drain(), frames.len());
                prop_assert!(errors.poll().is_none());
                prop_assert_eq!(animation_json(source.animation()), json);
            }

            #[test]
            fn test_stream_then_replay_order(frames in animation()) {
                let json = animation_json(&frames);
                let (source, _) = JsonFrameSource::open("prop", Cursor::new(json));
                let mut source = source.unwrap();
                for expected in frames.iter().chain(frames.iter()) {
                    prop_assert_eq!(&source.next_frame().unwrap(), expected);
                }
            }
        }
    }
}
