//! Fixed-rate render loop.
//!
//! Each tick the loop checks the decoder's error signal, pulls exactly one
//! frame, stages it on the cube, waits for the tick boundary and renders.
//! Render errors are classified by the cube itself: recoverable ones are
//! logged and the loop keeps its pace, fatal ones stop it. The cube is
//! finished exactly once on every way out of [`RenderLoop::run`].

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::animation::{ErrorSignal, FrameSource, SourceError};
use crate::cube::{Cube, CubeError};

/// Fixed-rate clock.
///
/// The first tick is immediate. A caller that falls behind gets one
/// immediate tick and the schedule restarts from there; missed ticks are
/// never replayed in a burst.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    /// Clock ticking `frame_rate` times per second (at least once).
    pub fn new(frame_rate: u32) -> Self {
        Self::with_period(Duration::from_secs(1) / frame_rate.max(1))
    }

    /// Clock ticking every `period`.
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Time between ticks.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until the next tick boundary.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if let Some(remaining) = self.next.checked_duration_since(now)
            && !remaining.is_zero()
        {
            thread::sleep(remaining);
            self.next += self.period;
        } else {
            self.next = now + self.period;
        }
    }
}

/// How a render loop ended without a playback error.
#[derive(Debug)]
pub enum LoopExit {
    /// The cube reported a fatal render error (including a shutdown request).
    Shutdown(CubeError),
    /// The configured tick limit was reached.
    TickLimit,
}

/// Errors that abort playback.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to decode frames from {description}: {error}")]
    Decode {
        description: String,
        #[source]
        error: SourceError,
    },
    #[error("Frame source failed: {0}")]
    Frame(#[source] SourceError),
    #[error("Cube rejected frame: {0}")]
    Cube(#[source] CubeError),
}

/// Paced pull loop from a frame source to a cube.
pub struct RenderLoop<S: FrameSource> {
    source: S,
    errors: ErrorSignal,
    ticker: Ticker,
    max_ticks: Option<u64>,
    ticks: u64,
}

impl<S: FrameSource> RenderLoop<S> {
    /// Loop rendering `frame_rate` frames per second from `source`.
    pub fn new(source: S, errors: ErrorSignal, frame_rate: u32) -> Self {
        Self {
            source,
            errors,
            ticker: Ticker::new(frame_rate),
            max_ticks: None,
            ticks: 0,
        }
    }

    /// Stop after `ticks` rendered ticks.
    pub fn with_tick_limit(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run until a fatal render error, a playback error or the tick limit.
    ///
    /// `cube` is finished before returning, whatever the outcome.
    pub fn run(mut self, mut cube: Box<dyn Cube>) -> Result<LoopExit, PlaybackError> {
        info!(
            "Playing {} at {:.1} fps",
            self.source.description(),
            1.0 / self.ticker.period().as_secs_f64()
        );
        let outcome = loop {
            match self.tick(cube.as_mut()) {
                Ok(None) => {}
                Ok(Some(exit)) => break Ok(exit),
                Err(e) => break Err(e),
            }
        };
        debug!("Render loop stopped after {} ticks", self.ticks);
        cube.finish();
        outcome
    }

    fn tick(&mut self, cube: &mut dyn Cube) -> Result<Option<LoopExit>, PlaybackError> {
        if self.max_ticks.is_some_and(|limit| self.ticks >= limit) {
            return Ok(Some(LoopExit::TickLimit));
        }

        self.check_errors()?;
        let frame = self.source.next_frame();
        // The decoder signals before closing the queue, so a frame pulled
        // after a decode failure must not be played.
        self.check_errors()?;
        let frame = frame.map_err(PlaybackError::Frame)?;

        cube.set_leds(&frame).map_err(PlaybackError::Cube)?;
        self.ticker.wait();
        self.ticks += 1;

        match cube.render() {
            Ok(()) => Ok(None),
            Err(e) if cube.is_recoverable(&e) => {
                warn!("Render failed on tick {}: {e}", self.ticks);
                Ok(None)
            }
            Err(e) => {
                info!("Stopping playback: {e}");
                Ok(Some(LoopExit::Shutdown(e)))
            }
        }
    }

    fn check_errors(&mut self) -> Result<(), PlaybackError> {
        match self.errors.take() {
            Some(error) => Err(PlaybackError::Decode {
                description: self.source.description().to_string(),
                error,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Frame, JsonFrameSource};
    use crate::cube::{ChannelFailure, DriverError};
    use std::collections::VecDeque;
    use std::io::{self, Cursor};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Set(u32),
        Render,
        Finish,
    }

    /// Cube logging every call, with scripted render results.
    struct Scripted {
        events: Arc<Mutex<Vec<Event>>>,
        renders: VecDeque<Result<(), CubeError>>,
    }

    impl Scripted {
        fn new(renders: Vec<Result<(), CubeError>>) -> (Box<Self>, Arc<Mutex<Vec<Event>>>) {
            let events = Arc::new(Mutex::new(Vec::new()));
            let cube = Box::new(Self {
                events: Arc::clone(&events),
                renders: renders.into(),
            });
            (cube, events)
        }
    }

    impl Cube for Scripted {
        fn set_leds(&mut self, frame: &Frame) -> Result<(), CubeError> {
            if frame.shape() != (1, 1, 1) {
                return Err(CubeError::Remap(crate::compute::RemapError::ShapeMismatch {
                    frame: frame.shape(),
                    cube: (1, 1, 1),
                }));
            }
            self.events.lock().unwrap().push(Event::Set(frame.cells()[0]));
            Ok(())
        }

        fn render(&mut self) -> Result<(), CubeError> {
            self.events.lock().unwrap().push(Event::Render);
            self.renders.pop_front().unwrap_or(Ok(()))
        }

        fn finish(self: Box<Self>) {
            self.events.lock().unwrap().push(Event::Finish);
        }

        fn is_recoverable(&self, error: &CubeError) -> bool {
            matches!(error, CubeError::Channels(_))
        }
    }

    fn source(json: &str) -> (JsonFrameSource, ErrorSignal) {
        let (source, signal) = JsonFrameSource::open("test.json", Cursor::new(json.to_string()));
        (source.unwrap(), signal)
    }

    fn hiccup() -> CubeError {
        CubeError::Channels(vec![ChannelFailure {
            channel: 0,
            gpio_pin: 18,
            error: DriverError::Io {
                device: "/dev/null".to_string(),
                source: io::Error::from(io::ErrorKind::TimedOut),
            },
        }])
    }

    fn set_values(events: &[Event]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Set(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plays_in_order_then_replays() {
        let (source, signal) = source("[[[[1]]], [[[2]]], [[[3]]]]");
        let (cube, events) = Scripted::new(vec![]);

        let exit = RenderLoop::new(source, signal, 1000)
            .with_tick_limit(7)
            .run(cube)
            .unwrap();

        assert!(matches!(exit, LoopExit::TickLimit));
        let events = events.lock().unwrap();
        assert_eq!(set_values(&events), vec![1, 2, 3, 1, 2, 3, 1]);
        assert_eq!(events.iter().filter(|e| **e == Event::Render).count(), 7);
        assert_eq!(events.last(), Some(&Event::Finish));
    }

    #[test]
    fn test_stage_then_render_each_tick() {
        let (source, signal) = source("[[[[1]]], [[[2]]]]");
        let (cube, events) = Scripted::new(vec![]);

        RenderLoop::new(source, signal, 1000)
            .with_tick_limit(2)
            .run(cube)
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::Set(1),
                Event::Render,
                Event::Set(2),
                Event::Render,
                Event::Finish
            ]
        );
    }

    #[test]
    fn test_recoverable_error_keeps_running() {
        let (source, signal) = source("[[[[1]]], [[[2]]], [[[3]]]]");
        let (cube, events) = Scripted::new(vec![Ok(()), Err(hiccup()), Ok(())]);

        let exit = RenderLoop::new(source, signal, 1000)
            .with_tick_limit(3)
            .run(cube)
            .unwrap();

        assert!(matches!(exit, LoopExit::TickLimit));
        assert_eq!(set_values(&events.lock().unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_fatal_error_stops_and_finishes_once() {
        let (source, signal) = source("[[[[1]]], [[[2]]], [[[3]]]]");
        let (cube, events) = Scripted::new(vec![Ok(()), Err(CubeError::ShutdownRequested)]);

        let exit = RenderLoop::new(source, signal, 1000)
            .with_tick_limit(10)
            .run(cube)
            .unwrap();

        assert!(matches!(exit, LoopExit::Shutdown(CubeError::ShutdownRequested)));
        let events = events.lock().unwrap();
        assert_eq!(set_values(&events), vec![1, 2]);
        assert_eq!(events.iter().filter(|e| **e == Event::Finish).count(), 1);
        assert_eq!(events.last(), Some(&Event::Finish));
    }

    #[test]
    fn test_decode_error_aborts_with_source_name() {
        let (source, signal) = source("[[[[1]]], 5]");
        let (cube, events) = Scripted::new(vec![]);

        let err = RenderLoop::new(source, signal, 1000)
            .with_tick_limit(100)
            .run(cube)
            .unwrap_err();

        assert!(matches!(
            err,
            PlaybackError::Decode {
                error: SourceError::Json { index: 1, .. },
                ..
            }
        ));
        assert!(err.to_string().contains("test.json"), "{err}");
        let events = events.lock().unwrap();
        assert!(set_values(&events).iter().all(|&v| v == 1));
        assert_eq!(events.last(), Some(&Event::Finish));
    }

    #[test]
    fn test_empty_animation_fails() {
        let (source, signal) = source("[]");
        let (cube, events) = Scripted::new(vec![]);

        let err = RenderLoop::new(source, signal, 1000).run(cube).unwrap_err();

        assert!(matches!(err, PlaybackError::Frame(SourceError::NoFrames)));
        assert_eq!(*events.lock().unwrap(), vec![Event::Finish]);
    }

    #[test]
    fn test_wrong_shape_is_fatal() {
        let (source, signal) = source("[[[[1, 2]]]]");
        let (cube, events) = Scripted::new(vec![]);

        let err = RenderLoop::new(source, signal, 1000).run(cube).unwrap_err();

        assert!(matches!(err, PlaybackError::Cube(CubeError::Remap(_))));
        assert_eq!(*events.lock().unwrap(), vec![Event::Finish]);
    }

    #[test]
    fn test_ticker_paces() {
        let mut ticker = Ticker::new(50);
        assert_eq!(ticker.period(), Duration::from_millis(20));

        let start = Instant::now();
        for _ in 0..5 {
            ticker.wait();
        }
        // First tick is immediate.
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[test]
    fn test_ticker_does_not_burst() {
        let mut ticker = Ticker::with_period(Duration::from_millis(50));
        ticker.wait();
        thread::sleep(Duration::from_millis(200));
        ticker.wait();

        let start = Instant::now();
        ticker.wait();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
