#![allow(dead_code)]

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use voicemix::frame::{encode_samples, FRAME_SAMPLES};
use voicemix::{AudioSource, FrameMixer, MixerConfig, SourceError, SourceHandle, SourceRegistry};

pub fn constant_frame(value: i16) -> Bytes {
    encode_samples(&vec![value; FRAME_SAMPLES])
}

/// Counters shared between a test and the source it handed to the engine.
#[derive(Default)]
pub struct Tally {
    pub reads: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Tally {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Plays back a fixed list of frames, then ends.
pub struct ScriptedSource {
    frames: Mutex<VecDeque<Bytes>>,
    delay: Duration,
    closed: AtomicBool,
    tally: Arc<Tally>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Bytes>) -> (SourceHandle, Arc<Tally>) {
        Self::with_delay(frames, Duration::ZERO)
    }

    /// Each read sleeps for `delay` before answering.
    pub fn with_delay(frames: Vec<Bytes>, delay: Duration) -> (SourceHandle, Arc<Tally>) {
        let tally = Arc::new(Tally::default());
        let source = Self {
            frames: Mutex::new(frames.into()),
            delay,
            closed: AtomicBool::new(false),
            tally: tally.clone(),
        };
        (SourceHandle::new(source), tally)
    }

    /// `count` full frames of a constant value.
    pub fn constant(value: i16, count: usize) -> (SourceHandle, Arc<Tally>) {
        Self::new(vec![constant_frame(value); count])
    }
}

impl AudioSource for ScriptedSource {
    fn read(&self) -> Result<Bytes, SourceError> {
        let now = self.tally.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.tally.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.tally.reads.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let frame = if self.closed.load(Ordering::SeqCst) {
            Bytes::new()
        } else {
            self.frames.lock().unwrap().pop_front().unwrap_or_default()
        };

        self.tally.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(frame)
    }

    fn cleanup(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tally.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Errors on every read.
pub struct FailingSource;

impl AudioSource for FailingSource {
    fn read(&self) -> Result<Bytes, SourceError> {
        Err(SourceError::Producer("stream dropped".to_string()))
    }

    fn cleanup(&self) {}
}

/// Panics on every read.
pub struct PanickingSource;

impl AudioSource for PanickingSource {
    fn read(&self) -> Result<Bytes, SourceError> {
        panic!("decoder bug")
    }

    fn cleanup(&self) {}
}

pub fn mixer_with_timeout(timeout: Duration) -> (Arc<SourceRegistry>, FrameMixer) {
    let registry = Arc::new(SourceRegistry::new());
    let config = MixerConfig {
        read_timeout: timeout,
        read_workers: 4,
        ..MixerConfig::default()
    };
    let mixer = FrameMixer::new(registry.clone(), config).unwrap();
    (registry, mixer)
}

/// Generous timeout so fast sources are always collected in the same tick.
pub fn mixer() -> (Arc<SourceRegistry>, FrameMixer) {
    mixer_with_timeout(Duration::from_millis(500))
}
