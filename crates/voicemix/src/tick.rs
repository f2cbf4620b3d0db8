//! Real-time tick driver and frame sinks.
//!
//! The driver owns a dedicated thread that pulls one frame from the mixer per
//! tick interval and hands it to a [`FrameSink`]. Ticks are scheduled against
//! absolute deadlines from the start instant, so a slow tick shortens the
//! next sleep instead of pushing the whole stream later.

use crate::frame::{CHANNELS, SAMPLE_RATE};
use crate::mixer::FrameMixer;
use bytes::Bytes;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV write failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("sink already finished")]
    Finished,

    #[error("tick thread panicked")]
    Panicked,
}

/// Destination for mixed frames (a voice transport, a file, a test buffer).
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError>;

    /// Flush and close. Called once when the driver stops.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes frames to a 48kHz stereo 16-bit WAV file.
pub struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let spec = hound::WavSpec {
            channels: CHANNELS as u16,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl FrameSink for WavSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Finished)?;
        for chunk in frame.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

/// Keeps every frame in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<Bytes>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Bytes::copy_from_slice(frame));
        Ok(())
    }
}

/// Handle to a running tick thread.
pub struct TickDriver {
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<Result<u64, SinkError>>>,
}

impl TickDriver {
    /// Start ticking `mixer` into `sink` every `interval`.
    ///
    /// With `max_ticks` set the thread stops by itself after that many frames.
    pub fn start(
        mixer: Arc<FrameMixer>,
        sink: impl FrameSink + 'static,
        interval: Duration,
        max_ticks: Option<u64>,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));

        let running_for_thread = running.clone();
        let ticks_for_thread = ticks.clone();
        let handle = thread::Builder::new()
            .name("mixer-tick".to_string())
            .spawn(move || {
                run_tick_loop(
                    mixer,
                    sink,
                    interval,
                    max_ticks,
                    running_for_thread,
                    ticks_for_thread,
                )
            })?;

        info!("Tick driver started ({:?} interval)", interval);
        Ok(Self {
            running,
            ticks,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Frames delivered so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ask the thread to stop, then wait for it.
    pub fn stop(mut self) -> Result<u64, SinkError> {
        self.running.store(false, Ordering::Release);
        self.join()
    }

    /// Wait for the thread to finish on its own (requires `max_ticks`).
    pub fn wait(mut self) -> Result<u64, SinkError> {
        self.join()
    }

    fn join(&mut self) -> Result<u64, SinkError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SinkError::Panicked)?,
            None => Ok(self.ticks()),
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_tick_loop(
    mixer: Arc<FrameMixer>,
    mut sink: impl FrameSink,
    interval: Duration,
    max_ticks: Option<u64>,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
) -> Result<u64, SinkError> {
    let mut deadline = Instant::now();
    let mut delivered: u64 = 0;
    let mut result = Ok(());

    while running.load(Ordering::Acquire) && max_ticks.map_or(true, |max| delivered < max) {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // Absolute deadlines: a slow tick is caught up, not carried forward
        deadline += interval;

        let frame = mixer.read();
        if let Err(e) = sink.write_frame(&frame) {
            error!("Frame sink failed, stopping tick driver: {}", e);
            result = Err(e);
            break;
        }
        delivered += 1;
        ticks.store(delivered, Ordering::Relaxed);
    }

    running.store(false, Ordering::Release);
    let finished = sink.finish();
    debug!("Tick driver stopped after {} frames", delivered);
    result?;
    finished?;
    Ok(delivered)
}
