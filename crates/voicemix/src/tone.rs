//! Synthetic test-tone sources and a resolver that produces them.
//!
//! Useful for exercising the pipeline without any media backend:
//! `tone:440` is a one second 440Hz sine, `tone:440:2500` lasts 2.5s.

use crate::frame::{encode_samples, FRAME_DURATION_MS, SAMPLES_PER_CHANNEL, SAMPLE_RATE};
use crate::routing::{MediaRequest, MediaResolver, ResolveError};
use crate::source::{AudioSource, SourceError, SourceHandle, SourceMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const DEFAULT_FREQUENCY: f32 = 440.0;
pub const DEFAULT_DURATION_MS: u64 = 1000;
pub const DEFAULT_AMPLITUDE: i16 = 16_000;

/// One stereo frame of a sine starting at phase zero.
fn sine_frame(frequency: f32, amplitude: i16) -> Bytes {
    let mut samples = Vec::with_capacity(SAMPLES_PER_CHANNEL * 2);
    for n in 0..SAMPLES_PER_CHANNEL {
        let t = n as f32 / SAMPLE_RATE as f32;
        let value = ((TAU * frequency * t).sin() * amplitude as f32) as i16;
        samples.push(value);
        samples.push(value);
    }
    encode_samples(&samples)
}

fn frames_for(duration_ms: u64) -> usize {
    (duration_ms / FRAME_DURATION_MS) as usize
}

/// Fixed-frequency sine of a given duration.
///
/// The frame is computed once and repeated.
pub struct ToneSource {
    frequency: f32,
    frame: Bytes,
    frames_total: usize,
    frames_sent: AtomicUsize,
    closed: AtomicBool,
}

impl ToneSource {
    pub fn new(frequency: f32, duration_ms: u64, amplitude: i16) -> Self {
        Self {
            frequency,
            frame: sine_frame(frequency, amplitude),
            frames_total: frames_for(duration_ms),
            frames_sent: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn frames_total(&self) -> usize {
        self.frames_total
    }
}

impl Default for ToneSource {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY, DEFAULT_DURATION_MS, DEFAULT_AMPLITUDE)
    }
}

impl AudioSource for ToneSource {
    fn read(&self) -> Result<Bytes, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(Bytes::new());
        }
        let sent = self.frames_sent.fetch_add(1, Ordering::AcqRel);
        if sent >= self.frames_total {
            return Ok(Bytes::new());
        }
        Ok(self.frame.clone())
    }

    fn cleanup(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            title: Some(format!("Test tone {}Hz", self.frequency)),
            url: Some(format!("tone:{}", self.frequency)),
            duration_secs: Some(self.frames_total as f64 * FRAME_DURATION_MS as f64 / 1000.0),
        }
    }
}

/// Steps through a list of frequencies, each held for the same duration.
pub struct MultiToneSource {
    frames: Vec<Bytes>,
    frames_per_tone: usize,
    frames_sent: AtomicUsize,
    closed: AtomicBool,
}

impl MultiToneSource {
    pub fn new(frequencies: &[f32], duration_per_tone_ms: u64, amplitude: i16) -> Self {
        Self {
            frames: frequencies
                .iter()
                .map(|&f| sine_frame(f, amplitude))
                .collect(),
            frames_per_tone: frames_for(duration_per_tone_ms),
            frames_sent: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// C major arpeggio, half a second per note.
    pub fn arpeggio() -> Self {
        Self::new(&[261.0, 329.0, 392.0, 523.0], 500, 12_000)
    }
}

impl AudioSource for MultiToneSource {
    fn read(&self) -> Result<Bytes, SourceError> {
        if self.closed.load(Ordering::Acquire) || self.frames_per_tone == 0 {
            return Ok(Bytes::new());
        }
        let sent = self.frames_sent.fetch_add(1, Ordering::AcqRel);
        let tone = sent / self.frames_per_tone;
        Ok(self.frames.get(tone).cloned().unwrap_or_default())
    }

    fn cleanup(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            title: Some(format!("Test tone sequence ({} notes)", self.frames.len())),
            ..SourceMetadata::default()
        }
    }
}

/// Resolves `tone:<hz>[:<ms>]` urls to [`ToneSource`]s.
#[derive(Debug, Clone, Default)]
pub struct ToneResolver;

impl ToneResolver {
    fn parse(url: &str) -> Result<(f32, u64), ResolveError> {
        let spec = url
            .strip_prefix("tone:")
            .ok_or_else(|| ResolveError::Unsupported(url.to_string()))?;
        let mut parts = spec.split(':');
        let invalid = || ResolveError::Invalid(url.to_string());

        let frequency: f32 = match parts.next() {
            Some(hz) if !hz.is_empty() => hz.parse().map_err(|_| invalid())?,
            _ => DEFAULT_FREQUENCY,
        };
        let duration_ms: u64 = match parts.next() {
            Some(ms) => ms.parse().map_err(|_| invalid())?,
            None => DEFAULT_DURATION_MS,
        };
        if parts.next().is_some() || !(frequency > 0.0) {
            return Err(invalid());
        }
        Ok((frequency, duration_ms))
    }
}

#[async_trait]
impl MediaResolver for ToneResolver {
    async fn resolve(&self, request: &MediaRequest) -> Result<SourceHandle, ResolveError> {
        let (frequency, duration_ms) = Self::parse(&request.url)?;
        Ok(SourceHandle::new(ToneSource::new(
            frequency,
            duration_ms,
            DEFAULT_AMPLITUDE,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_samples, FRAME_SIZE};

    #[test]
    fn test_tone_frame_count() {
        let tone = ToneSource::new(440.0, 100, 1000);
        assert_eq!(tone.frames_total(), 5);
        for _ in 0..5 {
            assert_eq!(tone.read().unwrap().len(), FRAME_SIZE);
        }
        assert!(tone.read().unwrap().is_empty());
        assert!(tone.read().unwrap().is_empty());
    }

    #[test]
    fn test_tone_is_stereo_sine() {
        let tone = ToneSource::new(1000.0, 20, 10_000);
        let samples = decode_samples(&tone.read().unwrap());
        assert_eq!(samples[0], 0);
        // Channels carry the same signal
        assert!(samples.chunks(2).all(|lr| lr[0] == lr[1]));
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 9_900 && peak <= 10_000);
    }

    #[test]
    fn test_cleanup_ends_stream() {
        let tone = ToneSource::default();
        assert!(!tone.read().unwrap().is_empty());
        tone.cleanup();
        tone.cleanup();
        assert!(tone.read().unwrap().is_empty());
    }

    #[test]
    fn test_multi_tone_steps() {
        let multi = MultiToneSource::new(&[200.0, 400.0], 40, 1000);
        let a1 = multi.read().unwrap();
        let a2 = multi.read().unwrap();
        let b1 = multi.read().unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
        multi.read().unwrap();
        assert!(multi.read().unwrap().is_empty());
    }

    #[test]
    fn test_resolver_parse() {
        assert_eq!(ToneResolver::parse("tone:440").unwrap(), (440.0, 1000));
        assert_eq!(ToneResolver::parse("tone:220:2500").unwrap(), (220.0, 2500));
        assert_eq!(ToneResolver::parse("tone:").unwrap(), (440.0, 1000));
        assert!(matches!(
            ToneResolver::parse("https://example.com/a.mp3"),
            Err(ResolveError::Unsupported(_))
        ));
        assert!(matches!(
            ToneResolver::parse("tone:abc"),
            Err(ResolveError::Invalid(_))
        ));
        assert!(matches!(
            ToneResolver::parse("tone:-5"),
            Err(ResolveError::Invalid(_))
        ));
    }

    #[test]
    fn test_resolver_builds_source() {
        let request = MediaRequest::new("tone:440:40");
        let source = tokio_test::block_on(ToneResolver.resolve(&request)).unwrap();
        assert_eq!(source.metadata().duration_secs, Some(0.04));
    }
}
