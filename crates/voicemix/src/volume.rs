//! Linear volume wrapper for any source.

use crate::frame::{decode_samples, encode_samples};
use crate::source::{AudioSource, SourceError, SourceHandle, SourceMetadata};
use bytes::Bytes;
use portable_atomic::AtomicF32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub const MAX_VOLUME: f32 = 2.0;

/// Convert a 0-200 percentage to a linear gain.
pub fn percent_to_linear(percent: u32) -> f32 {
    (percent as f32 / 100.0).clamp(0.0, MAX_VOLUME)
}

/// Shared, lock-free volume setting. Clones control the same value.
#[derive(Debug, Clone)]
pub struct VolumeControl(Arc<AtomicF32>);

impl VolumeControl {
    pub fn new(volume: f32) -> Self {
        Self(Arc::new(AtomicF32::new(volume.clamp(0.0, MAX_VOLUME))))
    }

    pub fn get(&self) -> f32 {
        self.0.load(Ordering::Relaxed)
    }

    /// Set linear volume, clamped to 0.0-2.0
    pub fn set(&self, volume: f32) {
        self.0.store(volume.clamp(0.0, MAX_VOLUME), Ordering::Relaxed);
    }

    pub fn set_percent(&self, percent: u32) {
        self.set(percent_to_linear(percent));
    }

    pub fn percent(&self) -> u32 {
        (self.get() * 100.0).round() as u32
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Scales every sample of the wrapped source, saturating at the i16 range.
pub struct VolumeSource {
    inner: SourceHandle,
    volume: VolumeControl,
}

impl VolumeSource {
    pub fn new(inner: SourceHandle, volume: f32) -> Self {
        Self {
            inner,
            volume: VolumeControl::new(volume),
        }
    }

    pub fn control(&self) -> VolumeControl {
        self.volume.clone()
    }
}

impl AudioSource for VolumeSource {
    fn read(&self) -> Result<Bytes, SourceError> {
        let data = self.inner.read()?;
        let volume = self.volume.get();
        if data.is_empty() || (volume - 1.0).abs() < f32::EPSILON {
            return Ok(data);
        }

        let scaled: Vec<i16> = decode_samples(&data)
            .into_iter()
            .map(|s| (s as f32 * volume).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        Ok(encode_samples(&scaled))
    }

    fn cleanup(&self) {
        self.inner.cleanup();
    }

    fn metadata(&self) -> SourceMetadata {
        self.inner.metadata()
    }
}
