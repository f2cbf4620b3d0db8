//! Fixed PCM frame format shared by every source and the mixer output.
//!
//! One frame is 20ms of interleaved stereo signed 16-bit little-endian PCM at
//! 48kHz: 960 samples per channel, 1920 samples, 3840 bytes.

use bytes::Bytes;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
pub const SAMPLES_PER_CHANNEL: usize = 960;
pub const FRAME_SAMPLES: usize = SAMPLES_PER_CHANNEL * CHANNELS;
pub const BYTES_PER_SAMPLE: usize = 2;
pub const FRAME_SIZE: usize = FRAME_SAMPLES * BYTES_PER_SAMPLE;
pub const FRAME_DURATION_MS: u64 = 20;

/// A frame of digital silence.
pub fn silence() -> Bytes {
    Bytes::from_static(&[0u8; FRAME_SIZE])
}

/// Wide summing buffer for one output frame.
///
/// Sources are accumulated as `i32` so intermediate sums never wrap;
/// clipping to `i16` happens once, when the frame is finished.
#[derive(Debug, Clone)]
pub struct MixBuffer {
    acc: Vec<i32>,
    mixed: usize,
}

impl MixBuffer {
    pub fn new() -> Self {
        Self {
            acc: vec![0; FRAME_SAMPLES],
            mixed: 0,
        }
    }

    /// Add one PCM frame. Input shorter than a frame is treated as
    /// zero-padded; bytes past `FRAME_SIZE` and a trailing odd byte are ignored.
    pub fn accumulate(&mut self, pcm: &[u8]) {
        let usable = pcm.len().min(FRAME_SIZE);
        for (slot, chunk) in self.acc.iter_mut().zip(pcm[..usable].chunks_exact(2)) {
            *slot += i16::from_le_bytes([chunk[0], chunk[1]]) as i32;
        }
        self.mixed += 1;
    }

    /// Number of frames accumulated so far
    pub fn sources_mixed(&self) -> usize {
        self.mixed
    }

    /// Clip to `i16` and encode as little-endian PCM.
    pub fn finish(self) -> Bytes {
        if self.mixed == 0 {
            return silence();
        }
        let mut out = Vec::with_capacity(FRAME_SIZE);
        for sample in self.acc {
            let clipped = sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out.extend_from_slice(&clipped.to_le_bytes());
        }
        Bytes::from(out)
    }
}

impl Default for MixBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode little-endian PCM into samples. A trailing odd byte is dropped.
pub fn decode_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Encode samples as little-endian PCM.
pub fn encode_samples(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(out)
}
