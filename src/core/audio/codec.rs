//! Linear PCM codec for the realtime wire format.
//!
//! Outbound microphone audio and inbound model speech both travel as 16-bit
//! signed little-endian PCM. This module converts between that compact form
//! and the normalized `f32` samples used by the capture and playback stages.

use base64::prelude::*;
use thiserror::Error;

/// Scale factor for converting normalized float samples to PCM 16-bit.
const FLOAT_TO_PCM_SCALE: f32 = 32768.0;

/// Scale factor for converting PCM 16-bit samples to normalized float (-1.0 to 1.0).
const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// Bytes per encoded sample.
const BYTES_PER_SAMPLE: usize = 2;

/// Errors raised while decoding inbound audio.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Byte length does not cover a whole number of frames
    #[error("PCM payload of {len} bytes is not a whole number of {channels}-channel frames")]
    InvalidLength { len: usize, channels: u16 },

    /// Sample rate or channel count cannot describe playable audio
    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    /// Transport encoding (base64) of the payload was corrupt
    #[error("Invalid payload encoding: {0}")]
    InvalidEncoding(String),
}

/// Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decoded, playable audio.
///
/// Samples are interleaved when `channels > 1` and normalized to `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap already-normalized samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> DecodeResult<Self> {
        if sample_rate == 0 {
            return Err(DecodeError::InvalidFormat(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if channels == 0 {
            return Err(DecodeError::InvalidFormat(
                "channel count must be non-zero".to_string(),
            ));
        }
        if samples.len() % channels as usize != 0 {
            return Err(DecodeError::InvalidLength {
                len: samples.len() * BYTES_PER_SAMPLE,
                channels,
            });
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Encode normalized samples as PCM 16-bit little-endian.
///
/// Out-of-range samples are clamped and non-finite samples encode as silence,
/// so the output is always exactly `2 * samples.len()` bytes.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.extend_from_slice(&float_to_pcm(sample).to_le_bytes());
    }
    out
}

/// Decode interleaved PCM 16-bit little-endian into a playable buffer.
pub fn decode(bytes: &[u8], sample_rate: u32, channels: u16) -> DecodeResult<AudioBuffer> {
    if channels == 0 {
        return Err(DecodeError::InvalidFormat(
            "channel count must be non-zero".to_string(),
        ));
    }
    let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::InvalidLength {
            len: bytes.len(),
            channels,
        });
    }

    let samples = bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 * PCM_TO_FLOAT_SCALE)
        .collect();

    AudioBuffer::new(samples, sample_rate, channels)
}

/// Decode a base64 PCM payload as it arrives on the wire.
pub fn decode_base64(data: &str, sample_rate: u32, channels: u16) -> DecodeResult<AudioBuffer> {
    let bytes = BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
    decode(&bytes, sample_rate, channels)
}

/// Extract the sample rate from a PCM mime type such as `audio/pcm;rate=24000`.
pub fn pcm_rate_from_mime(mime_type: &str) -> Option<u32> {
    let mut parts = mime_type.split(';').map(str::trim);
    let base = parts.next()?;
    if !base.eq_ignore_ascii_case("audio/pcm") && !base.eq_ignore_ascii_case("audio/l16") {
        return None;
    }
    parts
        .filter_map(|p| p.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|rate| *rate > 0)
}

#[inline]
fn float_to_pcm(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * FLOAT_TO_PCM_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
