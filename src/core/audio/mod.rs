//! Audio pipeline: PCM codec, microphone capture, gapless playback.
//!
//! # Audio Format
//!
//! - Capture: mono f32 at 16kHz, shipped as PCM 16-bit little-endian
//! - Playback: PCM 16-bit little-endian at 24kHz, decoded to f32

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
pub mod wav;

pub use capture::{CaptureGraph, CaptureStats, DEFAULT_FRAME_SIZE, FrameAccumulator, FrameSender};
pub use codec::{
    AudioBuffer, DecodeError, DecodeResult, decode, decode_base64, encode, pcm_rate_from_mime,
};
pub use device::{
    AudioError, AudioResult, BoxedMicrophoneProvider, BoxedOutputProvider, MicrophoneConstraints,
    MicrophoneProvider, MicrophoneTrack, OutputDevice, OutputProvider, SampleCallback,
    SourceEndedCallback, SourceId,
};
pub use playback::{PlaybackScheduler, ScheduledChunk};
pub use wav::{WavMicrophone, WavMicrophoneProvider, WavOutputDevice, WavOutputProvider};

/// Capture sample rate expected by the realtime model.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Playback sample rate of model speech.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;
