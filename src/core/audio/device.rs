//! Device seams for microphone capture and speaker output.
//!
//! The session engine never talks to audio hardware directly. A
//! [`MicrophoneProvider`] hands out live input tracks and an
//! [`OutputProvider`] opens an output device with its own clock. The binary
//! wires WAV-file devices behind these traits; tests wire in-memory fakes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::codec::AudioBuffer;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by audio devices.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The user or platform refused access to the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No usable device exists or it has gone away
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device cannot deliver the requested format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Backing I/O failed
    #[error("Audio I/O error: {0}")]
    Io(String),
}

/// Result type for audio device operations.
pub type AudioResult<T> = Result<T, AudioError>;

// =============================================================================
// Microphone
// =============================================================================

/// Constraints requested when acquiring the microphone.
///
/// The processing flags are required for a stable session: without echo
/// cancellation the model hears its own voice and interrupts itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicrophoneConstraints {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for MicrophoneConstraints {
    fn default() -> Self {
        Self {
            channel_count: 1,
            sample_rate: 16000,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Callback invoked by the device clock with each block of raw samples.
///
/// Block sizes are chosen by the device and need not match the capture frame
/// size.
pub type SampleCallback = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// A live microphone track.
pub trait MicrophoneTrack: Send + Sync {
    /// Route sample blocks to `callback`, replacing any previous destination.
    fn attach(&self, callback: SampleCallback);

    /// Stop delivering sample blocks. Safe to call when nothing is attached.
    fn detach(&self);

    /// Release the underlying hardware. Idempotent.
    fn stop(&self);

    /// Whether the track still holds the hardware.
    fn is_live(&self) -> bool;

    /// Sample rate of delivered blocks.
    fn sample_rate(&self) -> u32;
}

/// Source of microphone tracks.
#[async_trait]
pub trait MicrophoneProvider: Send + Sync {
    /// Acquire a track. Awaiting here may include a permission prompt.
    async fn acquire(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> AudioResult<Arc<dyn MicrophoneTrack>>;
}

/// Boxed microphone provider.
pub type BoxedMicrophoneProvider = Arc<dyn MicrophoneProvider>;

// =============================================================================
// Output
// =============================================================================

/// Identifier of a scheduled audio source on an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Callback invoked when a source finishes playing on its own.
///
/// Not invoked for sources stopped through [`OutputDevice::stop_source`].
pub type SourceEndedCallback = Arc<dyn Fn(SourceId) + Send + Sync>;

/// An opened output device with its own clock.
pub trait OutputDevice: Send + Sync {
    /// Sample rate the device renders at.
    fn sample_rate(&self) -> u32;

    /// Current device clock in seconds. Monotonically non-decreasing.
    fn current_time(&self) -> f64;

    /// Resume a suspended device.
    fn resume(&self) -> AudioResult<()>;

    /// Schedule `buffer` to start at `when` on the device clock.
    fn start_source(&self, buffer: AudioBuffer, when: f64) -> AudioResult<SourceId>;

    /// Stop a scheduled or playing source immediately. Unknown ids are ignored.
    fn stop_source(&self, id: SourceId);

    /// Release the device. Idempotent.
    fn close(&self);
}

/// Opens output devices.
#[async_trait]
pub trait OutputProvider: Send + Sync {
    async fn open(
        &self,
        sample_rate: u32,
        on_ended: SourceEndedCallback,
    ) -> AudioResult<Arc<dyn OutputDevice>>;
}

/// Boxed output provider.
pub type BoxedOutputProvider = Arc<dyn OutputProvider>;
