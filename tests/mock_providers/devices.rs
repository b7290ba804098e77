//! In-memory audio devices
//!
//! The microphone delivers whatever blocks the test pushes through
//! [`FakeTrack::emit`]. The output device has a hand-driven clock and records
//! every start and stop so tests can inspect the playback timeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use booking_agent::core::audio::{
    AudioBuffer, AudioError, AudioResult, MicrophoneConstraints, MicrophoneProvider,
    MicrophoneTrack, OutputDevice, OutputProvider, SampleCallback, SourceEndedCallback, SourceId,
};

// =============================================================================
// Microphone
// =============================================================================

pub struct FakeTrack {
    sample_rate: u32,
    callback: Mutex<Option<SampleCallback>>,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            callback: Mutex::new(None),
            live: AtomicBool::new(true),
        })
    }

    /// Push a block of samples as the device clock would.
    pub fn emit(&self, block: &[f32]) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(block);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.callback.lock().is_some()
    }
}

impl MicrophoneTrack for FakeTrack {
    fn attach(&self, callback: SampleCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn detach(&self) {
        self.callback.lock().take();
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[derive(Default)]
pub struct FakeMicrophoneProvider {
    pub deny: AtomicBool,
    /// Never resolve `acquire`, like a permission prompt left open.
    pub hang: AtomicBool,
    pub tracks: Mutex<Vec<Arc<FakeTrack>>>,
    pub constraints: Mutex<Vec<MicrophoneConstraints>>,
}

impl FakeMicrophoneProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying() -> Arc<Self> {
        let provider = Self::default();
        provider.deny.store(true, Ordering::SeqCst);
        Arc::new(provider)
    }

    pub fn hanging() -> Arc<Self> {
        let provider = Self::default();
        provider.hang.store(true, Ordering::SeqCst);
        Arc::new(provider)
    }

    pub fn last_track(&self) -> Option<Arc<FakeTrack>> {
        self.tracks.lock().last().cloned()
    }

    pub fn acquired(&self) -> usize {
        self.tracks.lock().len()
    }
}

#[async_trait]
impl MicrophoneProvider for FakeMicrophoneProvider {
    async fn acquire(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> AudioResult<Arc<dyn MicrophoneTrack>> {
        self.constraints.lock().push(*constraints);
        if self.hang.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied(
                "microphone access refused".to_string(),
            ));
        }
        let track = FakeTrack::new(constraints.sample_rate);
        self.tracks.lock().push(track.clone());
        Ok(track)
    }
}

// =============================================================================
// Output
// =============================================================================

pub struct FakeOutput {
    sample_rate: u32,
    now: Mutex<f64>,
    next_id: AtomicU64,
    pub started: Mutex<Vec<(SourceId, f64, f64)>>,
    pub stopped: Mutex<Vec<SourceId>>,
    pub resumed: AtomicUsize,
    pub closed: AtomicBool,
    on_ended: SourceEndedCallback,
}

impl FakeOutput {
    pub fn set_time(&self, t: f64) {
        *self.now.lock() = t;
    }

    /// Report a source as finished on its own.
    pub fn finish(&self, id: SourceId) {
        (self.on_ended)(id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<(SourceId, f64, f64)> {
        self.started.lock().clone()
    }
}

impl OutputDevice for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        *self.now.lock()
    }

    fn resume(&self) -> AudioResult<()> {
        self.resumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_source(&self, buffer: AudioBuffer, when: f64) -> AudioResult<SourceId> {
        if self.is_closed() {
            return Err(AudioError::DeviceUnavailable("closed".to_string()));
        }
        let id = SourceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.started.lock().push((id, when, buffer.duration()));
        Ok(id)
    }

    fn stop_source(&self, id: SourceId) {
        self.stopped.lock().push(id);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeOutputProvider {
    pub fail: AtomicBool,
    pub devices: Mutex<Vec<Arc<FakeOutput>>>,
}

impl FakeOutputProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_device(&self) -> Option<Arc<FakeOutput>> {
        self.devices.lock().last().cloned()
    }

    pub fn opened(&self) -> usize {
        self.devices.lock().len()
    }
}

#[async_trait]
impl OutputProvider for FakeOutputProvider {
    async fn open(
        &self,
        sample_rate: u32,
        on_ended: SourceEndedCallback,
    ) -> AudioResult<Arc<dyn OutputDevice>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable(
                "no output device".to_string(),
            ));
        }
        let device = Arc::new(FakeOutput {
            sample_rate,
            now: Mutex::new(0.0),
            next_id: AtomicU64::new(1),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            resumed: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            on_ended,
        });
        self.devices.lock().push(device.clone());
        Ok(device)
    }
}
