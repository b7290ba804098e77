//! Microphone capture graph.
//!
//! The device clock pushes raw sample blocks of arbitrary size into a
//! fixed-size processing node. Every time the node fills it emits one
//! capture frame, which is encoded to PCM 16-bit and queued for the
//! outbound sender. A single pump task drains the queue and awaits each send
//! before taking the next frame, so frames leave in capture order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec;
use super::device::MicrophoneTrack;

/// Default processing node size in samples.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Encoded frames buffered between the device callback and the sender.
const FRAME_QUEUE_CAPACITY: usize = 32;

/// Async sink for encoded capture frames.
pub type FrameSender =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Collects raw sample blocks into fixed-size frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append a block, returning every frame it completed.
    pub fn push(&mut self, mut block: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        while !block.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(block.len());
            self.pending.extend_from_slice(&block[..take]);
            block = &block[take..];

            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        frames
    }

    /// Samples waiting for the current frame to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
}

/// Owns the microphone track and the frame pipeline for one session.
pub struct CaptureGraph {
    frame_size: usize,
    active: Arc<AtomicBool>,
    track: Option<Arc<dyn MicrophoneTrack>>,
    pump: Option<JoinHandle<()>>,
    stats: Arc<CaptureStats>,
}

impl CaptureGraph {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            active: Arc::new(AtomicBool::new(false)),
            track: None,
            pump: None,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Whether frames are currently flowing to the sender.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the graph still holds a live microphone track.
    pub fn has_live_track(&self) -> bool {
        self.track.as_ref().is_some_and(|t| t.is_live())
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Begin streaming frames from `track` to `sender`.
    ///
    /// `session_live` is the owning session's connected flag; frames produced
    /// while it is false are dropped. Must be called inside a Tokio runtime.
    pub fn start(
        &mut self,
        track: Arc<dyn MicrophoneTrack>,
        session_live: Arc<AtomicBool>,
        sender: FrameSender,
    ) {
        self.stop();

        let (tx, mut rx) = mpsc::channel::<Bytes>(FRAME_QUEUE_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));
        self.active = active.clone();

        let accumulator = Mutex::new(FrameAccumulator::new(self.frame_size));
        let cb_active = active.clone();
        let cb_live = session_live.clone();
        let cb_stats = self.stats.clone();
        track.attach(Arc::new(move |block: &[f32]| {
            if !cb_active.load(Ordering::SeqCst) || !cb_live.load(Ordering::SeqCst) {
                cb_stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }

            let frames = accumulator.lock().push(block);
            for frame in frames {
                let encoded = Bytes::from(codec::encode(&frame));
                if tx.try_send(encoded).is_err() {
                    cb_stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Capture queue full, dropping frame");
                }
            }
        }));

        let pump_stats = self.stats.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                // Re-check after the queue hop; teardown may have raced us.
                if !active.load(Ordering::SeqCst) || !session_live.load(Ordering::SeqCst) {
                    pump_stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                tracing::trace!("Sending capture frame ({} bytes)", frame.len());
                sender(frame).await;
                pump_stats.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
        }));

        self.track = Some(track);
        tracing::info!("Capture started ({} samples per frame)", self.frame_size);
    }

    /// Detach the callback and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);

        if let Some(track) = self.track.take() {
            track.detach();
            track.stop();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        if was_active {
            tracing::info!("Capture stopped");
        }
    }
}

impl Drop for CaptureGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::device::SampleCallback;

    #[derive(Default)]
    struct FakeTrack {
        callback: Mutex<Option<SampleCallback>>,
        live: AtomicBool,
        stop_calls: AtomicU64,
    }

    impl FakeTrack {
        fn new() -> Arc<Self> {
            let track = Self::default();
            track.live.store(true, Ordering::SeqCst);
            Arc::new(track)
        }

        fn emit(&self, block: &[f32]) {
            let cb = self.callback.lock().clone();
            if let Some(cb) = cb {
                cb(block);
            }
        }
    }

    impl MicrophoneTrack for FakeTrack {
        fn attach(&self, callback: SampleCallback) {
            *self.callback.lock() = Some(callback);
        }
        fn detach(&self) {
            *self.callback.lock() = None;
        }
        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.live.store(false, Ordering::SeqCst);
        }
        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
        fn sample_rate(&self) -> u32 {
            16000
        }
    }

    fn collecting_sender() -> (FrameSender, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender: FrameSender = Arc::new(move |frame: Bytes| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(frame);
            })
        });
        (sender, rx)
    }

    #[test]
    fn test_accumulator_splits_and_carries() {
        let mut acc = FrameAccumulator::new(4);
        assert!(acc.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(acc.pending(), 3);

        let frames = acc.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(acc.pending(), 1);
    }

    #[test]
    fn test_accumulator_empty_block() {
        let mut acc = FrameAccumulator::new(4);
        assert!(acc.push(&[]).is_empty());
        assert_eq!(acc.pending(), 0);
    }

    #[tokio::test]
    async fn test_frames_are_encoded_in_order() {
        let track = FakeTrack::new();
        let live = Arc::new(AtomicBool::new(true));
        let (sender, mut rx) = collecting_sender();

        let mut graph = CaptureGraph::new(2);
        graph.start(track.clone(), live, sender);
        assert!(graph.is_active());

        track.emit(&[0.0, 0.5, -0.5]);
        track.emit(&[1.0]);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.as_ref(), codec::encode(&[0.0, 0.5]).as_slice());
        assert_eq!(second.as_ref(), codec::encode(&[-0.5, 1.0]).as_slice());
    }

    #[tokio::test]
    async fn test_frames_dropped_when_session_not_live() {
        let track = FakeTrack::new();
        let live = Arc::new(AtomicBool::new(false));
        let (sender, mut rx) = collecting_sender();

        let mut graph = CaptureGraph::new(2);
        graph.start(track.clone(), live.clone(), sender);
        track.emit(&[0.1, 0.2]);

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(graph.stats().frames_dropped.load(Ordering::Relaxed), 1);

        live.store(true, Ordering::SeqCst);
        track.emit(&[0.3, 0.4]);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_track() {
        let track = FakeTrack::new();
        let (sender, _rx) = collecting_sender();

        let mut graph = CaptureGraph::new(DEFAULT_FRAME_SIZE);
        graph.start(track.clone(), Arc::new(AtomicBool::new(true)), sender);
        assert!(graph.has_live_track());

        graph.stop();
        graph.stop();

        assert!(!graph.is_active());
        assert!(!graph.has_live_track());
        assert!(!track.is_live());
        assert!(track.callback.lock().is_none());
        assert_eq!(track.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut graph = CaptureGraph::new(DEFAULT_FRAME_SIZE);
        graph.stop();
        assert!(!graph.is_active());
    }
}
