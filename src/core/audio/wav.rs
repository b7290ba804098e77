//! WAV-file backed audio devices.
//!
//! [`WavMicrophoneProvider`] plays a mono WAV file into the capture graph at
//! real-time pace and then continues with silence, the way a quiet room would.
//! [`WavOutputProvider`] opens a virtual speaker whose clock is wall time since
//! open. Every scheduled source is placed on a timeline, and the mixed result
//! is written to a WAV file when the device closes. Stopped sources are cut at
//! the stop time, so an interruption shows up in the output file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::codec::AudioBuffer;
use super::device::{
    AudioError, AudioResult, MicrophoneConstraints, MicrophoneProvider, MicrophoneTrack,
    OutputDevice, OutputProvider, SampleCallback, SourceEndedCallback, SourceId,
};

/// Samples per delivered block. 100ms at 16kHz.
pub const DEFAULT_BLOCK_SIZE: usize = 1600;

fn map_hound_error(path: &Path, err: hound::Error) -> AudioError {
    match err {
        hound::Error::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => {
            AudioError::DeviceUnavailable(format!("{}: {}", path.display(), e))
        }
        hound::Error::IoError(e) => AudioError::Io(format!("{}: {}", path.display(), e)),
        other => AudioError::UnsupportedFormat(format!("{}: {}", path.display(), other)),
    }
}

/// Read a WAV file into normalized mono-or-interleaved samples.
pub fn read_samples(path: &Path) -> AudioResult<(hound::WavSpec, Vec<f32>)> {
    let mut reader = hound::WavReader::open(path).map_err(|e| map_hound_error(path, e))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_hound_error(path, e))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| map_hound_error(path, e))?
        }
    };

    Ok((spec, samples))
}

// =============================================================================
// Microphone
// =============================================================================

/// Provides microphone tracks that stream a WAV file.
pub struct WavMicrophoneProvider {
    path: PathBuf,
    block_size: usize,
    finished: CancellationToken,
}

impl WavMicrophoneProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            finished: CancellationToken::new(),
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Cancelled once a track has delivered the whole file.
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }
}

#[async_trait]
impl MicrophoneProvider for WavMicrophoneProvider {
    async fn acquire(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> AudioResult<Arc<dyn MicrophoneTrack>> {
        let path = self.path.clone();
        let (spec, samples) = tokio::task::spawn_blocking(move || read_samples(&path))
            .await
            .map_err(|e| AudioError::Io(e.to_string()))??;

        if spec.channels != constraints.channel_count {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} has {} channels, expected {}",
                self.path.display(),
                spec.channels,
                constraints.channel_count
            )));
        }
        if spec.sample_rate != constraints.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} is {} Hz, expected {} Hz",
                self.path.display(),
                spec.sample_rate,
                constraints.sample_rate
            )));
        }

        tracing::info!(
            "Opened WAV microphone {} ({} samples at {} Hz)",
            self.path.display(),
            samples.len(),
            spec.sample_rate
        );

        Ok(WavMicrophone::spawn(
            samples,
            spec.sample_rate,
            self.block_size,
            self.finished.clone(),
        ))
    }
}

/// A microphone track fed from decoded WAV samples.
///
/// File position only advances while a callback is attached, so audio is not
/// consumed while the session is still connecting.
pub struct WavMicrophone {
    sample_rate: u32,
    callback: Arc<Mutex<Option<SampleCallback>>>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WavMicrophone {
    fn spawn(
        samples: Vec<f32>,
        sample_rate: u32,
        block_size: usize,
        finished: CancellationToken,
    ) -> Arc<Self> {
        let callback: Arc<Mutex<Option<SampleCallback>>> = Arc::new(Mutex::new(None));
        let live = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let period = Duration::from_secs_f64(block_size as f64 / sample_rate as f64);
        let task_callback = callback.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let silence = vec![0.0f32; block_size];
            let mut position = 0usize;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(cb) = task_callback.lock().clone() else {
                    continue;
                };

                if position < samples.len() {
                    let end = (position + block_size).min(samples.len());
                    cb(&samples[position..end]);
                    position = end;
                    if position == samples.len() {
                        tracing::info!("WAV microphone reached end of input");
                        finished.cancel();
                    }
                } else {
                    cb(&silence);
                }
            }
        });

        Arc::new(Self {
            sample_rate,
            callback,
            live,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

impl MicrophoneTrack for WavMicrophone {
    fn attach(&self, callback: SampleCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn detach(&self) {
        self.callback.lock().take();
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.cancel.cancel();
            if let Some(task) = self.task.lock().take() {
                task.abort();
            }
            tracing::debug!("WAV microphone stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for WavMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Output
// =============================================================================

/// Opens virtual speakers that record to a WAV file.
pub struct WavOutputProvider {
    path: PathBuf,
}

impl WavOutputProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OutputProvider for WavOutputProvider {
    async fn open(
        &self,
        sample_rate: u32,
        on_ended: SourceEndedCallback,
    ) -> AudioResult<Arc<dyn OutputDevice>> {
        if sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat(
                "output sample rate must be non-zero".to_string(),
            ));
        }
        tracing::info!(
            "Opened WAV output {} at {} Hz",
            self.path.display(),
            sample_rate
        );
        Ok(Arc::new(WavOutputDevice::new(
            self.path.clone(),
            sample_rate,
            on_ended,
        )))
    }
}

struct PlacedSource {
    start: f64,
    samples: Vec<f32>,
    stop_at: Option<f64>,
}

#[derive(Default)]
struct Timeline {
    placed: HashMap<SourceId, PlacedSource>,
    timers: HashMap<SourceId, JoinHandle<()>>,
}

/// Virtual speaker with a wall-clock device time.
pub struct WavOutputDevice {
    path: PathBuf,
    sample_rate: u32,
    origin: Instant,
    next_id: AtomicU64,
    timeline: Arc<Mutex<Timeline>>,
    on_ended: SourceEndedCallback,
    closed: AtomicBool,
}

impl WavOutputDevice {
    pub fn new(path: PathBuf, sample_rate: u32, on_ended: SourceEndedCallback) -> Self {
        Self {
            path,
            sample_rate,
            origin: Instant::now(),
            next_id: AtomicU64::new(0),
            timeline: Arc::new(Mutex::new(Timeline::default())),
            on_ended,
            closed: AtomicBool::new(false),
        }
    }

    /// Mix everything placed so far into one mono track.
    pub fn render(&self) -> Vec<f32> {
        let timeline = self.timeline.lock();
        let rate = self.sample_rate as f64;

        let audible = |source: &PlacedSource| -> usize {
            let full = source.samples.len();
            match source.stop_at {
                Some(stop) => (((stop - source.start) * rate).round().max(0.0) as usize).min(full),
                None => full,
            }
        };

        let length = timeline
            .placed
            .values()
            .filter(|s| audible(s) > 0)
            .map(|s| (s.start * rate).round() as usize + audible(s))
            .max()
            .unwrap_or(0);

        let mut mix = vec![0.0f32; length];
        for source in timeline.placed.values() {
            let offset = (source.start * rate).round() as usize;
            for (i, sample) in source.samples[..audible(source)].iter().enumerate() {
                mix[offset + i] += sample;
            }
        }
        for sample in mix.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        mix
    }

    fn write(&self, samples: &[f32]) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&self.path, spec)?;
        for &sample in samples {
            writer.write_sample((sample * i16::MAX as f32) as i16)?;
        }
        writer.finalize()
    }
}

fn mixdown(buffer: AudioBuffer) -> Vec<f32> {
    let channels = buffer.channels() as usize;
    if channels == 1 {
        return buffer.into_samples();
    }
    buffer
        .samples()
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

impl OutputDevice for WavOutputDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn resume(&self) -> AudioResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable("output closed".to_string()));
        }
        Ok(())
    }

    fn start_source(&self, buffer: AudioBuffer, when: f64) -> AudioResult<SourceId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable("output closed".to_string()));
        }
        if buffer.sample_rate() != self.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "source is {} Hz, device renders {} Hz",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }

        let id = SourceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let duration = buffer.duration();
        let start = when.max(0.0);
        let ends_at = self.origin + Duration::from_secs_f64(start + duration);

        // Hold the lock until the timer is registered so it cannot fire unseen
        let mut guard = self.timeline.lock();
        guard.placed.insert(
            id,
            PlacedSource {
                start,
                samples: mixdown(buffer),
                stop_at: None,
            },
        );

        let timeline = self.timeline.clone();
        let on_ended = self.on_ended.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(ends_at).await;
            let finished = timeline.lock().timers.remove(&id).is_some();
            if finished {
                on_ended(id);
            }
        });
        guard.timers.insert(id, timer);
        Ok(id)
    }

    fn stop_source(&self, id: SourceId) {
        let now = self.current_time();
        let mut timeline = self.timeline.lock();
        if let Some(timer) = timeline.timers.remove(&id) {
            timer.abort();
            if let Some(source) = timeline.placed.get_mut(&id) {
                source.stop_at = Some(now);
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let now = self.current_time();
        {
            let mut timeline = self.timeline.lock();
            let Timeline { placed, timers } = &mut *timeline;
            // Anything still scheduled is cut off at close time
            for (id, timer) in timers.drain() {
                timer.abort();
                if let Some(source) = placed.get_mut(&id) {
                    source.stop_at = Some(now);
                }
            }
        }

        let mix = self.render();
        match self.write(&mix) {
            Ok(()) => tracing::info!(
                "Wrote {:.2}s of playback to {}",
                mix.len() as f64 / self.sample_rate as f64,
                self.path.display()
            ),
            Err(e) => tracing::error!("Failed to write {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_microphone_streams_file_then_silence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        let pcm: Vec<i16> = (0..250).map(|i| (i * 100) as i16).collect();
        write_wav(&path, 1, 16000, &pcm);

        let provider = WavMicrophoneProvider::new(&path).with_block_size(100);
        let finished = provider.finished();
        let track = provider
            .acquire(&MicrophoneConstraints::default())
            .await
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = received.clone();
        track.attach(Arc::new(move |block: &[f32]| {
            sink.lock().extend_from_slice(block);
        }));

        finished.cancelled().await;
        let got = received.lock().clone();
        assert_eq!(got.len(), 250);
        assert_eq!(got[10], 1000.0 / 32768.0);

        // Keeps delivering silence afterwards
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = received.lock().clone();
        assert!(after.len() > 250);
        assert!(after[250..].iter().all(|s| *s == 0.0));

        track.stop();
        assert!(!track.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_microphone_holds_position_until_attached() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, 1, 16000, &[100, 200, 300]);

        let provider = WavMicrophoneProvider::new(&path).with_block_size(2);
        let track = provider
            .acquire(&MicrophoneConstraints::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let received = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = received.clone();
        track.attach(Arc::new(move |block: &[f32]| {
            sink.lock().extend_from_slice(block);
        }));
        provider.finished().cancelled().await;

        assert_eq!(received.lock()[0], 100.0 / 32768.0);
    }

    #[tokio::test]
    async fn test_microphone_rejects_wrong_format() {
        let dir = tempdir().unwrap();
        let stereo = dir.path().join("stereo.wav");
        write_wav(&stereo, 2, 16000, &[0, 0]);
        let wrong_rate = dir.path().join("rate.wav");
        write_wav(&wrong_rate, 1, 44100, &[0]);

        let constraints = MicrophoneConstraints::default();
        assert!(matches!(
            WavMicrophoneProvider::new(&stereo).acquire(&constraints).await,
            Err(AudioError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            WavMicrophoneProvider::new(&wrong_rate).acquire(&constraints).await,
            Err(AudioError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_microphone_missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let result = WavMicrophoneProvider::new(dir.path().join("absent.wav"))
            .acquire(&MicrophoneConstraints::default())
            .await;
        assert!(matches!(result, Err(AudioError::DeviceUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_natural_end_notifies() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_ended: SourceEndedCallback = Arc::new(move |id: SourceId| {
            let _ = tx.send(id);
        });

        let device = WavOutputProvider::new(dir.path().join("out.wav"))
            .open(1000, on_ended)
            .await
            .unwrap();
        let buffer = AudioBuffer::new(vec![0.5; 100], 1000, 1).unwrap();
        let id = device.start_source(buffer, 0.0).unwrap();

        assert_eq!(rx.recv().await, Some(id));
        assert!(device.current_time() >= 0.1);
        device.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_stop_truncates_and_close_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_ended: SourceEndedCallback = Arc::new(move |id: SourceId| {
            let _ = tx.send(id);
        });

        let device = WavOutputProvider::new(&path)
            .open(1000, on_ended)
            .await
            .unwrap();
        let first = device
            .start_source(AudioBuffer::new(vec![0.5; 1000], 1000, 1).unwrap(), 0.0)
            .unwrap();
        let second = device
            .start_source(AudioBuffer::new(vec![0.5; 1000], 1000, 1).unwrap(), 1.0)
            .unwrap();

        tokio::time::advance(Duration::from_millis(250)).await;
        device.stop_source(first);
        device.stop_source(second);
        device.close();
        device.close();

        assert!(rx.try_recv().is_err());

        let (spec, samples) = read_samples(&path).unwrap();
        assert_eq!(spec.sample_rate, 1000);
        assert_eq!(samples.len(), 250);
        assert!(samples.iter().all(|s| (*s - 0.5).abs() < 0.001));
    }

    #[tokio::test]
    async fn test_output_rejects_rate_mismatch_and_closed() {
        let dir = tempdir().unwrap();
        let on_ended: SourceEndedCallback = Arc::new(|_id: SourceId| {});
        let device = WavOutputProvider::new(dir.path().join("out.wav"))
            .open(24000, on_ended)
            .await
            .unwrap();

        let wrong = AudioBuffer::new(vec![0.0; 10], 16000, 1).unwrap();
        assert!(matches!(
            device.start_source(wrong, 0.0),
            Err(AudioError::UnsupportedFormat(_))
        ));

        device.close();
        let ok = AudioBuffer::new(vec![0.0; 10], 24000, 1).unwrap();
        assert!(device.start_source(ok, 0.0).is_err());
        assert!(device.resume().is_err());
    }
}
