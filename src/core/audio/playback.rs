//! Gapless sequential playback of inbound audio chunks.
//!
//! Chunks arrive at irregular intervals. Each one is scheduled on the output
//! device clock at a cursor that only moves forward: a chunk starts at
//! `max(cursor, now)` and pushes the cursor to its end, so consecutive chunks
//! play back-to-back with no overlap. Interruption stops everything that was
//! scheduled and snaps the cursor back to the device clock.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::codec::AudioBuffer;
use super::device::{AudioError, AudioResult, OutputDevice, SourceId};

/// A chunk placed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: SourceId,
    /// Start time on the device clock, seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Owns the playback cursor and the set of in-flight sources.
///
/// All mutation goes through `&mut self`, so scheduling a chunk and advancing
/// the cursor happen as one step with respect to other arrivals.
pub struct PlaybackScheduler {
    device: Option<Arc<dyn OutputDevice>>,
    cursor: f64,
    pending: BTreeMap<SourceId, ScheduledChunk>,
}

impl PlaybackScheduler {
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self {
            device: Some(device),
            cursor: 0.0,
            pending: BTreeMap::new(),
        }
    }

    /// Start time the next chunk would get if it arrived now.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &ScheduledChunk> {
        self.pending.values()
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Resume a suspended output device.
    pub fn resume(&self) -> AudioResult<()> {
        match self.device.as_ref() {
            Some(device) => device.resume(),
            None => Err(AudioError::DeviceUnavailable(
                "output device closed".to_string(),
            )),
        }
    }

    /// Schedule a decoded chunk immediately after everything already queued.
    ///
    /// Empty buffers are skipped without touching the cursor. If the device
    /// rejects the source the cursor is left where it was.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> AudioResult<Option<ScheduledChunk>> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| AudioError::DeviceUnavailable("output device closed".to_string()))?;

        if buffer.is_empty() {
            return Ok(None);
        }

        let start = self.cursor.max(device.current_time());
        let duration = buffer.duration();
        let id = device.start_source(buffer, start)?;
        self.cursor = start + duration;

        let chunk = ScheduledChunk {
            id,
            start,
            duration,
        };
        self.pending.insert(id, chunk);
        tracing::trace!(
            "Scheduled {} at {:.3}s for {:.3}s ({} pending)",
            id,
            start,
            duration,
            self.pending.len()
        );
        Ok(Some(chunk))
    }

    /// Forget a source that finished on its own. Returns false for unknown ids.
    pub fn complete(&mut self, id: SourceId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Silence everything scheduled and reset the cursor to the device clock.
    ///
    /// Returns the number of sources that were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();
        if let Some(device) = self.device.as_ref() {
            self.cursor = device.current_time();
        }
        if stopped > 0 {
            tracing::debug!("Playback interrupted, stopped {} sources", stopped);
        }
        stopped
    }

    /// Stop every source, then release the output device. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop_all();
        if let Some(device) = self.device.take() {
            device.close();
            tracing::debug!("Output device closed");
        }
    }

    fn stop_all(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        if let Some(device) = self.device.as_ref() {
            for id in pending.keys() {
                device.stop_source(*id);
            }
        }
        pending.len()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
