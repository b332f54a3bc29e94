//! Render and playback consumers that behave like real output devices
//! (hold the frame on screen, consume audio) and record what they received.

use std::sync::Arc;

use parking_lot::Mutex;

use av_sync_core::models::media::{AudioUnit, VideoUnit};
use av_sync_core::timing::clock::MonotonicInstant;
use av_sync_core::traits::consumers::{PlaybackConsumer, RenderConsumer, RenderEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRecord {
    Frame {
        sequence: u64,
        timestamp: MonotonicInstant,
    },
    Repeat {
        sequence: u64,
        timestamp: MonotonicInstant,
    },
}

/// What the renderer has shown so far.
#[derive(Debug, Clone, Default)]
pub struct RenderLog {
    /// First records received, up to the renderer's record limit.
    pub records: Vec<RenderRecord>,
    pub frames: u64,
    pub repeats: u64,
    /// Sequence of the frame currently on screen.
    pub on_screen: Option<u64>,
    pub release_errors: u64,
}

/// Renderer that keeps the latest frame "on screen" and releases the one it
/// replaces.
pub struct RecordingRenderer {
    current: Option<VideoUnit>,
    max_records: usize,
    log: Arc<Mutex<RenderLog>>,
}

impl RecordingRenderer {
    pub fn new(max_records: usize) -> Self {
        Self {
            current: None,
            max_records,
            log: Arc::new(Mutex::new(RenderLog::default())),
        }
    }

    /// Shared view of the log; stays valid after the renderer is handed over.
    pub fn log_handle(&self) -> Arc<Mutex<RenderLog>> {
        Arc::clone(&self.log)
    }

    fn release(&self, unit: VideoUnit) {
        if let Err(e) = unit.release() {
            log::error!("renderer failed to release frame: {}", e);
            self.log.lock().release_errors += 1;
        }
    }
}

impl RenderConsumer for RecordingRenderer {
    fn present(&mut self, event: RenderEvent) {
        let record = match &event {
            RenderEvent::Frame(unit) => RenderRecord::Frame {
                sequence: unit.sequence(),
                timestamp: unit.timestamp(),
            },
            RenderEvent::Repeat {
                sequence,
                timestamp,
            } => RenderRecord::Repeat {
                sequence: *sequence,
                timestamp: *timestamp,
            },
        };

        {
            let mut log = self.log.lock();
            if log.records.len() < self.max_records {
                log.records.push(record);
            }
            match record {
                RenderRecord::Frame { sequence, .. } => {
                    log.frames += 1;
                    log.on_screen = Some(sequence);
                }
                RenderRecord::Repeat { .. } => log.repeats += 1,
            }
        }

        if let RenderEvent::Frame(unit) = event {
            if let Some(previous) = self.current.replace(unit) {
                self.release(previous);
            }
        }
    }

    fn on_stop(&mut self) {
        if let Some(unit) = self.current.take() {
            self.release(unit);
        }
    }
}

/// What the playback device has consumed so far.
#[derive(Debug, Clone, Default)]
pub struct PlaybackLog {
    pub batches: u64,
    pub silent_batches: u64,
    /// Frames per channel played, silence included.
    pub frames_played: u64,
    pub peak: f32,
    pub last_timestamp: Option<MonotonicInstant>,
    pub release_errors: u64,
}

/// Playback that copies each batch out (as a device would) and releases it.
pub struct RecordingPlayback {
    scratch: Vec<f32>,
    log: Arc<Mutex<PlaybackLog>>,
}

impl RecordingPlayback {
    pub fn new() -> Self {
        Self {
            scratch: Vec::new(),
            log: Arc::new(Mutex::new(PlaybackLog::default())),
        }
    }

    pub fn log_handle(&self) -> Arc<Mutex<PlaybackLog>> {
        Arc::clone(&self.log)
    }
}

impl Default for RecordingPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackConsumer for RecordingPlayback {
    fn play(&mut self, unit: AudioUnit) {
        unit.copy_to(&mut self.scratch);
        let peak = self.scratch.iter().fold(0.0f32, |m, s| m.max(s.abs()));

        let mut log = self.log.lock();
        log.batches += 1;
        if unit.is_silence() {
            log.silent_batches += 1;
        }
        log.frames_played += u64::from(unit.header.sample_count);
        log.peak = log.peak.max(peak);
        log.last_timestamp = Some(unit.header.timestamp);
        if let Err(e) = unit.release() {
            log::error!("playback failed to release batch: {}", e);
            log.release_errors += 1;
        }
    }
}
