use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::media::StreamKind;
use crate::sync::clock_model::ClockSnapshot;

/// Summary of recent drift measurements, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftStats {
    pub samples: usize,
    pub latest_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Counters kept by the synchronization engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub cycles: u64,
    pub frames_received: u64,
    pub frames_emitted: u64,
    /// Dropped because video ran ahead of audio.
    pub frames_dropped: u64,
    /// Repeat signals sent because video ran behind audio.
    pub frames_duplicated: u64,
    /// Released without display while a source was disconnected.
    pub frames_discarded_degraded: u64,
    pub sequence_gaps: u64,
    pub audio_received: u64,
    pub audio_emitted: u64,
    pub audio_discarded_degraded: u64,
    pub silence_emitted: u64,
    /// Frames per channel handed to playback, silence included.
    pub samples_emitted: u64,
    pub audio_discontinuities: u64,
    pub corrections: u64,
    pub contract_violations: u64,
    pub drift: DriftStats,
}

/// Snapshot of the capture-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub video_queued: u64,
    pub video_pool_exhausted: u64,
    pub video_queue_full: u64,
    pub video_rejected: u64,
    pub audio_queued: u64,
    pub audio_pool_exhausted: u64,
    pub audio_rejected: u64,
    pub audio_overflows: u64,
}

/// Capture-side counters, updated from capture threads.
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub video_queued: AtomicU64,
    pub video_pool_exhausted: AtomicU64,
    pub video_queue_full: AtomicU64,
    pub video_rejected: AtomicU64,
    pub audio_queued: AtomicU64,
    pub audio_pool_exhausted: AtomicU64,
    pub audio_rejected: AtomicU64,
    pub audio_overflows: AtomicU64,
}

impl CaptureCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CaptureStats {
            video_queued: load(&self.video_queued),
            video_pool_exhausted: load(&self.video_pool_exhausted),
            video_queue_full: load(&self.video_queue_full),
            video_rejected: load(&self.video_rejected),
            audio_queued: load(&self.audio_queued),
            audio_pool_exhausted: load(&self.audio_pool_exhausted),
            audio_rejected: load(&self.audio_rejected),
            audio_overflows: load(&self.audio_overflows),
        }
    }
}

/// Buffer pool occupancy and failure counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub kind: StreamKind,
    pub capacity: usize,
    pub checked_out: usize,
    pub high_water_mark: usize,
    pub exhausted: u64,
    pub contract_violations: u64,
}

/// Everything a session exposes for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub engine: EngineMetrics,
    pub clock: ClockSnapshot,
    pub degraded: bool,
    pub capture: CaptureStats,
    pub video_pool: Option<PoolStats>,
    pub audio_pool: Option<PoolStats>,
}
