use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SyncError;
use crate::processing::buffer_pool::recommended_capacity;

/// Largest accepted exchange queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Largest accepted buffer pool capacity.
pub const MAX_POOL_CAPACITY: usize = 1 << 20;

/// Configuration for a synchronization session.
///
/// Supplied once at `configure`; nothing is reconfigured at runtime. Fields
/// missing from a JSON document take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Video exchange queue capacity (rounded up to a power of two, default: 8).
    pub video_queue_capacity: usize,

    /// Audio exchange queue capacity (rounded up to a power of two, default: 32).
    /// Sized from the sample-batch cadence so audio never backs up.
    pub audio_queue_capacity: usize,

    /// Video pool slots, or None to derive from the queue capacity.
    pub video_pool_capacity: Option<usize>,

    /// Audio pool slots, or None to derive from the queue capacity.
    pub audio_pool_capacity: Option<usize>,

    /// Bytes preallocated per video slot (default: one 1080p YUYV frame).
    pub video_slot_bytes: usize,

    /// Interleaved samples preallocated per audio slot (default: 4096).
    pub audio_slot_samples: usize,

    /// Drift magnitude beyond which video is corrected, in ms (default: 40).
    pub high_threshold_ms: u64,

    /// Minimum interval between corrections, in ms (default: 200).
    pub correction_cooldown_ms: u64,

    /// Allowed gap between consecutive audio batches before a discontinuity
    /// is flagged, in ms (default: 5).
    pub audio_discontinuity_tolerance_ms: u64,

    /// Frame rate assumed until the frame interval can be measured (default: 60).
    pub nominal_frame_rate: f64,

    /// Audio format used for synthesized silence until real audio is seen.
    pub expected_sample_rate: u32,
    pub expected_channels: u16,
    /// Frames per channel in one synthesized silent batch (default: 480 = 10 ms).
    pub silence_sample_count: u32,

    /// Engine sleep when a cycle finds both queues empty, in µs (default: 500).
    pub idle_sleep_us: u64,

    /// Drift measurements kept for observability (default: 256).
    pub drift_history_len: usize,

    /// Supervisor wake-up interval for metrics publication, in ms (default: 100).
    pub supervisor_tick_ms: u64,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.video_queue_capacity == 0 || self.audio_queue_capacity == 0 {
            return Err("queue capacities must be positive".into());
        }
        if self.video_queue_capacity > MAX_QUEUE_CAPACITY
            || self.audio_queue_capacity > MAX_QUEUE_CAPACITY
        {
            return Err(format!(
                "queue capacities must not exceed {}",
                MAX_QUEUE_CAPACITY
            ));
        }
        if self.video_pool_capacity == Some(0) || self.audio_pool_capacity == Some(0) {
            return Err("pool capacities must be positive".into());
        }
        if self
            .video_pool_capacity
            .max(self.audio_pool_capacity)
            .is_some_and(|capacity| capacity > MAX_POOL_CAPACITY)
        {
            return Err(format!(
                "pool capacities must not exceed {}",
                MAX_POOL_CAPACITY
            ));
        }
        if self.high_threshold_ms == 0 {
            return Err("high threshold must be positive".into());
        }
        if !(self.nominal_frame_rate > 0.0 && self.nominal_frame_rate <= 1000.0) {
            return Err(format!(
                "unsupported nominal frame rate: {}",
                self.nominal_frame_rate
            ));
        }
        if self.expected_sample_rate == 0 {
            return Err("expected sample rate must be positive".into());
        }
        if self.expected_channels == 0 {
            return Err("expected channel count must be positive".into());
        }
        if self.silence_sample_count == 0 {
            return Err("silence batch must hold at least one sample".into());
        }
        if self.drift_history_len == 0 {
            return Err("drift history must hold at least one measurement".into());
        }
        Ok(())
    }

    /// Parse a JSON document handed over by the configuration layer.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SyncError::ConfigurationFailed(format!("invalid config JSON: {}", e)))?;
        config.validate().map_err(SyncError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn effective_video_queue_capacity(&self) -> usize {
        self.video_queue_capacity
            .clamp(1, MAX_QUEUE_CAPACITY)
            .next_power_of_two()
    }

    pub fn effective_audio_queue_capacity(&self) -> usize {
        self.audio_queue_capacity
            .clamp(1, MAX_QUEUE_CAPACITY)
            .next_power_of_two()
    }

    pub fn effective_video_pool_capacity(&self) -> usize {
        self.video_pool_capacity
            .unwrap_or_else(|| recommended_capacity(self.effective_video_queue_capacity()))
    }

    pub fn effective_audio_pool_capacity(&self) -> usize {
        self.audio_pool_capacity
            .unwrap_or_else(|| recommended_capacity(self.effective_audio_queue_capacity()))
    }

    pub fn high_threshold(&self) -> Duration {
        Duration::from_millis(self.high_threshold_ms)
    }

    pub fn correction_cooldown(&self) -> Duration {
        Duration::from_millis(self.correction_cooldown_ms)
    }

    pub fn audio_discontinuity_tolerance(&self) -> Duration {
        Duration::from_millis(self.audio_discontinuity_tolerance_ms)
    }

    pub fn nominal_frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.nominal_frame_rate)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }

    pub fn supervisor_tick(&self) -> Duration {
        Duration::from_millis(self.supervisor_tick_ms.max(1))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            video_queue_capacity: 8,
            audio_queue_capacity: 32,
            video_pool_capacity: None,
            audio_pool_capacity: None,
            video_slot_bytes: 1920 * 1080 * 2,
            audio_slot_samples: 4096,
            high_threshold_ms: 40,
            correction_cooldown_ms: 200,
            audio_discontinuity_tolerance_ms: 5,
            nominal_frame_rate: 60.0,
            expected_sample_rate: 48_000,
            expected_channels: 2,
            silence_sample_count: 480,
            idle_sleep_us: 500,
            drift_history_len: 256,
            supervisor_tick_ms: 100,
        }
    }
}
