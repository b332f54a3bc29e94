use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::media::{FrameHeader, SampleHeader};
use crate::timing::clock::{nanos_to_millis, MonotonicInstant};

/// Stream whose clock is never adjusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceClock {
    #[default]
    Audio,
}

/// How a captured audio batch lines up with the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContinuity {
    First,
    Continuous,
    /// Start timestamp deviated from the expected one by `gap_ns`.
    Discontinuity { gap_ns: i64 },
}

/// Corrective action applied to the video timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    Drop,
    Duplicate,
}

/// Read-only copy of the clock model, published for other threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub reference: ReferenceClock,
    pub audio_position: Option<MonotonicInstant>,
    pub samples_played: u64,
    pub last_presentation: Option<MonotonicInstant>,
    pub drift_ms: f64,
    pub timeline_correction_ms: f64,
    pub frame_interval_ms: f64,
    pub consecutive_corrections: u32,
    pub last_correction_at: Option<MonotonicInstant>,
}

/// Synchronization state for one playback session.
///
/// Owned and mutated only by the engine. Audio is the master: its position
/// is the capture time of the audio most recently handed to playback
/// (anchor plus samples played). Video frames are measured against it
/// through the presentation timeline, `capture - timeline_correction`.
/// Each drop pulls that timeline back by one frame interval and each
/// duplicate pushes it forward by one.
#[derive(Debug, Clone)]
pub struct ClockModel {
    reference: ReferenceClock,
    audio_position: Option<MonotonicInstant>,
    samples_played: u64,
    expected_next_audio: Option<MonotonicInstant>,
    silence_since_audio: bool,
    last_presentation: Option<MonotonicInstant>,
    last_frame: Option<(MonotonicInstant, u64)>,
    nominal_frame_interval_ns: u64,
    frame_interval_ns: u64,
    timeline_correction_ns: i64,
    drift_ns: i64,
    consecutive_corrections: u32,
    last_correction_at: Option<MonotonicInstant>,
}

impl ClockModel {
    pub fn new(nominal_frame_interval: Duration) -> Self {
        let nominal = u64::try_from(nominal_frame_interval.as_nanos())
            .unwrap_or(u64::MAX)
            .max(1);
        Self {
            reference: ReferenceClock::Audio,
            audio_position: None,
            samples_played: 0,
            expected_next_audio: None,
            silence_since_audio: false,
            last_presentation: None,
            last_frame: None,
            nominal_frame_interval_ns: nominal,
            frame_interval_ns: nominal,
            timeline_correction_ns: 0,
            drift_ns: 0,
            consecutive_corrections: 0,
            last_correction_at: None,
        }
    }

    /// Back to the initial state: no drift, no pending corrections, cool-down elapsed.
    pub fn reset(&mut self) {
        *self = Self::new(Duration::from_nanos(self.nominal_frame_interval_ns));
    }

    pub fn reference(&self) -> ReferenceClock {
        self.reference
    }

    pub fn audio_position(&self) -> Option<MonotonicInstant> {
        self.audio_position
    }

    pub fn samples_played(&self) -> u64 {
        self.samples_played
    }

    pub fn drift_ns(&self) -> i64 {
        self.drift_ns
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(self.frame_interval_ns)
    }

    pub fn last_presentation(&self) -> Option<MonotonicInstant> {
        self.last_presentation
    }

    pub fn consecutive_corrections(&self) -> u32 {
        self.consecutive_corrections
    }

    /// Advance the audio position past a captured batch.
    ///
    /// The position is re-anchored on the batch start when it is the first
    /// batch, when it breaks continuity by more than `tolerance`, or when
    /// silence was substituted since the previous batch.
    pub fn advance_audio(&mut self, header: &SampleHeader, tolerance: Duration) -> AudioContinuity {
        let tolerance_ns = u64::try_from(tolerance.as_nanos()).unwrap_or(u64::MAX);
        let continuity = match self.expected_next_audio {
            None => AudioContinuity::First,
            Some(expected) => {
                let gap_ns = header.timestamp.offset_from(expected);
                if gap_ns.unsigned_abs() > tolerance_ns {
                    AudioContinuity::Discontinuity { gap_ns }
                } else {
                    AudioContinuity::Continuous
                }
            }
        };

        let base = match (continuity, self.audio_position) {
            (AudioContinuity::Continuous, Some(position)) if !self.silence_since_audio => position,
            _ => header.timestamp,
        };
        self.audio_position = Some(base + header.duration());
        self.samples_played += u64::from(header.sample_count);
        self.expected_next_audio = Some(header.expected_next_timestamp());
        self.silence_since_audio = false;
        continuity
    }

    /// Advance the audio position past a synthesized silent batch.
    pub fn advance_silence(&mut self, header: &SampleHeader) {
        if let Some(position) = self.audio_position {
            self.audio_position = Some(position + header.duration());
        }
        self.samples_played += u64::from(header.sample_count);
        self.silence_since_audio = true;
    }

    /// Update the frame interval estimate; returns how many sequence numbers
    /// were skipped since the previous frame.
    pub fn observe_frame(&mut self, header: &FrameHeader) -> u64 {
        let mut gap = 0;
        if let Some((previous_ts, previous_seq)) = self.last_frame {
            if header.sequence > previous_seq {
                let steps = header.sequence - previous_seq;
                gap = steps - 1;
                let delta = header.timestamp.offset_from(previous_ts);
                if delta > 0 {
                    let measured = delta.unsigned_abs() / steps;
                    self.frame_interval_ns = (self.frame_interval_ns * 7 + measured) / 8;
                }
            }
        }
        self.last_frame = Some((header.timestamp, header.sequence));
        gap
    }

    pub fn presentation_time(&self, capture: MonotonicInstant) -> MonotonicInstant {
        capture.shifted(-self.timeline_correction_ns)
    }

    /// Drift of a frame against the audio position (video ahead is positive).
    ///
    /// `None` until audio has established a position.
    pub fn measure_drift(&mut self, capture: MonotonicInstant) -> Option<i64> {
        let position = self.audio_position?;
        let drift = capture
            .offset_from(position)
            .saturating_sub(self.timeline_correction_ns);
        self.drift_ns = drift;
        Some(drift)
    }

    pub fn cooldown_elapsed(&self, now: MonotonicInstant, cooldown: Duration) -> bool {
        match self.last_correction_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= cooldown,
        }
    }

    pub fn apply_correction(&mut self, correction: Correction, now: MonotonicInstant) {
        let interval = i64::try_from(self.frame_interval_ns).unwrap_or(i64::MAX);
        self.timeline_correction_ns = match correction {
            Correction::Drop => self.timeline_correction_ns.saturating_add(interval),
            Correction::Duplicate => self.timeline_correction_ns.saturating_sub(interval),
        };
        self.consecutive_corrections += 1;
        self.last_correction_at = Some(now);
    }

    /// A frame landed inside the threshold band.
    pub fn settle(&mut self) {
        self.consecutive_corrections = 0;
    }

    pub fn record_presented(&mut self, capture: MonotonicInstant) {
        self.last_presentation = Some(self.presentation_time(capture));
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            reference: self.reference,
            audio_position: self.audio_position,
            samples_played: self.samples_played,
            last_presentation: self.last_presentation,
            drift_ms: nanos_to_millis(self.drift_ns),
            timeline_correction_ms: nanos_to_millis(self.timeline_correction_ns),
            frame_interval_ms: self.frame_interval_ns as f64 / 1_000_000.0,
            consecutive_corrections: self.consecutive_corrections,
            last_correction_at: self.last_correction_at,
        }
    }
}
