use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::config::SyncConfig;
use crate::models::error::PoolError;
use crate::models::media::{AudioUnit, FrameHeader, SampleHeader, StreamKind, VideoUnit};
use crate::models::metrics::EngineMetrics;
use crate::processing::drift_history::DriftHistory;
use crate::processing::exchange_queue::Consumer;
use crate::sync::clock_model::{AudioContinuity, ClockModel, ClockSnapshot, Correction};
use crate::timing::clock::{nanos_to_millis, MonotonicInstant};
use crate::traits::consumers::{PlaybackConsumer, RenderConsumer, RenderEvent};

/// Silent batches the cadence may fall behind before it re-anchors to now.
const MAX_SILENCE_BACKLOG: u32 = 4;

/// Control input delivered to the engine between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineControl {
    SourceDisconnected(StreamKind),
    SourceRecovered(StreamKind),
    ResetClock,
}

/// What one engine cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Captured audio units taken off the queue.
    pub audio_units: u32,
    /// Video units taken off the queue.
    pub video_units: u32,
    pub silence_units: u32,
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        self.audio_units == 0 && self.video_units == 0 && self.silence_units == 0
    }
}

/// Read-only view of the engine, published after each cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub clock: ClockSnapshot,
    pub metrics: EngineMetrics,
    pub degraded: bool,
}

/// Audio-master synchronization engine.
///
/// Runs on a single thread: each `step` takes at most one audio unit and
/// one video frame, decides drop / duplicate / pass-through for the frame,
/// and hands everything to the consumers. Owns the clock model and both
/// queue consumers.
///
/// Playback is fed from the first cycle: whenever no captured batch is
/// available on cadence, a silent batch in the configured format takes its
/// place. Losing either source puts the engine in degraded mode, which
/// treats both streams alike: captured video and audio are released
/// unplayed, the last frame stays on screen and silence keeps the cadence.
pub struct SyncEngine {
    video: Consumer<VideoUnit>,
    audio: Consumer<AudioUnit>,
    render: Box<dyn RenderConsumer>,
    playback: Box<dyn PlaybackConsumer>,
    clock: ClockModel,
    history: DriftHistory,
    metrics: EngineMetrics,
    high_threshold_ns: u64,
    cooldown: Duration,
    audio_tolerance: Duration,
    last_emitted: Option<FrameHeader>,
    /// Format of synthesized silence; follows the last captured batch.
    silence_header: SampleHeader,
    /// When the next batch is due; `None` until the first cycle.
    audio_due: Option<MonotonicInstant>,
    lost: [bool; 2],
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        video: Consumer<VideoUnit>,
        audio: Consumer<AudioUnit>,
        render: Box<dyn RenderConsumer>,
        playback: Box<dyn PlaybackConsumer>,
    ) -> Self {
        Self {
            video,
            audio,
            render,
            playback,
            clock: ClockModel::new(config.nominal_frame_interval()),
            history: DriftHistory::new(config.drift_history_len),
            metrics: EngineMetrics::default(),
            high_threshold_ns: u64::try_from(config.high_threshold().as_nanos())
                .unwrap_or(u64::MAX),
            cooldown: config.correction_cooldown(),
            audio_tolerance: config.audio_discontinuity_tolerance(),
            last_emitted: None,
            silence_header: SampleHeader {
                channels: config.expected_channels,
                sample_rate: config.expected_sample_rate,
                sample_count: config.silence_sample_count,
                timestamp: MonotonicInstant::ZERO,
                sequence: 0,
            },
            audio_due: None,
            lost: [false; 2],
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.lost.iter().any(|&lost| lost)
    }

    pub fn clock(&self) -> &ClockModel {
        &self.clock
    }

    pub fn metrics(&self) -> EngineMetrics {
        let mut metrics = self.metrics;
        metrics.drift = self.history.stats();
        metrics
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            clock: self.clock.snapshot(),
            metrics: self.metrics(),
            degraded: self.is_degraded(),
        }
    }

    /// Run one cycle at time `now`.
    pub fn step(&mut self, now: MonotonicInstant) -> StepOutcome {
        self.metrics.cycles += 1;
        let mut outcome = StepOutcome::default();
        if self.audio_due.is_none() {
            self.audio_due = Some(now + self.silence_header.duration());
        }

        if self.is_degraded() {
            self.step_degraded(now, &mut outcome);
            return outcome;
        }

        match self.audio.try_pop() {
            Some(unit) => {
                outcome.audio_units = 1;
                self.emit_audio(unit, now);
            }
            None => {
                if self.substitute_silence(now) {
                    outcome.silence_units = 1;
                }
            }
        }

        if let Some(unit) = self.video.try_pop() {
            outcome.video_units = 1;
            self.process_frame(unit, now);
        }

        outcome
    }

    pub fn handle_control(&mut self, control: EngineControl, now: MonotonicInstant) {
        match control {
            EngineControl::SourceDisconnected(kind) => {
                let was_degraded = self.is_degraded();
                self.lost[kind.index()] = true;
                if !was_degraded {
                    log::warn!("{} source lost; freezing video and substituting silence", kind);
                    // Silence starts right away unless a batch is still playing.
                    let next = now + self.silence_header.duration();
                    self.audio_due = Some(self.audio_due.map_or(now, |due| due.min(next)));
                }
            }
            EngineControl::SourceRecovered(kind) => {
                if !self.lost[kind.index()] {
                    return;
                }
                self.lost[kind.index()] = false;
                if !self.is_degraded() {
                    log::info!("{} source recovered; resynchronizing", kind);
                    self.clock.reset();
                }
            }
            EngineControl::ResetClock => {
                log::debug!("clock model reset");
                self.clock.reset();
            }
        }
    }

    /// Release everything still queued, stop both consumers and return the
    /// final snapshot.
    pub fn shutdown(mut self) -> EngineSnapshot {
        let mut drained = 0usize;
        for unit in self.video.drain() {
            drained += 1;
            if let Err(error) = unit.release() {
                contract_violation(&mut self.metrics, &error);
            }
        }
        for unit in self.audio.drain() {
            drained += 1;
            if let Err(error) = unit.release() {
                contract_violation(&mut self.metrics, &error);
            }
        }
        if drained > 0 {
            log::debug!("released {} queued units at shutdown", drained);
        }
        self.render.on_stop();
        self.playback.on_stop();
        self.snapshot()
    }

    fn step_degraded(&mut self, now: MonotonicInstant, outcome: &mut StepOutcome) {
        for unit in self.audio.drain() {
            outcome.audio_units += 1;
            self.metrics.audio_received += 1;
            self.metrics.audio_discarded_degraded += 1;
            if let Err(error) = unit.release() {
                contract_violation(&mut self.metrics, &error);
            }
        }
        for unit in self.video.drain() {
            outcome.video_units += 1;
            self.metrics.frames_received += 1;
            self.metrics.frames_discarded_degraded += 1;
            if let Err(error) = unit.release() {
                contract_violation(&mut self.metrics, &error);
            }
        }
        if self.substitute_silence(now) {
            outcome.silence_units = 1;
        }
    }

    fn emit_audio(&mut self, mut unit: AudioUnit, now: MonotonicInstant) {
        self.metrics.audio_received += 1;
        if let Err(error) = unit.hand_to_consumer() {
            contract_violation(&mut self.metrics, &error);
            if let Err(error) = unit.release() {
                contract_violation(&mut self.metrics, &error);
            }
            return;
        }

        let header = unit.header;
        if let AudioContinuity::Discontinuity { gap_ns } =
            self.clock.advance_audio(&header, self.audio_tolerance)
        {
            self.metrics.audio_discontinuities += 1;
            log::debug!(
                "audio batch {} off by {:.2} ms; re-anchoring",
                header.sequence,
                nanos_to_millis(gap_ns)
            );
        }

        self.silence_header = header;
        self.audio_due = Some(now + header.duration() + self.audio_tolerance);
        self.metrics.audio_emitted += 1;
        self.metrics.samples_emitted += u64::from(header.sample_count);
        self.playback.play(unit);
    }

    /// Emit one silent batch if the next batch is overdue.
    fn substitute_silence(&mut self, now: MonotonicInstant) -> bool {
        let Some(due) = self.audio_due else {
            return false;
        };
        if now < due {
            return false;
        }

        let duration = self.silence_header.duration();
        let backlog = duration * MAX_SILENCE_BACKLOG;
        let due = if now.saturating_duration_since(due) > backlog {
            log::debug!(
                "silence cadence {} ms behind; re-anchoring",
                now.saturating_duration_since(due).as_millis()
            );
            now
        } else {
            due
        };
        self.audio_due = Some(due + duration);

        let header = SampleHeader {
            timestamp: self.clock.audio_position().unwrap_or(now),
            ..self.silence_header
        };
        self.clock.advance_silence(&header);
        self.metrics.silence_emitted += 1;
        self.metrics.samples_emitted += u64::from(header.sample_count);
        self.playback.play(AudioUnit::silence(header));
        true
    }

    fn process_frame(&mut self, unit: VideoUnit, now: MonotonicInstant) {
        self.metrics.frames_received += 1;
        let gap = self.clock.observe_frame(&unit.header);
        if gap > 0 {
            self.metrics.sequence_gaps += gap;
            log::debug!("{} frames missing before sequence {}", gap, unit.sequence());
        }

        let Some(drift) = self.clock.measure_drift(unit.timestamp()) else {
            self.emit_frame(unit);
            return;
        };
        self.history.record(drift);

        if drift.unsigned_abs() <= self.high_threshold_ns {
            self.clock.settle();
            self.emit_frame(unit);
            return;
        }
        if !self.clock.cooldown_elapsed(now, self.cooldown) {
            self.emit_frame(unit);
            return;
        }

        if drift > 0 {
            log::debug!(
                "video {:.1} ms ahead; dropping frame {}",
                nanos_to_millis(drift),
                unit.sequence()
            );
            self.clock.apply_correction(Correction::Drop, now);
            self.metrics.corrections += 1;
            self.metrics.frames_dropped += 1;
            self.release_video(unit);
            return;
        }

        if let Some(previous) = self.last_emitted {
            log::debug!(
                "video {:.1} ms behind; repeating frame {}",
                nanos_to_millis(-drift),
                previous.sequence
            );
            self.clock.apply_correction(Correction::Duplicate, now);
            self.metrics.corrections += 1;
            self.metrics.frames_duplicated += 1;
            self.render.present(RenderEvent::Repeat {
                sequence: previous.sequence,
                timestamp: previous.timestamp,
            });
        }
        self.emit_frame(unit);
    }

    fn emit_frame(&mut self, mut unit: VideoUnit) {
        if let Err(error) = unit.hand_to_consumer() {
            contract_violation(&mut self.metrics, &error);
            self.release_video(unit);
            return;
        }
        self.clock.record_presented(unit.timestamp());
        self.last_emitted = Some(unit.header);
        self.metrics.frames_emitted += 1;
        self.render.present(RenderEvent::Frame(unit));
    }

    fn release_video(&mut self, unit: VideoUnit) {
        if let Err(error) = unit.release() {
            contract_violation(&mut self.metrics, &error);
        }
    }
}

fn contract_violation(metrics: &mut EngineMetrics, error: &PoolError) {
    metrics.contract_violations += 1;
    log::error!("unit dropped by engine: {}", error);
}
