use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::models::error::SyncError;
use crate::models::media::{AudioUnit, FrameHeader, SampleHeader, StreamKind, VideoUnit};
use crate::models::metrics::CaptureCounters;
use crate::processing::buffer_pool::BufferPool;
use crate::processing::exchange_queue::{Full, Producer};
use crate::timing::clock::{Clock, MonotonicInstant, SharedClock};

/// Status notifications from capture adapters to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Disconnected { kind: StreamKind, reason: String },
    Recovered { kind: StreamKind },
    /// The stream cannot continue (audio queue overflow).
    Fatal { kind: StreamKind, error: SyncError },
}

impl SourceEvent {
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Disconnected { kind, .. } | Self::Recovered { kind } | Self::Fatal { kind, .. } => {
                *kind
            }
        }
    }
}

/// Result of handing one unit to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Every pool slot was in flight; the unit was dropped.
    DroppedPoolExhausted,
    /// The video queue was full; the incoming frame was dropped.
    DroppedQueueFull,
    /// The unit broke the sequence or size contract and was dropped.
    Rejected,
    /// The session is shutting down; stop submitting.
    ShuttingDown,
}

/// Cooperative shutdown flag, observed at each non-blocking poll point.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

fn send_status(status: &Sender<SourceEvent>, event: SourceEvent) {
    if status.send(event).is_err() {
        log::debug!("status channel closed; source event dropped");
    }
}

fn sequence_advances(kind: StreamKind, last: Option<u64>, sequence: u64) -> bool {
    match last {
        Some(last) if sequence <= last => {
            log::warn!(
                "{} sequence {} does not follow {}; unit rejected",
                kind,
                sequence,
                last
            );
            false
        }
        _ => true,
    }
}

/// Capture-side entry point for video frames.
///
/// Owned by the video adapter; the only producer of the video queue.
pub struct VideoSink {
    producer: Producer<VideoUnit>,
    pool: BufferPool<Vec<u8>>,
    clock: SharedClock,
    counters: Arc<CaptureCounters>,
    status: Sender<SourceEvent>,
    shutdown: ShutdownSignal,
    last_sequence: Option<u64>,
}

impl VideoSink {
    pub(crate) fn new(
        producer: Producer<VideoUnit>,
        pool: BufferPool<Vec<u8>>,
        clock: SharedClock,
        counters: Arc<CaptureCounters>,
        status: Sender<SourceEvent>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            producer,
            pool,
            clock,
            counters,
            status,
            shutdown,
            last_sequence: None,
        }
    }

    /// Shared timestamp source; stamp frames with this.
    pub fn now(&self) -> MonotonicInstant {
        self.clock.now()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Check out a slot, let `fill` write the pixels, and queue the frame.
    ///
    /// Never blocks. A frame whose size does not match the header is never
    /// queued, so no partial frame can reach the renderer.
    pub fn submit<F>(&mut self, header: FrameHeader, fill: F) -> SubmitOutcome
    where
        F: FnOnce(&mut Vec<u8>),
    {
        if self.shutdown.is_triggered() {
            return SubmitOutcome::ShuttingDown;
        }
        if !sequence_advances(StreamKind::Video, self.last_sequence, header.sequence) {
            CaptureCounters::bump(&self.counters.video_rejected);
            return SubmitOutcome::Rejected;
        }
        self.last_sequence = Some(header.sequence);

        let mut buffer = match self.pool.acquire() {
            Ok(buffer) => buffer,
            Err(error) => {
                CaptureCounters::bump(&self.counters.video_pool_exhausted);
                log::debug!("frame {} dropped: {}", header.sequence, error);
                return SubmitOutcome::DroppedPoolExhausted;
            }
        };

        let complete = match buffer.data_mut() {
            Some(pixels) => {
                pixels.clear();
                fill(pixels);
                pixels.len() == header.expected_len()
            }
            None => false,
        };
        if !complete {
            log::warn!(
                "frame {} is {} bytes, expected {}; dropped",
                header.sequence,
                buffer.data().len(),
                header.expected_len()
            );
            CaptureCounters::bump(&self.counters.video_rejected);
            // Violations are reported by the pool itself.
            let _ = buffer.release();
            return SubmitOutcome::Rejected;
        }

        match self.producer.try_push(VideoUnit::new(header, buffer)) {
            Ok(()) => {
                CaptureCounters::bump(&self.counters.video_queued);
                SubmitOutcome::Queued
            }
            Err(Full(unit)) => {
                // Prefer freshness: the frame that did not fit is the one dropped.
                CaptureCounters::bump(&self.counters.video_queue_full);
                log::debug!("video queue full; frame {} dropped", unit.sequence());
                let _ = unit.release();
                SubmitOutcome::DroppedQueueFull
            }
        }
    }

    pub fn report_disconnected(&self, reason: impl Into<String>) {
        send_status(
            &self.status,
            SourceEvent::Disconnected {
                kind: StreamKind::Video,
                reason: reason.into(),
            },
        );
    }

    pub fn report_recovered(&self) {
        send_status(
            &self.status,
            SourceEvent::Recovered {
                kind: StreamKind::Video,
            },
        );
    }
}

/// Capture-side entry point for audio batches.
///
/// Owned by the audio adapter; the only producer of the audio queue. A full
/// audio queue is fatal: the sink latches closed and reports it.
pub struct AudioSink {
    producer: Producer<AudioUnit>,
    pool: BufferPool<Vec<f32>>,
    clock: SharedClock,
    counters: Arc<CaptureCounters>,
    status: Sender<SourceEvent>,
    shutdown: ShutdownSignal,
    last_sequence: Option<u64>,
    closed: bool,
}

impl AudioSink {
    pub(crate) fn new(
        producer: Producer<AudioUnit>,
        pool: BufferPool<Vec<f32>>,
        clock: SharedClock,
        counters: Arc<CaptureCounters>,
        status: Sender<SourceEvent>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            producer,
            pool,
            clock,
            counters,
            status,
            shutdown,
            last_sequence: None,
            closed: false,
        }
    }

    pub fn now(&self) -> MonotonicInstant {
        self.clock.now()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Whether an overflow has stopped this stream.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Copy `samples` (interleaved) into a pool slot and queue the batch.
    pub fn submit(
        &mut self,
        header: SampleHeader,
        samples: &[f32],
    ) -> Result<SubmitOutcome, SyncError> {
        let capacity = self.producer.capacity();
        if self.closed {
            return Err(SyncError::AudioQueueOverflow { capacity });
        }
        if self.shutdown.is_triggered() {
            return Ok(SubmitOutcome::ShuttingDown);
        }
        if header.sample_rate == 0 || header.channels == 0 || samples.len() != header.interleaved_len()
        {
            log::warn!(
                "audio batch {} has {} samples for {} frames x {} channels; dropped",
                header.sequence,
                samples.len(),
                header.sample_count,
                header.channels
            );
            CaptureCounters::bump(&self.counters.audio_rejected);
            return Ok(SubmitOutcome::Rejected);
        }
        if !sequence_advances(StreamKind::Audio, self.last_sequence, header.sequence) {
            CaptureCounters::bump(&self.counters.audio_rejected);
            return Ok(SubmitOutcome::Rejected);
        }
        self.last_sequence = Some(header.sequence);

        let mut buffer = match self.pool.acquire() {
            Ok(buffer) => buffer,
            Err(error) => {
                CaptureCounters::bump(&self.counters.audio_pool_exhausted);
                log::debug!("audio batch {} dropped: {}", header.sequence, error);
                return Ok(SubmitOutcome::DroppedPoolExhausted);
            }
        };
        if let Some(data) = buffer.data_mut() {
            data.clear();
            data.extend_from_slice(samples);
        }

        match self.producer.try_push(AudioUnit::new(header, buffer)) {
            Ok(()) => {
                CaptureCounters::bump(&self.counters.audio_queued);
                Ok(SubmitOutcome::Queued)
            }
            Err(Full(unit)) => {
                let _ = unit.release();
                self.closed = true;
                CaptureCounters::bump(&self.counters.audio_overflows);
                let error = SyncError::AudioQueueOverflow { capacity };
                log::error!("{}; stopping the audio stream", error);
                send_status(
                    &self.status,
                    SourceEvent::Fatal {
                        kind: StreamKind::Audio,
                        error: error.clone(),
                    },
                );
                Err(error)
            }
        }
    }

    pub fn report_disconnected(&self, reason: impl Into<String>) {
        send_status(
            &self.status,
            SourceEvent::Disconnected {
                kind: StreamKind::Audio,
                reason: reason.into(),
            },
        );
    }

    pub fn report_recovered(&self) {
        send_status(
            &self.status,
            SourceEvent::Recovered {
                kind: StreamKind::Audio,
            },
        );
    }
}
