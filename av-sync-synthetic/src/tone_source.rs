//! Synthetic callback-driven audio source.
//!
//! Models a host audio driver that calls the adapter from its own real-time
//! thread whenever a buffer is full. The adapter registers a callback that
//! synthesizes a sine batch and pushes it through the sink without blocking.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use av_sync_core::models::error::SyncError;
use av_sync_core::models::media::{SampleHeader, SourceDriver, SourceInfo, StreamKind};
use av_sync_core::session::sinks::{AudioSink, SubmitOutcome};
use av_sync_core::traits::sources::SampleSource;

use crate::{offset_nanos, sleep_until};

/// Callback invoked by the host once per buffer period. Returning `false`
/// unregisters it.
type HostCallback = Box<dyn FnMut() -> bool + Send>;

/// Format and timing of the generated tone.
#[derive(Debug, Clone)]
pub struct ToneOptions {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per channel in one callback buffer.
    pub frames_per_batch: u32,
    pub frequency_hz: f32,
    pub amplitude: f32,
    /// Added to every capture timestamp; positive puts audio ahead of video.
    pub timestamp_offset_ms: i64,
}

impl Default for ToneOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_batch: 480,
            frequency_hz: 440.0,
            amplitude: 0.2,
            timestamp_offset_ms: 0,
        }
    }
}

impl ToneOptions {
    fn batch_duration(&self) -> Duration {
        Duration::from_nanos(
            u64::from(self.frames_per_batch) * 1_000_000_000 / u64::from(self.sample_rate.max(1)),
        )
    }
}

/// Stand-in for the driver thread that owns the callback.
struct SimulatedHost {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SimulatedHost {
    fn spawn(period: Duration, mut callback: HostCallback) -> Result<Self, SyncError> {
        let running = Arc::new(AtomicBool::new(true));
        let host_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("tone-host-callback".into())
            .spawn(move || {
                // The first buffer is full one period after the stream opens.
                let mut deadline = Instant::now() + period;
                while sleep_until(&host_running, deadline) {
                    if !callback() {
                        break;
                    }
                    deadline += period;
                }
                host_running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| SyncError::ThreadSpawn(format!("tone host: {}", e)))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) -> Result<(), SyncError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| SyncError::Adapter("tone host thread panicked".into()))?;
        }
        Ok(())
    }
}

/// Sine tone audio source.
pub struct ToneSampleSource {
    options: ToneOptions,
    host: Mutex<Option<SimulatedHost>>,
}

impl ToneSampleSource {
    pub fn new(options: ToneOptions) -> Self {
        Self {
            options,
            host: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ToneOptions {
        &self.options
    }
}

impl Default for ToneSampleSource {
    fn default() -> Self {
        Self::new(ToneOptions::default())
    }
}

impl SampleSource for ToneSampleSource {
    fn is_available(&self) -> bool {
        self.options.sample_rate > 0 && self.options.channels > 0 && self.options.frames_per_batch > 0
    }

    fn start(&mut self, sink: AudioSink) -> Result<(), SyncError> {
        let mut host = self.host.lock();
        if host.is_some() {
            return Err(SyncError::Adapter("tone capture already running".into()));
        }
        let callback = tone_callback(self.options.clone(), sink);
        *host = Some(SimulatedHost::spawn(self.options.batch_duration(), callback)?);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SyncError> {
        match self.host.lock().take() {
            Some(mut host) => host.stop(),
            None => Ok(()),
        }
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            id: "synthetic-tone".into(),
            name: format!(
                "{} Hz tone, {} ch @ {} Hz",
                self.options.frequency_hz, self.options.channels, self.options.sample_rate
            ),
            kind: StreamKind::Audio,
            driver: SourceDriver::Callback,
        }
    }
}

/// Build the per-buffer callback. It owns the sink and a scratch buffer so
/// nothing is allocated on the host thread after the first call.
fn tone_callback(options: ToneOptions, mut sink: AudioSink) -> HostCallback {
    let frames = options.frames_per_batch as usize;
    let channels = usize::from(options.channels);
    let step = TAU * options.frequency_hz / options.sample_rate as f32;
    let duration_ns = i64::try_from(options.batch_duration().as_nanos()).unwrap_or(i64::MAX);
    let offset = offset_nanos(options.timestamp_offset_ms);
    let mut scratch = Vec::with_capacity(frames * channels);
    let mut phase = 0.0f32;
    let mut sequence = 0u64;

    Box::new(move || {
        if sink.is_shutdown() || sink.is_closed() {
            return false;
        }

        scratch.clear();
        for _ in 0..frames {
            let value = options.amplitude * phase.sin();
            scratch.extend(std::iter::repeat(value).take(channels));
            phase = (phase + step) % TAU;
        }

        // The buffer started filling one period before the callback fired.
        let header = SampleHeader {
            channels: options.channels,
            sample_rate: options.sample_rate,
            sample_count: options.frames_per_batch,
            timestamp: sink.now().shifted(offset - duration_ns),
            sequence,
        };
        sequence += 1;

        match sink.submit(header, &scratch) {
            Ok(SubmitOutcome::ShuttingDown) => false,
            Ok(_) => true,
            Err(e) => {
                log::error!("tone callback unregistered: {}", e);
                false
            }
        }
    })
}
