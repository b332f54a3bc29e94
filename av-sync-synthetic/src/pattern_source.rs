//! Synthetic polling video source.
//!
//! Produces moving-bar frames on a dedicated thread at a fixed rate, the way
//! a polling device backend would: wait for the next frame time, stamp, fill
//! a pool slot, submit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use av_sync_core::models::error::SyncError;
use av_sync_core::models::media::{FrameHeader, PixelFormat, SourceDriver, SourceInfo, StreamKind};
use av_sync_core::session::sinks::{SubmitOutcome, VideoSink};
use av_sync_core::traits::sources::FrameSource;

use crate::{offset_nanos, sleep_until};

/// Shape and timing of the generated video.
#[derive(Debug, Clone)]
pub struct PatternOptions {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame_interval: Duration,
    /// Added to every capture timestamp; positive puts video ahead of audio.
    pub timestamp_offset_ms: i64,
    /// Simulate an unplug once this many frames have been produced.
    pub disconnect_after: Option<u64>,
    /// Replug after this pause; `None` keeps the device unplugged.
    pub reconnect_after: Option<Duration>,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            format: PixelFormat::Bgra8,
            frame_interval: Duration::from_micros(16_667),
            timestamp_offset_ms: 0,
            disconnect_after: None,
            reconnect_after: None,
        }
    }
}

/// Moving-bar video source.
pub struct PatternFrameSource {
    options: PatternOptions,
    running: Arc<AtomicBool>,
    frames_produced: Arc<AtomicU64>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PatternFrameSource {
    pub fn new(options: PatternOptions) -> Self {
        Self {
            options,
            running: Arc::new(AtomicBool::new(false)),
            frames_produced: Arc::new(AtomicU64::new(0)),
            capture_handle: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &PatternOptions {
        &self.options
    }

    /// Frames handed to the sink so far, whatever the outcome.
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }
}

impl Default for PatternFrameSource {
    fn default() -> Self {
        Self::new(PatternOptions::default())
    }
}

impl FrameSource for PatternFrameSource {
    fn is_available(&self) -> bool {
        self.options.width > 0 && self.options.height > 0 && !self.options.frame_interval.is_zero()
    }

    fn start(&mut self, sink: VideoSink) -> Result<(), SyncError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SyncError::Adapter("pattern capture already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let produced = Arc::clone(&self.frames_produced);
        let options = self.options.clone();

        let handle = thread::Builder::new()
            .name("pattern-video-capture".into())
            .spawn(move || {
                pattern_capture_loop(&running, &options, sink, &produced);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SyncError::ThreadSpawn(format!("pattern capture: {}", e))
            })?;

        *self.capture_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SyncError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.lock().take() {
            handle
                .join()
                .map_err(|_| SyncError::Adapter("pattern capture thread panicked".into()))?;
        }
        Ok(())
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            id: "synthetic-pattern".into(),
            name: format!(
                "Moving bars {}x{} {:?}",
                self.options.width, self.options.height, self.options.format
            ),
            kind: StreamKind::Video,
            driver: SourceDriver::Polling,
        }
    }
}

/// Capture loop running on the adapter thread. Owns the sink; dropping it
/// on return is the last thing this adapter does with the core.
fn pattern_capture_loop(
    running: &AtomicBool,
    options: &PatternOptions,
    mut sink: VideoSink,
    produced: &AtomicU64,
) {
    let offset = offset_nanos(options.timestamp_offset_ms);
    let mut sequence = 0u64;
    let mut unplugged = false;
    let mut next_frame = Instant::now();

    while !sink.is_shutdown() && sleep_until(running, next_frame) {
        next_frame += options.frame_interval;

        if !unplugged && options.disconnect_after == Some(sequence) {
            unplugged = true;
            log::info!("simulating unplug after {} frames", sequence);
            sink.report_disconnected("simulated unplug");
            match options.reconnect_after {
                Some(pause) => {
                    if !sleep_until(running, Instant::now() + pause) {
                        break;
                    }
                    log::info!("simulating replug");
                    sink.report_recovered();
                    next_frame = Instant::now();
                    continue;
                }
                None => {
                    while sleep_until(running, Instant::now() + Duration::from_millis(50)) {}
                    break;
                }
            }
        }

        let header = FrameHeader {
            width: options.width,
            height: options.height,
            format: options.format,
            timestamp: sink.now().shifted(offset),
            sequence,
        };
        let outcome = sink.submit(header, |pixels| {
            draw_bars(pixels, options.width, options.height, options.format, sequence)
        });
        produced.fetch_add(1, Ordering::Relaxed);
        sequence += 1;

        match outcome {
            SubmitOutcome::ShuttingDown => break,
            SubmitOutcome::Rejected => log::warn!("frame {} rejected by sink", sequence - 1),
            _ => {}
        }
    }
}

/// Fill `pixels` with a dark frame and a bright vertical bar that moves one
/// step per frame.
fn draw_bars(pixels: &mut Vec<u8>, width: u32, height: u32, format: PixelFormat, frame: u64) {
    const BAR_BYTES: usize = 16;

    let len = format.frame_size(width, height);
    pixels.clear();
    pixels.resize(len, 0x10);
    let rows = height as usize;
    if rows == 0 || len == 0 {
        return;
    }
    let row_bytes = len / rows;
    if row_bytes == 0 {
        return;
    }
    let bar_start = (frame as usize * BAR_BYTES) % row_bytes;
    let bar_end = (bar_start + BAR_BYTES).min(row_bytes);
    for row in pixels.chunks_mut(row_bytes) {
        let end = bar_end.min(row.len());
        if bar_start < end {
            row[bar_start..end].fill(0xEB);
        }
    }
}
