//! # av-sync-synthetic
//!
//! Synthetic capture backends for av-sync-core, used by the `sync-sim`
//! binary and by end-to-end tests on machines without capture hardware.
//!
//! Provides:
//! - `PatternFrameSource` - polling video adapter producing moving-bar frames
//! - `ToneSampleSource` - callback-driven audio adapter producing a sine tone
//! - `RecordingRenderer` / `RecordingPlayback` - consumers that hold and
//!   release units like a real display and audio device, and log what they got
//!
//! Both sources can shift their timestamps to inject a constant A/V offset,
//! and the video source can simulate an unplug / replug.
//!
//! ## Usage
//! ```ignore
//! use av_sync_core::{SyncConfig, SyncSession};
//! use av_sync_synthetic::{PatternFrameSource, RecordingPlayback, RecordingRenderer, ToneSampleSource};
//!
//! let mut session = SyncSession::new(PatternFrameSource::default(), ToneSampleSource::default());
//! session.configure(SyncConfig::default())?;
//! session.start(Box::new(RecordingRenderer::new(64)), Box::new(RecordingPlayback::new()))?;
//! ```

pub mod consumers;
pub mod pattern_source;
pub mod tone_source;

pub use consumers::{PlaybackLog, RecordingPlayback, RecordingRenderer, RenderLog, RenderRecord};
pub use pattern_source::{PatternFrameSource, PatternOptions};
pub use tone_source::{ToneOptions, ToneSampleSource};

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Sleep until `deadline`, waking early if `running` clears.
///
/// Returns whether the thread should keep going.
pub(crate) fn sleep_until(running: &AtomicBool, deadline: Instant) -> bool {
    const SLICE: Duration = Duration::from_millis(5);
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
}

/// Offset in nanoseconds for a millisecond shift that may be negative.
pub(crate) fn offset_nanos(offset_ms: i64) -> i64 {
    offset_ms.saturating_mul(1_000_000)
}
