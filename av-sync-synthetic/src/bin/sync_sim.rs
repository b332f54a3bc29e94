//! Runs a synchronization session against the synthetic sources and prints
//! the session report as JSON.
//!
//! ```bash
//! RUST_LOG=info sync-sim --duration-ms 5000 --video-offset-ms 120
//! sync-sim --config session.json --unplug-after 120 --replug-ms 500
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use av_sync_core::{
    SessionDelegate, SessionMetrics, SessionState, SourceEvent, SyncConfig, SyncError, SyncSession,
};
use av_sync_synthetic::{
    PatternFrameSource, PatternOptions, RecordingPlayback, RecordingRenderer, ToneOptions,
    ToneSampleSource,
};

#[derive(Parser, Debug)]
#[command(name = "sync-sim")]
#[command(about = "Run an A/V sync session on synthetic capture sources")]
struct Args {
    /// JSON session configuration; missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long to run
    #[arg(long, default_value = "3000")]
    duration_ms: u64,

    /// Video frame rate
    #[arg(long, default_value = "60")]
    fps: f64,

    /// Shift video timestamps (positive = video ahead of audio)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    video_offset_ms: i64,

    /// Shift audio timestamps
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    audio_offset_ms: i64,

    /// Simulate a video unplug after this many frames
    #[arg(long)]
    unplug_after: Option<u64>,

    /// Replug the video source after this pause
    #[arg(long)]
    replug_ms: Option<u64>,
}

/// Delegate that forwards session notifications to the log.
struct LogDelegate;

impl SessionDelegate for LogDelegate {
    fn on_state_changed(&self, state: &SessionState) {
        match state {
            SessionState::Completed(report) => log::info!("state: completed ({})", report.id),
            other => log::info!("state: {:?}", other),
        }
    }

    fn on_source_event(&self, event: &SourceEvent) {
        log::info!("source event: {:?}", event);
    }

    fn on_error(&self, error: &SyncError) {
        log::error!("session error: {}", error);
    }

    fn on_metrics(&self, metrics: &SessionMetrics) {
        log::debug!(
            "drift {:.2} ms, frames {} shown / {} dropped / {} repeated, silence {}",
            metrics.clock.drift_ms,
            metrics.engine.frames_emitted,
            metrics.engine.frames_dropped,
            metrics.engine.frames_duplicated,
            metrics.engine.silence_emitted
        );
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(SyncConfig::from_json(&json)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if !(args.fps > 0.0) {
        anyhow::bail!("--fps must be positive");
    }
    let mut config = load_config(args.config.as_ref())?;

    let pattern = PatternOptions {
        frame_interval: Duration::from_secs_f64(1.0 / args.fps),
        timestamp_offset_ms: args.video_offset_ms,
        disconnect_after: args.unplug_after,
        reconnect_after: args.replug_ms.map(Duration::from_millis),
        ..PatternOptions::default()
    };
    // Pattern frames are small; size slots for them rather than for 1080p.
    config.video_slot_bytes = pattern.format.frame_size(pattern.width, pattern.height);
    let video = PatternFrameSource::new(pattern);
    let audio = ToneSampleSource::new(ToneOptions {
        timestamp_offset_ms: args.audio_offset_ms,
        ..ToneOptions::default()
    });

    let mut session = SyncSession::new(video, audio);
    session.set_delegate(Arc::new(LogDelegate));
    session.configure(config)?;

    let renderer = RecordingRenderer::new(0);
    let playback = RecordingPlayback::new();
    let render_log = renderer.log_handle();
    let playback_log = playback.log_handle();
    session.start(Box::new(renderer), Box::new(playback))?;

    thread::sleep(Duration::from_millis(args.duration_ms));
    let report = session.stop()?;

    {
        let render = render_log.lock();
        let playback = playback_log.lock();
        log::info!(
            "rendered {} frames ({} repeats), played {} batches ({} silent)",
            render.frames,
            render.repeats,
            playback.batches,
            playback.silent_batches
        );
    }
    println!("{}", report.to_json()?);

    if report.leaked_slots > 0 {
        anyhow::bail!("{} pool slots leaked", report.leaked_slots);
    }
    Ok(())
}
