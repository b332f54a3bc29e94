use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::models::config::SyncConfig;
use crate::models::error::SyncError;
use crate::models::media::{AudioUnit, SourceInfo, StreamKind, VideoUnit};
use crate::models::metrics::{CaptureCounters, SessionMetrics};
use crate::models::report::SessionReport;
use crate::models::state::SessionState;
use crate::processing::buffer_pool::BufferPool;
use crate::processing::exchange_queue;
use crate::session::sinks::{AudioSink, ShutdownSignal, SourceEvent, VideoSink};
use crate::sync::engine::{EngineControl, EngineSnapshot, SyncEngine};
use crate::timing::clock::{Clock, SharedClock, SystemClock};
use crate::traits::consumers::{PlaybackConsumer, RenderConsumer};
use crate::traits::session_delegate::SessionDelegate;
use crate::traits::sources::{FrameSource, SampleSource};

/// Internal mutable session state, protected by `parking_lot::Mutex`.
struct SharedState {
    state: SessionState,
    lost: [bool; 2],
    errors: Vec<String>,
    audio_stream_stopped: bool,
}

impl SharedState {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            lost: [false; 2],
            errors: Vec::new(),
            audio_stream_stopped: false,
        }
    }
}

/// Everything needed to assemble `SessionMetrics` from any thread.
#[derive(Clone)]
struct MetricsProbe {
    engine: Arc<Mutex<EngineSnapshot>>,
    counters: Arc<CaptureCounters>,
    video_pool: BufferPool<Vec<u8>>,
    audio_pool: BufferPool<Vec<f32>>,
}

impl MetricsProbe {
    fn collect(&self) -> SessionMetrics {
        let engine = *self.engine.lock();
        SessionMetrics {
            engine: engine.metrics,
            clock: engine.clock,
            degraded: engine.degraded,
            capture: self.counters.snapshot(),
            video_pool: Some(self.video_pool.stats()),
            audio_pool: Some(self.audio_pool.stats()),
        }
    }

    fn leaked_slots(&self) -> usize {
        self.video_pool.checked_out() + self.audio_pool.checked_out()
    }
}

/// Applies source events to the session: engine control, state, delegate.
///
/// Shared by the supervisor thread and the `notify_*` entry points.
struct EventRouter<S> {
    shared: Arc<Mutex<SharedState>>,
    delegate: Option<Arc<dyn SessionDelegate>>,
    control: Sender<EngineControl>,
    audio_source: Arc<Mutex<S>>,
}

impl<S> Clone for EventRouter<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            delegate: self.delegate.clone(),
            control: self.control.clone(),
            audio_source: Arc::clone(&self.audio_source),
        }
    }
}

impl<S: SampleSource> EventRouter<S> {
    fn route(&self, event: SourceEvent) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_source_event(&event);
        }

        match event {
            SourceEvent::Disconnected { kind, reason } => {
                log::warn!("{} source disconnected: {}", kind, reason);
                self.set_lost(kind, true);
            }
            SourceEvent::Recovered { kind } => {
                log::info!("{} source reconnected", kind);
                self.set_lost(kind, false);
            }
            SourceEvent::Fatal { kind, error } => {
                log::error!("{} stream failed: {}", kind, error);
                if kind == StreamKind::Audio {
                    if let Err(e) = self.audio_source.lock().stop() {
                        log::error!("failed to stop audio source: {}", e);
                    }
                }
                {
                    let mut s = self.shared.lock();
                    s.errors.push(error.to_string());
                    if kind == StreamKind::Audio {
                        s.audio_stream_stopped = true;
                    }
                }
                if let Some(ref delegate) = self.delegate {
                    delegate.on_error(&error);
                }
            }
        }
    }

    fn set_lost(&self, kind: StreamKind, lost: bool) {
        let new_state = {
            let mut s = self.shared.lock();
            if !s.state.is_active() || s.lost[kind.index()] == lost {
                return;
            }
            s.lost[kind.index()] = lost;
            let control = if lost {
                EngineControl::SourceDisconnected(kind)
            } else {
                EngineControl::SourceRecovered(kind)
            };
            if self.control.send(control).is_err() {
                log::debug!("engine stopped; {:?} not delivered", control);
            }
            s.state = SessionState::with_streams_lost(s.lost[0], s.lost[1]);
            s.state.clone()
        };
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(&new_state);
        }
    }
}

/// Capture-to-display synchronization session.
///
/// Generic over video and audio backends via `FrameSource` / `SampleSource`.
/// Owns the buffer pools and exchange queues, runs the engine on its own
/// thread, and supervises source status.
///
/// ```text
/// [FrameSource]  → VideoSink → [video queue] ─┐
///                                              ├→ [engine thread] → RenderConsumer / PlaybackConsumer
/// [SampleSource] → AudioSink → [audio queue] ─┘
///                     │ status events
///                     └→ [supervisor thread] → engine control, state, delegate
/// ```
pub struct SyncSession<F: FrameSource + 'static, S: SampleSource + 'static> {
    video_source: Arc<Mutex<F>>,
    audio_source: Arc<Mutex<S>>,
    clock: SharedClock,
    config: Option<SyncConfig>,
    shared: Arc<Mutex<SharedState>>,
    delegate: Option<Arc<dyn SessionDelegate>>,

    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    shutdown: ShutdownSignal,
    probe: Option<MetricsProbe>,
    router: Option<EventRouter<S>>,

    // Engine thread control
    engine_running: Arc<AtomicBool>,
    engine_handle: Option<thread::JoinHandle<EngineSnapshot>>,

    // Supervisor thread control
    supervisor_running: Arc<AtomicBool>,
    supervisor_handle: Option<thread::JoinHandle<()>>,
}

impl<F: FrameSource + 'static, S: SampleSource + 'static> SyncSession<F, S> {
    pub fn new(video: F, audio: S) -> Self {
        Self::with_clock(video, audio, SystemClock::shared())
    }

    /// Session timed by `clock` instead of the system monotonic clock.
    pub fn with_clock(video: F, audio: S, clock: SharedClock) -> Self {
        Self {
            video_source: Arc::new(Mutex::new(video)),
            audio_source: Arc::new(Mutex::new(audio)),
            clock,
            config: None,
            shared: Arc::new(Mutex::new(SharedState::new())),
            delegate: None,
            session_id: None,
            started_at: None,
            shutdown: ShutdownSignal::new(),
            probe: None,
            router: None,
            engine_running: Arc::new(AtomicBool::new(false)),
            engine_handle: None,
            supervisor_running: Arc::new(AtomicBool::new(false)),
            supervisor_handle: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SessionDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    /// Id of the current (or last) session run.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn config(&self) -> Option<&SyncConfig> {
        self.config.as_ref()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn available_sources(&self) -> Vec<SourceInfo> {
        let mut sources = Vec::new();
        let video = self.video_source.lock();
        if video.is_available() {
            sources.push(video.info());
        }
        drop(video);
        let audio = self.audio_source.lock();
        if audio.is_available() {
            sources.push(audio.info());
        }
        sources
    }

    /// Current metrics; after `stop` these are the final values.
    pub fn metrics(&self) -> SessionMetrics {
        self.probe
            .as_ref()
            .map(MetricsProbe::collect)
            .unwrap_or_default()
    }

    /// Apply configuration. Transitions: idle → ready.
    ///
    /// Also accepted after a failed start, to retry with a new configuration.
    pub fn configure(&mut self, config: SyncConfig) -> Result<(), SyncError> {
        {
            let state = &self.shared.lock().state;
            if !state.is_idle() && !matches!(state, SessionState::Failed(_)) {
                return Err(SyncError::InvalidState(
                    "can only configure from idle state".into(),
                ));
            }
        }

        config.validate().map_err(SyncError::ConfigurationFailed)?;
        log::info!(
            "configured: video queue {} / pool {}, audio queue {} / pool {}, threshold {} ms",
            config.effective_video_queue_capacity(),
            config.effective_video_pool_capacity(),
            config.effective_audio_queue_capacity(),
            config.effective_audio_pool_capacity(),
            config.high_threshold_ms
        );
        self.config = Some(config);
        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Start capture and synchronization. Transitions: ready → running
    /// (or failed if a source cannot start).
    ///
    /// The engine thread owns `render` and `playback` until `stop`.
    pub fn start(
        &mut self,
        render: Box<dyn RenderConsumer>,
        playback: Box<dyn PlaybackConsumer>,
    ) -> Result<(), SyncError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| SyncError::InvalidState("not configured".into()))?;

        {
            let state = &self.shared.lock().state;
            if !state.is_ready() {
                return Err(SyncError::InvalidState(
                    "can only start from ready state".into(),
                ));
            }
        }

        if !self.video_source.lock().is_available() {
            return Err(self.fail(SyncError::SourceUnavailable(StreamKind::Video)));
        }
        if !self.audio_source.lock().is_available() {
            return Err(self.fail(SyncError::SourceUnavailable(StreamKind::Audio)));
        }

        // Fresh per-run resources
        {
            let mut s = self.shared.lock();
            s.lost = [false; 2];
            s.errors.clear();
            s.audio_stream_stopped = false;
        }
        self.shutdown = ShutdownSignal::new();
        let slot_bytes = config.video_slot_bytes;
        let slot_samples = config.audio_slot_samples;
        let video_pool = BufferPool::new(
            StreamKind::Video,
            config.effective_video_pool_capacity(),
            || Vec::with_capacity(slot_bytes),
        );
        let audio_pool = BufferPool::new(
            StreamKind::Audio,
            config.effective_audio_pool_capacity(),
            || Vec::with_capacity(slot_samples),
        );
        let (video_tx, video_rx) =
            exchange_queue::channel::<VideoUnit>(config.effective_video_queue_capacity());
        let (audio_tx, audio_rx) =
            exchange_queue::channel::<AudioUnit>(config.effective_audio_queue_capacity());
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let counters = Arc::new(CaptureCounters::default());

        let probe = MetricsProbe {
            engine: Arc::new(Mutex::new(EngineSnapshot::default())),
            counters: Arc::clone(&counters),
            video_pool: video_pool.clone(),
            audio_pool: audio_pool.clone(),
        };
        self.probe = Some(probe.clone());
        let router = EventRouter {
            shared: Arc::clone(&self.shared),
            delegate: self.delegate.clone(),
            control: control_tx,
            audio_source: Arc::clone(&self.audio_source),
        };
        self.router = Some(router.clone());

        // Start capture adapters: video, then audio
        let video_sink = VideoSink::new(
            video_tx,
            video_pool,
            Arc::clone(&self.clock),
            Arc::clone(&counters),
            status_tx.clone(),
            self.shutdown.clone(),
        );
        let started = self.video_source.lock().start(video_sink);
        if let Err(e) = started {
            return Err(self.fail(e));
        }

        let audio_sink = AudioSink::new(
            audio_tx,
            audio_pool,
            Arc::clone(&self.clock),
            counters,
            status_tx,
            self.shutdown.clone(),
        );
        let started = self.audio_source.lock().start(audio_sink);
        if let Err(e) = started {
            self.stop_sources();
            return Err(self.fail(e));
        }

        let engine = SyncEngine::new(&config, video_rx, audio_rx, render, playback);
        if let Err(e) = self.start_engine(engine, control_rx, &config, probe.engine.clone()) {
            self.stop_sources();
            return Err(self.fail(e));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        log::info!("session {} started", session_id);
        self.session_id = Some(session_id);
        self.started_at = Some(Utc::now());
        self.set_state(SessionState::Running);

        if let Err(e) = self.start_supervisor(router, status_rx, probe, config.supervisor_tick()) {
            // Still stoppable; the session just runs unsupervised.
            log::error!("{}", e);
            self.shared.lock().errors.push(e.to_string());
        }

        Ok(())
    }

    /// Device management reports that `kind` was unplugged.
    pub fn notify_disconnected(&self, kind: StreamKind) {
        if let Some(ref router) = self.router {
            router.route(SourceEvent::Disconnected {
                kind,
                reason: "reported by device manager".into(),
            });
        }
    }

    /// Device management reports that `kind` is back.
    pub fn notify_reconnected(&self, kind: StreamKind) {
        if let Some(ref router) = self.router {
            router.route(SourceEvent::Recovered { kind });
        }
    }

    /// Drop the clock model's audio anchor and pending corrections, for a
    /// device layer that restarted a capture device in place. Ignored unless
    /// the session is active.
    pub fn reset_clock(&self) {
        if !self.shared.lock().state.is_active() {
            return;
        }
        if let Some(ref router) = self.router {
            if router.control.send(EngineControl::ResetClock).is_err() {
                log::debug!("engine stopped; clock reset not delivered");
            }
        }
    }

    /// Stop everything and return the session report.
    /// Transitions: running/degraded → stopping → completed → idle.
    pub fn stop(&mut self) -> Result<SessionReport, SyncError> {
        {
            let s = self.shared.lock();
            if !s.state.is_active() {
                return Err(SyncError::InvalidState(
                    "can only stop a running session".into(),
                ));
            }
        }

        self.set_state(SessionState::Stopping);

        // Sinks refuse new units from here on
        self.shutdown.trigger();
        let mut errors = self.stop_sources();

        // Stop the engine; it drains both queues and stops the consumers
        self.engine_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.engine_handle.take() {
            match handle.join() {
                Ok(snapshot) => {
                    if let Some(ref probe) = self.probe {
                        *probe.engine.lock() = snapshot;
                    }
                }
                Err(_) => {
                    log::error!("engine thread panicked");
                    errors.push("engine thread panicked".into());
                }
            }
        }

        self.supervisor_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.supervisor_handle.take() {
            let _ = handle.join();
        }
        self.router = None;

        let (metrics, leaked_slots) = match self.probe {
            Some(ref probe) => (probe.collect(), probe.leaked_slots()),
            None => (SessionMetrics::default(), 0),
        };
        if leaked_slots > 0 {
            log::error!("{} pool slots still checked out after teardown", leaked_slots);
        }

        let stopped_at = Utc::now();
        let started_at = self.started_at.unwrap_or(stopped_at);
        let (mut session_errors, audio_stream_stopped) = {
            let mut s = self.shared.lock();
            (std::mem::take(&mut s.errors), s.audio_stream_stopped)
        };
        session_errors.extend(errors);

        let report = SessionReport {
            id: self.session_id.clone().unwrap_or_default(),
            started_at: started_at.to_rfc3339(),
            stopped_at: stopped_at.to_rfc3339(),
            duration_secs: (stopped_at - started_at).num_milliseconds() as f64 / 1000.0,
            metrics,
            errors: session_errors,
            leaked_slots,
            audio_stream_stopped,
        };
        log::info!(
            "session {} stopped: {} frames shown, {} dropped, {} repeated, {} silent batches",
            report.id,
            report.metrics.engine.frames_emitted,
            report.metrics.engine.frames_dropped,
            report.metrics.engine.frames_duplicated,
            report.metrics.engine.silence_emitted
        );

        self.set_state(SessionState::Completed(Box::new(report.clone())));

        // Reset for next session
        self.shared.lock().state = SessionState::Idle;

        Ok(report)
    }

    // --- Internal helpers ---

    fn set_state(&self, new_state: SessionState) {
        {
            let mut s = self.shared.lock();
            s.state = new_state.clone();
        }
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(&new_state);
        }
    }

    fn fail(&self, error: SyncError) -> SyncError {
        log::error!("session failed to start: {}", error);
        if let Some(ref delegate) = self.delegate {
            delegate.on_error(&error);
        }
        self.set_state(SessionState::Failed(error.clone()));
        error
    }

    /// Stop both adapters; returns the failures as report lines.
    fn stop_sources(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(e) = self.video_source.lock().stop() {
            log::error!("failed to stop video source: {}", e);
            errors.push(e.to_string());
        }
        if let Err(e) = self.audio_source.lock().stop() {
            log::error!("failed to stop audio source: {}", e);
            errors.push(e.to_string());
        }
        errors
    }

    /// Spawn the engine loop: apply control, step, publish, sleep when idle.
    fn start_engine(
        &mut self,
        mut engine: SyncEngine,
        control: Receiver<EngineControl>,
        config: &SyncConfig,
        published: Arc<Mutex<EngineSnapshot>>,
    ) -> Result<(), SyncError> {
        self.engine_running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.engine_running);
        let clock = Arc::clone(&self.clock);
        let idle_sleep = config.idle_sleep();

        let handle = thread::Builder::new()
            .name("av-sync-engine".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    while let Ok(message) = control.try_recv() {
                        engine.handle_control(message, clock.now());
                    }

                    let outcome = engine.step(clock.now());

                    // Readers never stall the engine: skip a publish if contended.
                    if let Some(mut slot) = published.try_lock() {
                        *slot = engine.snapshot();
                    }

                    if outcome.is_idle() {
                        thread::sleep(idle_sleep);
                    }
                }
                engine.shutdown()
            })
            .map_err(|e| {
                self.engine_running.store(false, Ordering::SeqCst);
                SyncError::ThreadSpawn(format!("engine: {}", e))
            })?;

        self.engine_handle = Some(handle);
        Ok(())
    }

    /// Spawn the supervisor: route status events, publish metrics each tick.
    fn start_supervisor(
        &mut self,
        router: EventRouter<S>,
        status: Receiver<SourceEvent>,
        probe: MetricsProbe,
        tick: Duration,
    ) -> Result<(), SyncError> {
        self.supervisor_running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.supervisor_running);
        let delegate = self.delegate.clone();

        let handle = thread::Builder::new()
            .name("av-sync-supervisor".into())
            .spawn(move || {
                let mut last_publish = Instant::now();
                while running.load(Ordering::SeqCst) {
                    match status.recv_timeout(tick) {
                        Ok(event) => router.route(event),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            // Both sinks are gone; nothing more will arrive.
                            thread::sleep(tick);
                        }
                    }

                    if last_publish.elapsed() >= tick {
                        last_publish = Instant::now();
                        if let Some(ref d) = delegate {
                            d.on_metrics(&probe.collect());
                        }
                    }
                }
            })
            .map_err(|e| {
                self.supervisor_running.store(false, Ordering::SeqCst);
                SyncError::ThreadSpawn(format!("supervisor: {}", e))
            })?;

        self.supervisor_handle = Some(handle);
        Ok(())
    }
}

impl<F: FrameSource + 'static, S: SampleSource + 'static> Drop for SyncSession<F, S> {
    fn drop(&mut self) {
        if self.state().is_active() {
            log::warn!("session dropped while running; stopping");
            if let Err(e) = self.stop() {
                log::error!("failed to stop session on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media::{FrameHeader, PixelFormat, SampleHeader, SourceDriver};
    use crate::session::sinks::SubmitOutcome;
    use crate::timing::clock::{ManualClock, MonotonicInstant};
    use crate::traits::consumers::RenderEvent;
    use std::sync::atomic::AtomicUsize;

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Source that hands its sink to the test instead of capturing.
    struct StashVideo {
        available: bool,
        sink: Arc<Mutex<Option<VideoSink>>>,
    }

    impl FrameSource for StashVideo {
        fn is_available(&self) -> bool {
            self.available
        }

        fn start(&mut self, sink: VideoSink) -> Result<(), SyncError> {
            *self.sink.lock() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SyncError> {
            self.sink.lock().take();
            Ok(())
        }

        fn info(&self) -> SourceInfo {
            SourceInfo {
                id: "stash-video".into(),
                name: "Stash video".into(),
                kind: StreamKind::Video,
                driver: SourceDriver::Polling,
            }
        }
    }

    struct StashAudio {
        available: bool,
        fail_start: bool,
        sink: Arc<Mutex<Option<AudioSink>>>,
        stops: Arc<AtomicUsize>,
    }

    impl SampleSource for StashAudio {
        fn is_available(&self) -> bool {
            self.available
        }

        fn start(&mut self, sink: AudioSink) -> Result<(), SyncError> {
            if self.fail_start {
                return Err(SyncError::Adapter("device busy".into()));
            }
            *self.sink.lock() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SyncError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.sink.lock().take();
            Ok(())
        }

        fn info(&self) -> SourceInfo {
            SourceInfo {
                id: "stash-audio".into(),
                name: "Stash audio".into(),
                kind: StreamKind::Audio,
                driver: SourceDriver::Callback,
            }
        }
    }

    struct HoldingRenderer {
        current: Option<VideoUnit>,
        shown: Arc<Mutex<Vec<u64>>>,
    }

    impl RenderConsumer for HoldingRenderer {
        fn present(&mut self, event: RenderEvent) {
            if let RenderEvent::Frame(unit) = event {
                self.shown.lock().push(unit.sequence());
                if let Some(previous) = self.current.replace(unit) {
                    let _ = previous.release();
                }
            }
        }

        fn on_stop(&mut self) {
            if let Some(unit) = self.current.take() {
                let _ = unit.release();
            }
        }
    }

    /// Playback that can be held inside `play` to stall the engine.
    struct GatedPlayback {
        hold: Arc<AtomicBool>,
        entered: Arc<AtomicUsize>,
    }

    impl PlaybackConsumer for GatedPlayback {
        fn play(&mut self, unit: AudioUnit) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            while self.hold.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            let _ = unit.release();
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<SessionState>>,
        events: Mutex<Vec<SourceEvent>>,
        errors: Mutex<Vec<SyncError>>,
        metrics_calls: AtomicUsize,
    }

    impl SessionDelegate for RecordingDelegate {
        fn on_state_changed(&self, state: &SessionState) {
            self.states.lock().push(state.clone());
        }

        fn on_source_event(&self, event: &SourceEvent) {
            self.events.lock().push(event.clone());
        }

        fn on_error(&self, error: &SyncError) {
            self.errors.lock().push(error.clone());
        }

        fn on_metrics(&self, _metrics: &SessionMetrics) {
            self.metrics_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Rig {
        session: SyncSession<StashVideo, StashAudio>,
        clock: Arc<ManualClock>,
        video: Arc<Mutex<Option<VideoSink>>>,
        audio: Arc<Mutex<Option<AudioSink>>>,
        audio_stops: Arc<AtomicUsize>,
        delegate: Arc<RecordingDelegate>,
        shown: Arc<Mutex<Vec<u64>>>,
        hold_playback: Arc<AtomicBool>,
        played: Arc<AtomicUsize>,
    }

    impl Rig {
        fn new() -> Self {
            Self::with_sources(true, true, false)
        }

        fn with_sources(video_available: bool, audio_available: bool, fail_audio: bool) -> Self {
            let video = Arc::new(Mutex::new(None));
            let audio = Arc::new(Mutex::new(None));
            let audio_stops = Arc::new(AtomicUsize::new(0));
            let clock = Arc::new(ManualClock::new(MonotonicInstant::from_millis(1_000)));
            let mut session = SyncSession::with_clock(
                StashVideo {
                    available: video_available,
                    sink: Arc::clone(&video),
                },
                StashAudio {
                    available: audio_available,
                    fail_start: fail_audio,
                    sink: Arc::clone(&audio),
                    stops: Arc::clone(&audio_stops),
                },
                clock.clone(),
            );
            let delegate = Arc::new(RecordingDelegate::default());
            session.set_delegate(delegate.clone());
            Self {
                session,
                clock,
                video,
                audio,
                audio_stops,
                delegate,
                shown: Arc::new(Mutex::new(Vec::new())),
                hold_playback: Arc::new(AtomicBool::new(false)),
                played: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn config() -> SyncConfig {
            SyncConfig {
                video_queue_capacity: 4,
                audio_queue_capacity: 2,
                video_slot_bytes: 16,
                audio_slot_samples: 64,
                supervisor_tick_ms: 5,
                idle_sleep_us: 200,
                ..SyncConfig::default()
            }
        }

        fn start(&mut self) -> Result<(), SyncError> {
            self.session.configure(Self::config())?;
            self.session.start(
                Box::new(HoldingRenderer {
                    current: None,
                    shown: Arc::clone(&self.shown),
                }),
                Box::new(GatedPlayback {
                    hold: Arc::clone(&self.hold_playback),
                    entered: Arc::clone(&self.played),
                }),
            )
        }

        fn submit_frame(&self, sequence: u64) -> SubmitOutcome {
            let mut guard = self.video.lock();
            let sink = guard.as_mut().expect("video source started");
            let header = FrameHeader {
                width: 2,
                height: 2,
                format: PixelFormat::Bgra8,
                timestamp: sink.now(),
                sequence,
            };
            sink.submit(header, |pixels| pixels.resize(16, 7))
        }

        fn submit_audio(&self, sequence: u64) -> Result<SubmitOutcome, SyncError> {
            let mut guard = self.audio.lock();
            let sink = guard.as_mut().expect("audio source started");
            let header = SampleHeader {
                channels: 2,
                sample_rate: 48_000,
                sample_count: 4,
                timestamp: sink.now(),
                sequence,
            };
            sink.submit(header, &[0.5; 8])
        }

        fn engine_metrics(&self) -> crate::models::metrics::EngineMetrics {
            self.session.metrics().engine
        }
    }

    #[test]
    fn configure_requires_idle_and_valid_config() {
        let mut rig = Rig::new();
        let bad = SyncConfig {
            high_threshold_ms: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            rig.session.configure(bad),
            Err(SyncError::ConfigurationFailed(_))
        ));
        assert!(rig.session.state().is_idle());

        rig.session.configure(Rig::config()).unwrap();
        assert!(rig.session.state().is_ready());
        assert!(matches!(
            rig.session.configure(Rig::config()),
            Err(SyncError::InvalidState(_))
        ));
    }

    #[test]
    fn start_and_stop_require_the_right_state() {
        let mut rig = Rig::new();
        let render = Box::new(HoldingRenderer {
            current: None,
            shown: Arc::clone(&rig.shown),
        });
        let playback = Box::new(GatedPlayback {
            hold: Arc::clone(&rig.hold_playback),
            entered: Arc::clone(&rig.played),
        });
        assert!(matches!(
            rig.session.start(render, playback),
            Err(SyncError::InvalidState(_))
        ));
        assert!(matches!(rig.session.stop(), Err(SyncError::InvalidState(_))));
    }

    #[test]
    fn lifecycle_produces_clean_report() {
        let mut rig = Rig::new();
        rig.start().unwrap();
        assert_eq!(rig.session.state(), SessionState::Running);
        let session_id = rig.session.session_id().unwrap().to_string();

        for seq in 0..3 {
            assert_eq!(rig.submit_audio(seq), Ok(SubmitOutcome::Queued));
            assert_eq!(rig.submit_frame(seq), SubmitOutcome::Queued);
            rig.clock.advance(Duration::from_micros(80));
        }
        wait_until("frames to be shown", || rig.engine_metrics().frames_emitted == 3);
        wait_until("metrics publication", || {
            rig.delegate.metrics_calls.load(Ordering::SeqCst) > 0
        });

        let report = rig.session.stop().unwrap();
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(report.id, session_id);
        assert_eq!(report.leaked_slots, 0);
        assert_eq!(report.metrics.engine.frames_emitted, 3);
        assert_eq!(report.metrics.engine.audio_emitted, 3);
        assert_eq!(report.metrics.capture.video_queued, 3);
        assert_eq!(report.metrics.video_pool.unwrap().checked_out, 0);
        assert!(!report.audio_stream_stopped);
        assert_eq!(*rig.shown.lock(), vec![0, 1, 2]);

        assert!(rig.session.state().is_idle());
        let states = rig.delegate.states.lock().clone();
        assert_eq!(states[0], SessionState::Ready);
        assert_eq!(states[1], SessionState::Running);
        assert_eq!(states[2], SessionState::Stopping);
        assert!(matches!(states[3], SessionState::Completed(_)));
    }

    #[test]
    fn stop_stops_both_sources() {
        let mut rig = Rig::new();
        rig.start().unwrap();
        let video = rig.video.clone();
        rig.session.stop().unwrap();
        // The source dropped its sink on stop.
        assert!(video.lock().is_none());
        assert_eq!(rig.audio_stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_source_fails_start() {
        let mut rig = Rig::with_sources(false, true, false);
        let err = rig.start().unwrap_err();

        assert_eq!(err, SyncError::SourceUnavailable(StreamKind::Video));
        assert_eq!(
            rig.session.state(),
            SessionState::Failed(SyncError::SourceUnavailable(StreamKind::Video))
        );
        assert_eq!(rig.delegate.errors.lock().len(), 1);
        assert_eq!(rig.session.available_sources().len(), 1);
    }

    #[test]
    fn failed_audio_start_stops_video_and_allows_retry() {
        let mut rig = Rig::with_sources(true, true, true);
        assert_eq!(
            rig.start().unwrap_err(),
            SyncError::Adapter("device busy".into())
        );
        assert!(rig.video.lock().is_none());
        // A failed session can be configured again.
        rig.session.configure(Rig::config()).unwrap();
        assert!(rig.session.state().is_ready());
    }

    #[test]
    fn source_disconnect_degrades_and_recovers() {
        let mut rig = Rig::new();
        rig.start().unwrap();
        rig.submit_frame(0);
        wait_until("first frame", || rig.engine_metrics().frames_emitted == 1);

        rig.video.lock().as_ref().unwrap().report_disconnected("unplugged");
        wait_until("degraded state", || rig.session.state().is_degraded());
        assert!(rig.session.state().has_lost(StreamKind::Video));
        wait_until("engine degraded", || rig.session.metrics().degraded);

        // Frames captured while degraded are released, not shown.
        rig.submit_frame(1);
        wait_until("discarded frame", || {
            rig.engine_metrics().frames_discarded_degraded == 1
        });
        assert_eq!(*rig.shown.lock(), vec![0]);

        rig.video.lock().as_ref().unwrap().report_recovered();
        wait_until("running state", || rig.session.state() == SessionState::Running);
        rig.submit_frame(2);
        wait_until("frame after recovery", || rig.engine_metrics().frames_emitted == 2);

        let events = rig.delegate.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], SourceEvent::Recovered { kind: StreamKind::Video });

        let report = rig.session.stop().unwrap();
        assert_eq!(report.leaked_slots, 0);
        assert_eq!(*rig.shown.lock(), vec![0, 2]);
    }

    #[test]
    fn device_manager_notifications_drive_degraded_mode() {
        let mut rig = Rig::new();
        rig.start().unwrap();

        rig.session.notify_disconnected(StreamKind::Audio);
        assert_eq!(
            rig.session.state(),
            SessionState::Degraded {
                video_lost: false,
                audio_lost: true
            }
        );
        rig.session.notify_disconnected(StreamKind::Video);
        rig.session.notify_reconnected(StreamKind::Audio);
        assert!(rig.session.state().has_lost(StreamKind::Video));
        assert!(!rig.session.state().has_lost(StreamKind::Audio));

        rig.session.notify_reconnected(StreamKind::Video);
        assert_eq!(rig.session.state(), SessionState::Running);
        rig.session.stop().unwrap();
    }

    #[test]
    fn reset_clock_drops_the_audio_anchor() {
        let mut rig = Rig::new();
        rig.session.reset_clock();
        rig.start().unwrap();

        rig.submit_audio(0).unwrap();
        wait_until("audio anchored", || {
            rig.session.metrics().clock.audio_position.is_some()
        });
        rig.session.reset_clock();
        wait_until("clock reset", || {
            rig.session.metrics().clock.audio_position.is_none()
        });
        assert_eq!(rig.engine_metrics().audio_emitted, 1);

        let report = rig.session.stop().unwrap();
        assert!(report.is_clean(), "{:?}", report.errors);
    }

    #[test]
    fn audio_overflow_stops_the_audio_stream() {
        let mut rig = Rig::new();
        rig.start().unwrap();

        // Stall the engine inside playback, then fill the audio queue.
        rig.hold_playback.store(true, Ordering::SeqCst);
        rig.submit_audio(0).unwrap();
        wait_until("engine in playback", || rig.played.load(Ordering::SeqCst) == 1);
        rig.submit_audio(1).unwrap();
        rig.submit_audio(2).unwrap();
        assert_eq!(
            rig.submit_audio(3),
            Err(SyncError::AudioQueueOverflow { capacity: 2 })
        );

        wait_until("audio source stopped", || {
            rig.audio_stops.load(Ordering::SeqCst) == 1
        });
        rig.hold_playback.store(false, Ordering::SeqCst);

        let report = rig.session.stop().unwrap();
        assert!(report.audio_stream_stopped);
        assert!(!report.is_clean());
        assert_eq!(report.metrics.capture.audio_overflows, 1);
        assert_eq!(report.leaked_slots, 0);
        assert_eq!(
            rig.delegate.errors.lock().as_slice(),
            &[SyncError::AudioQueueOverflow { capacity: 2 }]
        );
    }

    #[test]
    fn dropping_a_running_session_stops_it() {
        let mut rig = Rig::new();
        rig.start().unwrap();
        let stops = Arc::clone(&rig.audio_stops);
        let video = Arc::clone(&rig.video);
        drop(rig.session);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(video.lock().is_none());
    }
}
