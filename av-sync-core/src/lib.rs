//! # av-sync-core
//!
//! Capture-to-display synchronization core for a low-latency capture viewer.
//!
//! Moves timestamped video frames and audio batches from capture adapters to
//! render/playback consumers, keeping video aligned to the audio clock.
//! Capture backends implement the `FrameSource` / `SampleSource` traits and
//! plug into the generic `SyncSession`.
//!
//! ## Architecture
//!
//! ```text
//! av-sync-core (this crate)
//! ├── timing/       ← MonotonicInstant, Clock (SystemClock, ManualClock)
//! ├── models/       ← SyncError, SyncConfig, SessionState, media units, metrics, report
//! ├── processing/   ← exchange queue (SPSC), buffer pool, drift history
//! ├── sync/         ← ClockModel, SyncEngine
//! ├── session/      ← capture sinks, SyncSession (orchestrator)
//! └── traits/       ← FrameSource, SampleSource, consumers, SessionDelegate
//! ```
//!
//! ## Data flow
//!
//! ```text
//! [FrameSource]  → VideoSink → pool checkout → [video queue] ─┐
//!                                                              ├→ [SyncEngine] → RenderConsumer / PlaybackConsumer → pool release
//! [SampleSource] → AudioSink → pool checkout → [audio queue] ─┘
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod sync;
pub mod timing;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::SyncConfig;
pub use models::error::{PoolError, SyncError};
pub use models::media::{
    AudioUnit, FrameHeader, PixelFormat, SampleBuffer, SampleHeader, SourceDriver, SourceInfo,
    StreamKind, VideoUnit,
};
pub use models::metrics::{CaptureStats, DriftStats, EngineMetrics, PoolStats, SessionMetrics};
pub use models::report::SessionReport;
pub use models::state::SessionState;
pub use processing::buffer_pool::{BufferPool, PooledBuffer, SlotId, SlotState};
pub use processing::drift_history::DriftHistory;
pub use processing::exchange_queue::{Consumer, Full, Producer};
pub use session::orchestrator::SyncSession;
pub use session::sinks::{AudioSink, ShutdownSignal, SourceEvent, SubmitOutcome, VideoSink};
pub use sync::clock_model::{ClockModel, ClockSnapshot};
pub use sync::engine::{EngineControl, EngineSnapshot, StepOutcome, SyncEngine};
pub use timing::clock::{Clock, ManualClock, MonotonicInstant, SharedClock, SystemClock};
pub use traits::consumers::{PlaybackConsumer, RenderConsumer, RenderEvent};
pub use traits::session_delegate::SessionDelegate;
pub use traits::sources::{FrameSource, SampleSource};
