use crate::models::error::SyncError;
use crate::models::metrics::SessionMetrics;
use crate::models::state::SessionState;
use crate::session::sinks::SourceEvent;

/// Event delegate for session notifications.
///
/// Called from the session's supervisor thread or from the caller of the
/// session method that caused the change, never from the engine hot path.
pub trait SessionDelegate: Send + Sync {
    fn on_state_changed(&self, state: &SessionState);

    /// A capture adapter reported a disconnect, recovery or fatal condition.
    fn on_source_event(&self, event: &SourceEvent);

    fn on_error(&self, error: &SyncError);

    /// Called periodically with fresh metrics while the session runs.
    fn on_metrics(&self, _metrics: &SessionMetrics) {}
}
