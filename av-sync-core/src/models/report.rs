use serde::{Deserialize, Serialize};

use super::metrics::SessionMetrics;

/// Summary produced when a session stops.
///
/// Serializable for export to whatever hosts the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub id: String,
    pub started_at: String,
    pub stopped_at: String,
    pub duration_secs: f64,
    pub metrics: SessionMetrics,
    /// Fatal or contract errors observed during the session.
    pub errors: Vec<String>,
    /// Pool slots still checked out after teardown; non-zero is a defect.
    pub leaked_slots: usize,
    /// The audio stream was stopped after a fatal overflow.
    pub audio_stream_stopped: bool,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.leaked_slots == 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
