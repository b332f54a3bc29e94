use thiserror::Error;

use super::media::StreamKind;

/// Errors surfaced by the synchronization session and its capture sinks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("{0} source not available")]
    SourceUnavailable(StreamKind),

    /// The audio queue should never fill if it is sized from the sample-batch
    /// cadence; hitting this means the session was misconfigured.
    #[error("audio queue overflow (capacity {capacity})")]
    AudioQueueOverflow { capacity: usize },

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("capture adapter error: {0}")]
    Adapter(String),
}

/// Buffer pool failures and ownership-protocol violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("{kind} pool exhausted ({capacity} slots checked out)")]
    Exhausted { kind: StreamKind, capacity: usize },

    #[error("{kind} slot {index} released twice")]
    DoubleRelease { kind: StreamKind, index: u32 },

    #[error("{kind} slot {index} released through a stale handle")]
    StaleHandle { kind: StreamKind, index: u32 },

    #[error("slot released into a {kind} pool that does not own it")]
    ForeignSlot { kind: StreamKind },
}
