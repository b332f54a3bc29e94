use super::error::SyncError;
use super::media::StreamKind;
use super::report::SessionReport;

/// Synchronization session state machine.
///
/// State transitions:
/// ```text
/// idle → ready → running ⇄ degraded
///                   ↓         ↓
///                stopping → completed → idle
/// ready → failed (startup error)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Ready,
    Running,
    /// A capture source is disconnected: last frame frozen, silence playing.
    Degraded { video_lost: bool, audio_lost: bool },
    Stopping,
    Completed(Box<SessionReport>),
    Failed(SyncError),
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Running, degraded or not.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Degraded { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Whether `kind` is currently reported lost.
    pub fn has_lost(&self, kind: StreamKind) -> bool {
        match (self, kind) {
            (Self::Degraded { video_lost, .. }, StreamKind::Video) => *video_lost,
            (Self::Degraded { audio_lost, .. }, StreamKind::Audio) => *audio_lost,
            _ => false,
        }
    }

    /// State after the set of lost streams changes while active.
    pub(crate) fn with_streams_lost(video_lost: bool, audio_lost: bool) -> Self {
        if video_lost || audio_lost {
            Self::Degraded {
                video_lost,
                audio_lost,
            }
        } else {
            Self::Running
        }
    }
}
