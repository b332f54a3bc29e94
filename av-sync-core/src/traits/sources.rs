use crate::models::error::SyncError;
use crate::models::media::SourceInfo;
use crate::session::sinks::{AudioSink, VideoSink};

/// Video capture adapter.
///
/// Implemented by device backends (polling or callback driven). The adapter
/// stamps each frame with `VideoSink::now()` and submits it through the sink,
/// which is its only path into the core.
pub trait FrameSource: Send {
    /// Whether the capture device is currently present.
    fn is_available(&self) -> bool;

    /// Start delivering frames into `sink` from the adapter's own context.
    fn start(&mut self, sink: VideoSink) -> Result<(), SyncError>;

    /// Stop delivering and join any adapter thread. After this returns the
    /// adapter must not touch the sink again.
    fn stop(&mut self) -> Result<(), SyncError>;

    fn info(&self) -> SourceInfo;
}

/// Audio capture adapter. Same contract as `FrameSource`; callback-driven
/// adapters push from whatever context the host driver calls them on.
pub trait SampleSource: Send {
    fn is_available(&self) -> bool;

    fn start(&mut self, sink: AudioSink) -> Result<(), SyncError>;

    fn stop(&mut self) -> Result<(), SyncError>;

    fn info(&self) -> SourceInfo;
}
