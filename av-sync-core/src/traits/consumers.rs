use crate::models::media::{AudioUnit, VideoUnit};
use crate::timing::clock::MonotonicInstant;

/// What the engine hands to the renderer.
#[derive(Debug)]
pub enum RenderEvent {
    /// A new frame to display. The renderer owns it until it releases it.
    Frame(VideoUnit),
    /// Show the frame with this sequence number once more. Carries the
    /// original timestamp; the sequence number does not advance.
    Repeat {
        sequence: u64,
        timestamp: MonotonicInstant,
    },
}

/// Display side of the pipeline.
///
/// Called on the engine thread; implementations must not block and should
/// marshal to their render loop if needed. A renderer keeps the frame it is
/// showing and releases it once a newer frame replaces it.
pub trait RenderConsumer: Send {
    fn present(&mut self, event: RenderEvent);

    /// Session teardown: release any frame still held.
    fn on_stop(&mut self) {}
}

/// Audio output side of the pipeline.
///
/// Receives captured batches unmodified, or synthesized silence. Releases
/// each batch once its samples have been consumed.
pub trait PlaybackConsumer: Send {
    fn play(&mut self, unit: AudioUnit);

    fn on_stop(&mut self) {}
}
