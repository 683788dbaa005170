//! Seam between the player state machine and a native audio stack.
//!
//! A backend opens one handle per URL attempt.  Opening only *starts* the
//! load; readiness and failure come back later through `MediaEvents`, tagged
//! with the handle id they belong to so the player can drop reports from
//! handles it has already released.

use tokio::sync::mpsc;

use crate::analysis::SampleTap;
use crate::error::{MediaErrorKind, Result};
use crate::player::PlayerEvent;

/// Identity of one native handle, unique within a player instance.
pub type HandleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSignal {
    /// Enough of the stream is buffered and audio is flowing.
    Ready,
    /// The load or the running playback failed.
    Failed(MediaErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaEvent {
    pub handle: HandleId,
    pub signal: MediaSignal,
}

/// Where backends report readiness and failure.  Cheap to clone; sending
/// after the player is gone is silently ignored.
#[derive(Debug, Clone)]
pub struct MediaEvents {
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl MediaEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PlayerEvent>) -> Self {
        Self { tx }
    }

    pub fn ready(&self, handle: HandleId) {
        self.emit(handle, MediaSignal::Ready);
    }

    pub fn failed(&self, handle: HandleId, kind: MediaErrorKind) {
        self.emit(handle, MediaSignal::Failed(kind));
    }

    fn emit(&self, handle: HandleId, signal: MediaSignal) {
        let _ = self
            .tx
            .send(PlayerEvent::Media(MediaEvent { handle, signal }));
    }
}

pub trait MediaBackend: Send + 'static {
    type Handle: MediaHandle;

    /// Create a handle and begin loading `url` at output `gain` (0.0-1.0).
    fn open(
        &mut self,
        id: HandleId,
        url: &str,
        gain: f32,
        events: MediaEvents,
    ) -> Result<Self::Handle>;
}

/// One native playable-media resource.
pub trait MediaHandle: Send + 'static {
    fn id(&self) -> HandleId;

    /// True while a source is loaded that `resume` can continue.
    fn has_source(&self) -> bool;

    fn resume(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn set_gain(&mut self, gain: f32);

    /// Start tapping decoded samples for the analysis graph.  Called at most
    /// once per handle, on the first transition to live.
    fn sample_tap(&mut self) -> Option<SampleTap>;

    /// Stop playback and free every native resource.  Must be idempotent;
    /// events already in flight for this handle may still arrive afterwards.
    fn release(&mut self);
}
