//! Live-stream player core for the station site.
//!
//! `StreamPlayer` plays one stream from a list of candidate URLs, falls back
//! and retries within fixed bounds, feeds a spectrum visualizer, and
//! releases every native resource on refresh, unmount or drop.  Native audio
//! sits behind `MediaBackend`; `MpvBackend` is the production
//! implementation.

pub mod analysis;
pub mod error;
pub mod media;
pub mod mpv;
pub mod player;
pub mod schedule;
pub mod session;
mod tap;

pub use error::{MediaErrorKind, PlayerError};
pub use media::{HandleId, MediaBackend, MediaEvent, MediaEvents, MediaHandle, MediaSignal};
pub use mpv::MpvBackend;
pub use player::{
    PlayerCommand, PlayerDiagnostics, PlayerEvent, PlayerHandle, PlayerState, PlayerUpdate,
    StreamPlayer,
};
