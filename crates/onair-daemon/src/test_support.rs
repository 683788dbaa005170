use onair_player::analysis::SampleTap;
use onair_player::error::Result;
use onair_player::{HandleId, MediaBackend, MediaEvents, MediaHandle, StreamPlayer};
use onair_proto::config::PlayerConfig;

/// Backend whose handles never load; enough to drive a player's channel.
pub struct NullBackend;

pub struct NullHandle(HandleId);

impl MediaBackend for NullBackend {
    type Handle = NullHandle;

    fn open(&mut self, id: HandleId, _: &str, _: f32, _: MediaEvents) -> Result<NullHandle> {
        Ok(NullHandle(id))
    }
}

impl MediaHandle for NullHandle {
    fn id(&self) -> HandleId {
        self.0
    }
    fn has_source(&self) -> bool {
        false
    }
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }
    fn pause(&mut self) -> Result<()> {
        Ok(())
    }
    fn set_gain(&mut self, _: f32) {}
    fn sample_tap(&mut self) -> Option<SampleTap> {
        None
    }
    fn release(&mut self) {}
}

pub fn null_player() -> StreamPlayer<NullBackend> {
    StreamPlayer::new(NullBackend, PlayerConfig::default())
}
