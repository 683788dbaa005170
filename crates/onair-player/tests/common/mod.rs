#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use onair_player::analysis::SampleTap;
use onair_player::error::Result;
use onair_player::{HandleId, MediaBackend, MediaErrorKind, MediaEvents, MediaHandle, PlayerEvent, StreamPlayer};

/// Everything the fake backend observed.  Shared between the backend (owned
/// by the player), its handles, and the test.
#[derive(Default)]
pub struct ProbeState {
    pub creates: usize,
    pub releases: usize,
    pub live: usize,
    pub max_live: usize,
    /// Creates that happened while another handle was still alive.
    pub overlaps: usize,
    pub opened: Vec<(HandleId, String)>,
    pub resumes: usize,
    pub pauses: usize,
    pub gains: Vec<f32>,
    pub taps: usize,
    events: HashMap<HandleId, MediaEvents>,
    tap: Option<SampleTap>,
}

#[derive(Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.0.lock().expect("probe lock")
    }

    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn releases(&self) -> usize {
        self.state().releases
    }

    pub fn max_live(&self) -> usize {
        self.state().max_live
    }

    pub fn overlaps(&self) -> usize {
        self.state().overlaps
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state().opened.iter().map(|(_, url)| url.clone()).collect()
    }

    pub fn last_handle(&self) -> HandleId {
        self.state().opened.last().map(|(id, _)| *id).expect("no handle opened yet")
    }

    /// Hand out `tap` to the next handle asked for samples.
    pub fn provide_tap(&self, tap: SampleTap) {
        self.state().tap = Some(tap);
    }

    /// Report readiness for `id`, even if the player released it already.
    pub fn ready(&self, id: HandleId) {
        let events = self.state().events.get(&id).cloned().expect("unknown handle");
        events.ready(id);
    }

    pub fn fail(&self, id: HandleId, kind: MediaErrorKind) {
        let events = self.state().events.get(&id).cloned().expect("unknown handle");
        events.failed(id, kind);
    }
}

pub struct FakeBackend {
    pub probe: Probe,
}

impl FakeBackend {
    pub fn new() -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl MediaBackend for FakeBackend {
    type Handle = FakeHandle;

    fn open(&mut self, id: HandleId, url: &str, gain: f32, events: MediaEvents) -> Result<FakeHandle> {
        let mut state = self.probe.state();
        if state.live > 0 {
            state.overlaps += 1;
        }
        state.creates += 1;
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        state.opened.push((id, url.to_string()));
        state.gains.push(gain);
        state.events.insert(id, events);
        Ok(FakeHandle {
            id,
            probe: self.probe.clone(),
            released: false,
        })
    }
}

pub struct FakeHandle {
    id: HandleId,
    probe: Probe,
    released: bool,
}

impl MediaHandle for FakeHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn has_source(&self) -> bool {
        !self.released
    }

    fn resume(&mut self) -> Result<()> {
        self.probe.state().resumes += 1;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.probe.state().pauses += 1;
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) {
        self.probe.state().gains.push(gain);
    }

    fn sample_tap(&mut self) -> Option<SampleTap> {
        let mut state = self.probe.state();
        state.taps += 1;
        state.tap.take()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.probe.state();
        state.releases += 1;
        state.live -= 1;
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Apply queued events until a retry timer fires (time auto-advances in
/// paused tests).  Frame ticks met on the way are applied too.
pub async fn run_until_retry(player: &mut StreamPlayer<FakeBackend>) {
    loop {
        let event = player.next_event().await.expect("player channel closed");
        let is_retry = matches!(event, PlayerEvent::RetryElapsed { .. });
        player.handle_event(event);
        if is_retry {
            return;
        }
    }
}

/// Fail whatever handle was opened last and apply the report.
pub fn fail_last(player: &mut StreamPlayer<FakeBackend>, probe: &Probe, kind: MediaErrorKind) {
    probe.fail(probe.last_handle(), kind);
    player.drain();
}

pub fn ready_last(player: &mut StreamPlayer<FakeBackend>, probe: &Probe) {
    probe.ready(probe.last_handle());
    player.drain();
}
