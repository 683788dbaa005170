//! StreamPlayer: single-owner event loop for one live stream.
//!
//! The player owns the playback session, the retry timer and the visualizer
//! frame loop exclusively.  Everything that can change them arrives as a
//! `PlayerEvent` on one channel: commands from the UI, readiness/failure
//! reports from the media backend, retry timer expiry and frame ticks.
//! Nothing else touches player state, so callbacks can never interleave
//! destructively.
//!
//! Recovery policy, in order:
//!   1. a failed candidate URL is released and the next one is tried after
//!      `url_retry_delay`;
//!   2. once every candidate failed the session ends in `Error` and a new
//!      session is started after `session_retry_delay`, at most
//!      `max_session_retries` times;
//!   3. after that the error stays until the listener presses reconnect.
//!
//! After each transition a `PlayerUpdate::Status` snapshot is broadcast.

use onair_proto::config::PlayerConfig;
use onair_proto::protocol::{PlaybackStatus, PlayerSnapshot, LEVEL_BANDS};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::MediaErrorKind;
use crate::media::{HandleId, MediaBackend, MediaEvent, MediaEvents, MediaHandle, MediaSignal};
use crate::schedule::{FrameLoop, RetryKind, RetryTimer};
use crate::session::PlaybackSession;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// User-facing controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    TogglePlay,
    SetVolume(i32),
    ToggleMute,
    Refresh,
}

/// All inputs into the player loop.
#[derive(Debug)]
pub enum PlayerEvent {
    Command(PlayerCommand),
    Media(MediaEvent),
    RetryElapsed { token: u64 },
    Frame { token: u64 },
    /// Broadcast the current snapshot again, for observers that lagged.
    Resync,
    /// Unmount: tear everything down and leave the loop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Connecting,
    Live,
    Paused,
    Error(MediaErrorKind),
}

#[derive(Debug, Clone)]
pub enum PlayerUpdate {
    Status(PlayerSnapshot),
    Levels(Vec<f32>),
}

/// Resource accounting, for checking that teardown left nothing behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerDiagnostics {
    pub live_handle: Option<HandleId>,
    pub has_graph: bool,
    pub retry_pending: bool,
    pub frame_loop_running: bool,
}

impl PlayerDiagnostics {
    pub fn is_clear(&self) -> bool {
        self.live_handle.is_none()
            && !self.has_graph
            && !self.retry_pending
            && !self.frame_loop_running
    }
}

/// Cloneable sender for driving a player that runs on its own task.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl PlayerHandle {
    /// Returns false once the player is gone.
    pub fn send(&self, cmd: PlayerCommand) -> bool {
        self.tx.send(PlayerEvent::Command(cmd)).is_ok()
    }

    pub fn resync(&self) {
        let _ = self.tx.send(PlayerEvent::Resync);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(PlayerEvent::Shutdown);
    }
}

pub struct StreamPlayer<B: MediaBackend> {
    config: PlayerConfig,
    backend: B,
    tx: mpsc::UnboundedSender<PlayerEvent>,
    rx: mpsc::UnboundedReceiver<PlayerEvent>,
    updates: broadcast::Sender<PlayerUpdate>,
    session: Option<PlaybackSession<B::Handle>>,
    state: PlayerState,
    retry_count: u32,
    volume: u8,
    muted: bool,
    /// Per-instance handle identity; never shared between players.
    next_handle: HandleId,
    retry: RetryTimer,
    frames: FrameLoop,
    levels: [f32; LEVEL_BANDS],
    error_message: Option<String>,
}

impl<B: MediaBackend> StreamPlayer<B> {
    pub fn new(backend: B, config: PlayerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let volume = config.initial_volume.min(100);
        Self {
            config,
            backend,
            tx,
            rx,
            updates,
            session: None,
            state: PlayerState::Idle,
            retry_count: 0,
            volume,
            muted: false,
            next_handle: 0,
            retry: RetryTimer::default(),
            frames: FrameLoop::default(),
            levels: [0.0; LEVEL_BANDS],
            error_message: None,
        }
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerUpdate> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn url_cursor(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.url_cursor())
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Output gain actually applied to the handle.
    pub fn effective_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            f32::from(self.volume) / 100.0
        }
    }

    pub fn diagnostics(&self) -> PlayerDiagnostics {
        PlayerDiagnostics {
            live_handle: self.session.as_ref().and_then(|s| s.handle_id()),
            has_graph: self.session.as_ref().is_some_and(|s| s.has_graph()),
            retry_pending: self.retry.is_pending(),
            frame_loop_running: self.frames.is_running(),
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let auto_retry = self.retry.pending_kind() == Some(RetryKind::FullSession);
        let (status, label) = match self.state {
            PlayerState::Idle => (PlaybackStatus::Idle, "Stopped"),
            PlayerState::Connecting => (PlaybackStatus::Connecting, "Connecting…"),
            PlayerState::Live => (PlaybackStatus::Live, "Live"),
            PlayerState::Paused => (PlaybackStatus::Paused, "Paused"),
            PlayerState::Error(_) if auto_retry => (PlaybackStatus::Error, "Connecting…"),
            PlayerState::Error(_) => (PlaybackStatus::Error, "Error"),
        };
        let terminal = matches!(self.state, PlayerState::Error(_)) && !auto_retry;
        PlayerSnapshot {
            status,
            is_playing: self.state == PlayerState::Live,
            is_loading: self.state == PlayerState::Connecting || (status == PlaybackStatus::Error && auto_retry),
            status_label: label.to_string(),
            error_message: if terminal {
                self.error_message.clone()
            } else {
                None
            },
            audio_levels: self.levels.to_vec(),
            volume: self.volume,
            muted: self.muted,
            retry_count: self.retry_count,
            url_cursor: self.url_cursor(),
        }
    }

    // ── event loop ────────────────────────────────────────────────────────────

    pub async fn next_event(&mut self) -> Option<PlayerEvent> {
        self.rx.recv().await
    }

    /// Apply one event.  Returns false once the player has shut down.
    pub fn handle_event(&mut self, event: PlayerEvent) -> bool {
        match event {
            PlayerEvent::Command(cmd) => self.apply(cmd),
            PlayerEvent::Media(evt) => self.on_media(evt),
            PlayerEvent::RetryElapsed { token } => self.on_retry(token),
            PlayerEvent::Frame { token } => self.on_frame(token),
            PlayerEvent::Resync => self.publish(),
            PlayerEvent::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Apply every event that is already queued without waiting for more.
    pub fn drain(&mut self) -> bool {
        while let Ok(event) = self.rx.try_recv() {
            if !self.handle_event(event) {
                return false;
            }
        }
        true
    }

    /// Run until a `Shutdown` event arrives.
    pub async fn run(mut self) {
        info!(
            "player: starting with {} candidate url(s)",
            self.config.stream_urls.len()
        );
        self.publish();
        while let Some(event) = self.next_event().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.shutdown();
        info!("player: stopped");
    }

    // ── commands ──────────────────────────────────────────────────────────────

    pub fn apply(&mut self, cmd: PlayerCommand) {
        debug!("player: command {:?}", cmd);
        match cmd {
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::TogglePlay => {
                if self.state == PlayerState::Live {
                    self.pause()
                } else {
                    self.play()
                }
            }
            PlayerCommand::SetVolume(value) => self.set_volume(value),
            PlayerCommand::ToggleMute => self.toggle_mute(),
            PlayerCommand::Refresh => self.refresh(),
        }
    }

    pub fn play(&mut self) {
        match self.state {
            PlayerState::Live | PlayerState::Connecting => {
                debug!("player: play ignored while {:?}", self.state);
            }
            PlayerState::Paused => {
                let resumed = match self.session.as_mut() {
                    Some(session) if session.has_source() => match session.handle_mut() {
                        Some(handle) => match handle.resume() {
                            Ok(()) => true,
                            Err(e) => {
                                warn!("player: resume failed, reconnecting: {}", e);
                                false
                            }
                        },
                        None => false,
                    },
                    _ => false,
                };
                if resumed {
                    info!("player: resumed");
                    self.enter_live();
                } else {
                    self.start_fresh();
                }
            }
            PlayerState::Idle | PlayerState::Error(_) => self.start_fresh(),
        }
    }

    pub fn pause(&mut self) {
        if self.state != PlayerState::Live {
            debug!("player: pause ignored while {:?}", self.state);
            return;
        }
        if let Some(handle) = self.session.as_mut().and_then(|s| s.handle_mut()) {
            if let Err(e) = handle.pause() {
                warn!("player: pause failed, staying live: {}", e);
                return;
            }
        }
        self.frames.stop();
        self.levels = [0.0; LEVEL_BANDS];
        self.set_state(PlayerState::Paused);
        self.publish();
    }

    pub fn set_volume(&mut self, value: i32) {
        // clamp makes the narrowing lossless
        self.volume = value.clamp(0, 100) as u8;
        self.apply_gain();
        self.publish();
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        self.apply_gain();
        self.publish();
    }

    /// Manual reconnect.  Tears the session down and, if the listener was
    /// trying to listen (connecting, live, or failed), starts over.
    pub fn refresh(&mut self) {
        let was_active = matches!(
            self.state,
            PlayerState::Connecting | PlayerState::Live | PlayerState::Error(_)
        );
        info!("player: refresh (restart={})", was_active);
        self.teardown();
        if was_active {
            self.start_session();
        } else {
            self.publish();
        }
    }

    /// Unmount / page unload.  Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.teardown();
        self.publish();
    }

    // ── event handlers ────────────────────────────────────────────────────────

    fn on_media(&mut self, evt: MediaEvent) {
        let current = self
            .session
            .as_ref()
            .is_some_and(|s| s.is_current(evt.handle));
        if !current {
            debug!(
                "player: ignoring {:?} from released handle {}",
                evt.signal, evt.handle
            );
            return;
        }

        match (evt.signal, self.state) {
            (MediaSignal::Ready, PlayerState::Connecting) => {
                info!("player: handle {} is live", evt.handle);
                self.retry_count = 0;
                self.error_message = None;
                if let Some(session) = self.session.as_mut() {
                    session.ensure_graph();
                }
                self.enter_live();
            }
            (MediaSignal::Ready, state) => {
                debug!("player: ready from handle {} while {:?}", evt.handle, state);
            }
            (MediaSignal::Failed(kind), PlayerState::Connecting | PlayerState::Live) => {
                self.on_attempt_failed(kind);
            }
            (MediaSignal::Failed(kind), PlayerState::Paused) => {
                // Source is gone; the next play() reconnects.
                warn!("player: paused stream dropped: {}", kind);
                if let Some(session) = self.session.as_mut() {
                    session.release_media();
                }
                self.publish();
            }
            (MediaSignal::Failed(kind), state) => {
                debug!("player: failure {:?} ignored while {:?}", kind, state);
            }
        }
    }

    fn on_retry(&mut self, token: u64) {
        match self.retry.fire(token) {
            None => debug!("player: stale retry token {}", token),
            Some(RetryKind::NextUrl) => {
                if self.state == PlayerState::Connecting && self.session.is_some() {
                    self.open_current();
                    self.publish();
                }
            }
            Some(RetryKind::FullSession) => {
                if matches!(self.state, PlayerState::Error(_)) {
                    self.retry_count += 1;
                    info!(
                        "player: session retry {}/{}",
                        self.retry_count, self.config.max_session_retries
                    );
                    self.start_session();
                }
            }
        }
    }

    fn on_frame(&mut self, token: u64) {
        if !self.frames.is_current(token) {
            return;
        }
        if self.state != PlayerState::Live {
            self.frames.stop();
            return;
        }
        if let Some(graph) = self.session.as_mut().and_then(|s| s.graph_mut()) {
            self.levels = *graph.sample();
        }
        let _ = self.updates.send(PlayerUpdate::Levels(self.levels.to_vec()));
    }

    // ── session lifecycle ─────────────────────────────────────────────────────

    fn start_fresh(&mut self) {
        self.retry.cancel();
        self.retry_count = 0;
        self.start_session();
    }

    /// Replace the session with a new one at the first candidate URL.
    fn start_session(&mut self) {
        self.frames.stop();
        self.levels = [0.0; LEVEL_BANDS];
        // The old session, and with it any handle and graph, goes first.
        self.session = None;
        self.error_message = None;

        if self.config.stream_urls.is_empty() {
            warn!("player: no stream url configured");
            self.retry.cancel();
            self.error_message = Some("No stream is configured.".to_string());
            self.set_state(PlayerState::Error(MediaErrorKind::UnsupportedSource));
            self.publish();
            return;
        }

        self.session = Some(PlaybackSession::new());
        self.set_state(PlayerState::Connecting);
        self.open_current();
        self.publish();
    }

    /// Open the URL under the cursor into the current session.
    fn open_current(&mut self) {
        let gain = self.effective_gain();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let cursor = session.url_cursor();
        let Some(url) = self.config.stream_urls.get(cursor) else {
            return;
        };

        // Release before create: never two handles at once.
        session.release_media();
        self.next_handle += 1;
        let id = self.next_handle;
        info!(
            "player: opening {} (candidate {}/{}, handle {})",
            url,
            cursor + 1,
            self.config.stream_urls.len(),
            id
        );

        let opened = self
            .backend
            .open(id, url, gain, MediaEvents::new(self.tx.clone()));
        match opened {
            Ok(handle) => session.install(handle),
            Err(e) => {
                warn!("player: could not open {}: {}", url, e);
                self.on_attempt_failed(e.kind());
            }
        }
    }

    fn on_attempt_failed(&mut self, kind: MediaErrorKind) {
        self.frames.stop();
        self.levels = [0.0; LEVEL_BANDS];
        let url_count = self.config.stream_urls.len();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        warn!(
            "player: candidate {} failed: {:?}",
            session.url_cursor() + 1,
            kind
        );
        session.release_media();

        if session.advance(url_count) {
            self.set_state(PlayerState::Connecting);
            self.retry
                .schedule(RetryKind::NextUrl, self.config.url_retry_delay(), &self.tx);
        } else {
            self.set_state(PlayerState::Error(kind));
            if self.retry_count < self.config.max_session_retries {
                self.retry.schedule(
                    RetryKind::FullSession,
                    self.config.session_retry_delay(),
                    &self.tx,
                );
            } else {
                warn!(
                    "player: all candidates failed after {} session retries",
                    self.retry_count
                );
                self.error_message = Some(kind.message().to_string());
            }
        }
        self.publish();
    }

    fn enter_live(&mut self) {
        self.set_state(PlayerState::Live);
        self.frames.start(self.config.frame_interval(), &self.tx);
        self.publish();
    }

    /// The one release path shared by refresh, unmount and drop.
    fn teardown(&mut self) {
        self.retry.cancel();
        self.frames.stop();
        self.session = None;
        self.levels = [0.0; LEVEL_BANDS];
        self.retry_count = 0;
        self.error_message = None;
        self.set_state(PlayerState::Idle);
    }

    fn apply_gain(&mut self) {
        let gain = self.effective_gain();
        if let Some(handle) = self.session.as_mut().and_then(|s| s.handle_mut()) {
            handle.set_gain(gain);
        }
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            info!("player: status {:?} → {:?}", self.state, state);
            self.state = state;
        }
    }

    fn publish(&self) {
        let _ = self.updates.send(PlayerUpdate::Status(self.snapshot()));
    }
}

impl<B: MediaBackend> Drop for StreamPlayer<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
