//! Cancellable timers owned by the player: the one-shot retry timer and the
//! repeating visualizer frame loop.
//!
//! Both run as small tokio tasks that post a `PlayerEvent` back into the
//! player's channel.  Each arm/start gets a fresh token; the player ignores
//! events whose token is not the current one, which covers the window where
//! a task was aborted after it had already queued its message.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::player::PlayerEvent;

/// What a pending retry will do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Open the candidate URL the cursor now points at.
    NextUrl,
    /// Build a new session from the first candidate URL.
    FullSession,
}

#[derive(Debug)]
struct Pending {
    token: u64,
    kind: RetryKind,
    task: AbortHandle,
}

#[derive(Debug, Default)]
pub struct RetryTimer {
    seq: u64,
    pending: Option<Pending>,
}

impl RetryTimer {
    /// Arm the timer, cancelling whatever was pending.
    pub fn schedule(
        &mut self,
        kind: RetryKind,
        delay: Duration,
        tx: &mpsc::UnboundedSender<PlayerEvent>,
    ) {
        self.cancel();
        self.seq += 1;
        let token = self.seq;
        let tx = tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(PlayerEvent::RetryElapsed { token });
        });
        debug!("retry timer: {:?} in {:?} (token={})", kind, delay, token);
        self.pending = Some(Pending {
            token,
            kind,
            task: task.abort_handle(),
        });
    }

    pub fn cancel(&mut self) {
        if let Some(p) = self.pending.take() {
            p.task.abort();
            debug!("retry timer: cancelled {:?} (token={})", p.kind, p.token);
        }
    }

    /// Consume the pending retry if `token` is the current one.
    pub fn fire(&mut self, token: u64) -> Option<RetryKind> {
        match &self.pending {
            Some(p) if p.token == token => self.pending.take().map(|p| p.kind),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_kind(&self) -> Option<RetryKind> {
        self.pending.as_ref().map(|p| p.kind)
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Repeating visualizer tick, one per display frame while live.
#[derive(Debug, Default)]
pub struct FrameLoop {
    seq: u64,
    running: Option<(u64, AbortHandle)>,
}

impl FrameLoop {
    /// Start ticking.  A loop that is already running is left alone.
    pub fn start(&mut self, period: Duration, tx: &mpsc::UnboundedSender<PlayerEvent>) {
        if self.running.is_some() {
            return;
        }
        self.seq += 1;
        let token = self.seq;
        let tx = tx.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(PlayerEvent::Frame { token }).is_err() {
                    break;
                }
            }
        });
        self.running = Some((token, task.abort_handle()));
    }

    pub fn stop(&mut self) {
        if let Some((_, task)) = self.running.take() {
            task.abort();
        }
    }

    pub fn is_current(&self, token: u64) -> bool {
        matches!(self.running, Some((t, _)) if t == token)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
