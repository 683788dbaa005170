use std::sync::Arc;

use onair_player::{PlayerCommand, PlayerHandle, PlayerUpdate};
use onair_proto::protocol::{Command, PlayerSnapshot};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::BroadcastMessage;

/// Latest player snapshot, readable by every surface without a round trip
/// through the player loop.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<PlayerSnapshot>>,
}

impl SnapshotStore {
    pub async fn get(&self) -> PlayerSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, snapshot: PlayerSnapshot) {
        *self.inner.write().await = snapshot;
    }
}

/// Translate a wire command.  `GetStatus` is answered from the store and
/// never reaches the player.
pub fn player_command(cmd: &Command) -> Option<PlayerCommand> {
    match cmd {
        Command::Play => Some(PlayerCommand::Play),
        Command::Pause => Some(PlayerCommand::Pause),
        Command::TogglePlay => Some(PlayerCommand::TogglePlay),
        Command::SetVolume { value } => Some(PlayerCommand::SetVolume(*value)),
        Command::ToggleMute => Some(PlayerCommand::ToggleMute),
        Command::Refresh => Some(PlayerCommand::Refresh),
        Command::GetStatus => None,
    }
}

/// Mirror player updates into the store and fan them out to clients.  After
/// a lag the player is asked to republish, since the dropped update may have
/// been the last status change.
pub fn spawn_sync(
    mut updates: broadcast::Receiver<PlayerUpdate>,
    player: PlayerHandle,
    store: SnapshotStore,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(PlayerUpdate::Status(snapshot)) => {
                    debug!("status: {}", snapshot.status_label);
                    store.set(snapshot).await;
                    let _ = broadcast_tx.send(BroadcastMessage::StatusUpdated);
                }
                Ok(PlayerUpdate::Levels(levels)) => {
                    let _ = broadcast_tx.send(BroadcastMessage::Levels(Arc::new(levels)));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("snapshot sync lagged by {} updates", n);
                    player.resync();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::null_player;
    use onair_player::PlayerEvent;
    use onair_proto::protocol::PlaybackStatus;

    #[test]
    fn test_command_mapping() {
        assert_eq!(player_command(&Command::Play), Some(PlayerCommand::Play));
        assert_eq!(
            player_command(&Command::SetVolume { value: 140 }),
            Some(PlayerCommand::SetVolume(140))
        );
        assert_eq!(player_command(&Command::Refresh), Some(PlayerCommand::Refresh));
        assert_eq!(player_command(&Command::GetStatus), None);
    }

    #[tokio::test]
    async fn test_sync_stores_status_and_forwards_levels() {
        let (update_tx, update_rx) = broadcast::channel(8);
        let (bcast_tx, mut bcast_rx) = broadcast::channel(8);
        let store = SnapshotStore::default();
        let player = null_player();
        let task = spawn_sync(update_rx, player.handle(), store.clone(), bcast_tx);

        let snapshot = PlayerSnapshot {
            status: PlaybackStatus::Live,
            status_label: "Live".to_string(),
            ..PlayerSnapshot::default()
        };
        update_tx.send(PlayerUpdate::Status(snapshot)).unwrap();
        update_tx.send(PlayerUpdate::Levels(vec![0.5; 32])).unwrap();
        drop(update_tx);
        task.await.unwrap();

        assert_eq!(store.get().await.status, PlaybackStatus::Live);
        assert!(matches!(bcast_rx.recv().await, Ok(BroadcastMessage::StatusUpdated)));
        match bcast_rx.recv().await {
            Ok(BroadcastMessage::Levels(levels)) => assert_eq!(levels.len(), 32),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lag_asks_player_to_republish() {
        let (update_tx, update_rx) = broadcast::channel(1);
        let (bcast_tx, _bcast_rx) = broadcast::channel(8);
        let store = SnapshotStore::default();
        let mut player = null_player();
        let task = spawn_sync(update_rx, player.handle(), store.clone(), bcast_tx);

        // overflow the channel before the sync task gets to run
        for label in ["Connecting…", "Connecting…", "Error"] {
            let snapshot = PlayerSnapshot {
                status_label: label.to_string(),
                ..PlayerSnapshot::default()
            };
            update_tx.send(PlayerUpdate::Status(snapshot)).unwrap();
        }
        drop(update_tx);
        task.await.unwrap();

        assert_eq!(store.get().await.status_label, "Error");
        assert!(matches!(player.next_event().await, Some(PlayerEvent::Resync)));
    }
}
