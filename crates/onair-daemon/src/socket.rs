use crate::state::{player_command, SnapshotStore};
use crate::BroadcastMessage;
use onair_player::PlayerHandle;
use onair_proto::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    store: SnapshotStore,
    player: PlayerHandle,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let store = store.clone();
                    let player = player.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let shutdown = shutdown.clone();

                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = handle_client(stream, store, id, player, bcast_rx) => {}
                        }
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
        info!("TCP server stopped");
    })
}

async fn handle_client(
    stream: TcpStream,
    store: SnapshotStore,
    client_id: usize,
    player: PlayerHandle,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&store).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while let Some(len) = complete_frame(&read_buf) {
                            let decoded = Message::decode(&read_buf);
                            read_buf.drain(..len);
                            let cmd = match decoded {
                                Ok((Message::Command(cmd), _)) => cmd,
                                Ok(_) => continue,
                                Err(e) => {
                                    warn!("Client {} sent an unreadable frame: {}", client_id, e);
                                    continue;
                                }
                            };
                            info!("Client {} sent command: {:?}", client_id, cmd);

                            if let Some(player_cmd) = player_command(&cmd) {
                                if !player.send(player_cmd) {
                                    warn!("player is gone");
                                    return;
                                }
                            }
                            if cmd == Command::GetStatus {
                                if let Ok(encoded) = encode_status(&store).await {
                                    if write_half.write_all(&encoded).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StatusUpdated) => encode_status(&store).await,
                    Ok(BroadcastMessage::Levels(levels)) => {
                        Message::Broadcast(Broadcast::Levels { levels: levels.to_vec() }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_status(&store).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Length of the first frame in `buf` if all of it has arrived.
fn complete_frame(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let len = 4 + u32::from_be_bytes(header) as usize;
    (buf.len() >= len).then_some(len)
}

async fn encode_hello(store: &SnapshotStore) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        snapshot: store.get().await,
    })
    .encode()
}

async fn encode_status(store: &SnapshotStore) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::Status {
        snapshot: store.get().await,
    })
    .encode()
}
