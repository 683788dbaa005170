mod http;
mod socket;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use onair_player::{MpvBackend, StreamPlayer};
use onair_proto::config::Config;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The snapshot store holds a new status.
    StatusUpdated,
    /// One visualizer frame (32 levels, 0.0-1.0).
    Levels(Arc<Vec<f32>>),
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let config = Config::load()?;

    let log_path = config.daemon.log_file.clone();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,onair_daemon=debug,onair_player=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", Config::config_path());
    if config.player.stream_urls.is_empty() {
        warn!("No stream_urls configured; playback will report an error");
    }

    let player = StreamPlayer::new(MpvBackend::new(), config.player.clone());
    let player_handle = player.handle();
    let store = state::SnapshotStore::default();
    let _sync_handle = state::spawn_sync(
        player.subscribe(),
        player_handle.clone(),
        store.clone(),
        broadcast_tx.clone(),
    );
    let player_task = tokio::spawn(player.run());

    let shutdown = CancellationToken::new();

    let socket_handle = socket::start_server(
        config.daemon.bind_address.clone(),
        config.daemon.tcp_port,
        store.clone(),
        player_handle.clone(),
        broadcast_tx.clone(),
        shutdown.clone(),
    );

    let http_handle = config.http.enabled.then(|| {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            store.clone(),
            player_handle.clone(),
            shutdown.clone(),
        )
    });

    info!("Daemon initialised, waiting for clients");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown.cancel();
    player_handle.shutdown();
    if let Err(e) = player_task.await {
        warn!("player task ended abnormally: {}", e);
    }
    let _ = socket_handle.await;
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }

    Ok(())
}
