use crate::state::SnapshotStore;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use onair_player::{PlayerCommand, PlayerHandle};
use onair_proto::protocol::PlayerSnapshot;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    store: SnapshotStore,
    player: PlayerHandle,
}

#[derive(Deserialize)]
struct VolumeBody {
    value: i32,
}

fn router(store: SnapshotStore, player: PlayerHandle) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/api/mute", post(mute))
        .route("/api/refresh", post(refresh))
        .route("/api/volume", post(set_volume))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { store, player })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    store: SnapshotStore,
    player: PlayerHandle,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(store, player);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_status(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.store.get().await)
}

fn forward(state: &HttpState, cmd: PlayerCommand) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.player.send(cmd) {
        StatusCode::ACCEPTED
    } else {
        error!("Failed to send {:?}: player is gone", cmd);
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    forward(&state, PlayerCommand::Play)
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    forward(&state, PlayerCommand::Pause)
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    forward(&state, PlayerCommand::TogglePlay)
}

async fn mute(State(state): State<HttpState>) -> StatusCode {
    forward(&state, PlayerCommand::ToggleMute)
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    forward(&state, PlayerCommand::Refresh)
}

async fn set_volume(State(state): State<HttpState>, Json(body): Json<VolumeBody>) -> StatusCode {
    forward(&state, PlayerCommand::SetVolume(body.value))
}
