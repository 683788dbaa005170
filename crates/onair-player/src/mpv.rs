//! mpv-backed media handles.
//!
//! Architecture (one mpv process per handle):
//!
//! ```text
//!   MpvBackend::open()
//!         │
//!         └── driver task  ← owns the mpv child (kill_on_drop) and IPC socket
//!                ├── writer_task   ← IpcRequest via mpsc → socket
//!                ├── reader_task   ← JSON lines from socket
//!                │                     ├── response (request_id) → oneshot
//!                │                     └── event / property-change → driver
//!                └── HandleControl (pause / gain) from MpvMediaHandle
//! ```
//!
//! Aborting the driver task drops the child, which kills mpv, which closes
//! the socket, which ends the reader and writer.  That is the whole release
//! path.
//!
//! Platform notes:
//! - Unix:   Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use onair_proto::platform;

use crate::analysis::SampleTap;
use crate::error::{MediaErrorKind, PlayerError, Result};
use crate::media::{HandleId, MediaBackend, MediaEvents, MediaHandle};
use crate::tap::spawn_pcm_tap;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id for `core-idle`; false means audio is flowing.
const OBS_CORE_IDLE: u64 = 1;

const IPC_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct IpcRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited.
#[derive(Debug, Clone)]
struct MpvEvent {
    raw: Value,
}

impl MpvEvent {
    fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// What an mpv event means for the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Playing,
    Ended(MediaErrorKind),
    Nothing,
}

fn interpret(evt: &MpvEvent) -> Observed {
    if let Some((id, data)) = evt.as_property_change() {
        return if id == OBS_CORE_IDLE && data.as_bool() == Some(false) {
            Observed::Playing
        } else {
            Observed::Nothing
        };
    }
    match evt.event_name() {
        Some("file-loaded") => Observed::Playing,
        Some("end-file") => {
            let reason = evt
                .raw
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            match reason {
                // Replacing the file, not a failure.
                "stop" | "redirect" => Observed::Nothing,
                // A live stream has no natural end.
                "eof" => Observed::Ended(MediaErrorKind::Network),
                _ => {
                    let detail = evt.raw.get("file_error").and_then(|v| v.as_str());
                    Observed::Ended(MediaErrorKind::from_end_file(reason, detail))
                }
            }
        }
        _ => Observed::Nothing,
    }
}

// ── IPC client ────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct IpcClient {
    tx: mpsc::Sender<IpcRequest>,
}

impl IpcClient {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IpcRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    fn start<R, W>(reader: R, writer: W, event_tx: mpsc::Sender<MpvEvent>) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<IpcRequest>(64);
        tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(BufReader::new(reader), pending, event_tx));
        Self { tx: cmd_tx }
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error");
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<IpcRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the response.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
}

// ── connection ────────────────────────────────────────────────────────────────

/// Removes the Unix socket file when the driver task ends or is aborted.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.0);
    }
}

#[cfg(unix)]
async fn connect_ipc(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> Result<IpcClient> {
    let socket_path = PathBuf::from(socket_name);
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if socket_path.exists() {
            break;
        }
    }
    if !socket_path.exists() {
        return Err(PlayerError::Unavailable("mpv IPC socket did not appear".into()));
    }
    let stream = tokio::net::UnixStream::connect(&socket_path).await?;
    let (read_half, write_half) = stream.into_split();
    Ok(IpcClient::start(read_half, write_half, event_tx))
}

#[cfg(windows)]
async fn connect_ipc(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> Result<IpcClient> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe_path = format!(r"\\.\pipe\{}", socket_name);
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(&pipe_path) {
            let (read_half, write_half) = tokio::io::split(client);
            return Ok(IpcClient::start(read_half, write_half, event_tx));
        }
    }
    Err(PlayerError::Unavailable("mpv named pipe did not appear".into()))
}

// ── backend ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum HandleControl {
    Pause(bool),
    Gain(f32),
}

/// Opens each URL attempt in its own mpv process.  Handle ids are only
/// unique per player, so every backend carries its own instance id and IPC
/// endpoints never collide between players in one process.
#[derive(Debug)]
pub struct MpvBackend {
    instance: u64,
}

impl Default for MpvBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MpvBackend {
    pub fn new() -> Self {
        Self {
            instance: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn socket_name(&self, id: HandleId) -> String {
        platform::mpv_socket_name(self.instance, id)
    }
}

impl MediaBackend for MpvBackend {
    type Handle = MpvMediaHandle;

    fn open(&mut self, id: HandleId, url: &str, gain: f32, events: MediaEvents) -> Result<MpvMediaHandle> {
        let binary = platform::find_mpv_binary()
            .ok_or_else(|| PlayerError::Unavailable("mpv binary not found".into()))?;
        let loaded = Arc::new(AtomicBool::new(false));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let driver = tokio::spawn(drive(
            DriverArgs {
                id,
                socket_name: self.socket_name(id),
                binary,
                url: url.to_string(),
                gain,
                loaded: loaded.clone(),
            },
            events,
            control_rx,
        ));

        Ok(MpvMediaHandle {
            id,
            url: url.to_string(),
            control_tx,
            driver: driver.abort_handle(),
            tap_task: None,
            loaded,
            released: false,
        })
    }
}

pub struct MpvMediaHandle {
    id: HandleId,
    url: String,
    control_tx: mpsc::UnboundedSender<HandleControl>,
    driver: AbortHandle,
    tap_task: Option<AbortHandle>,
    loaded: Arc<AtomicBool>,
    released: bool,
}

impl MpvMediaHandle {
    fn control(&self, ctl: HandleControl) -> Result<()> {
        if self.released {
            return Err(PlayerError::Control("handle already released".into()));
        }
        self.control_tx
            .send(ctl)
            .map_err(|_| PlayerError::Control("mpv driver has exited".into()))
    }
}

impl MediaHandle for MpvMediaHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn has_source(&self) -> bool {
        !self.released && !self.driver.is_finished() && self.loaded.load(Ordering::Acquire)
    }

    fn resume(&mut self) -> Result<()> {
        self.control(HandleControl::Pause(false))
    }

    fn pause(&mut self) -> Result<()> {
        self.control(HandleControl::Pause(true))
    }

    fn set_gain(&mut self, gain: f32) {
        if let Err(e) = self.control(HandleControl::Gain(gain)) {
            debug!("mpv handle {}: gain not applied: {}", self.id, e);
        }
    }

    fn sample_tap(&mut self) -> Option<SampleTap> {
        if self.released || self.tap_task.is_some() {
            return None;
        }
        let Some(ffmpeg) = platform::find_ffmpeg_binary() else {
            warn!("ffmpeg not found, visualizer disabled");
            return None;
        };
        let tap = SampleTap::new();
        self.tap_task = Some(spawn_pcm_tap(ffmpeg, self.url.clone(), tap.clone()));
        Some(tap)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.loaded.store(false, Ordering::Release);
        if let Some(tap) = self.tap_task.take() {
            tap.abort();
        }
        self.driver.abort();
        info!("mpv handle {}: released", self.id);
    }
}

impl Drop for MpvMediaHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ── driver task ───────────────────────────────────────────────────────────────

struct DriverArgs {
    id: HandleId,
    socket_name: String,
    binary: PathBuf,
    url: String,
    gain: f32,
    loaded: Arc<AtomicBool>,
}

async fn drive(
    args: DriverArgs,
    events: MediaEvents,
    control_rx: mpsc::UnboundedReceiver<HandleControl>,
) {
    let id = args.id;
    let loaded = args.loaded.clone();
    match run_mpv(args, &events, control_rx).await {
        Ok(()) => debug!("mpv handle {}: driver finished", id),
        Err(e) => {
            warn!("mpv handle {}: {}", id, e);
            loaded.store(false, Ordering::Release);
            events.failed(id, e.kind());
        }
    }
}

fn volume_percent(gain: f32) -> i64 {
    (gain * 100.0).clamp(0.0, 100.0).round() as i64
}

async fn run_mpv(
    args: DriverArgs,
    events: &MediaEvents,
    mut control_rx: mpsc::UnboundedReceiver<HandleControl>,
) -> Result<()> {
    let socket_name = args.socket_name.clone();
    let _socket_file = SocketFile(PathBuf::from(&socket_name));
    #[cfg(unix)]
    let _ = tokio::fs::remove_file(&socket_name).await;

    debug!("mpv handle {}: spawning {:?}", args.id, args.binary);
    let _child = tokio::process::Command::new(&args.binary)
        .arg("--no-video")
        .arg("--idle=yes")
        .arg(platform::mpv_socket_arg(&socket_name))
        .arg("--quiet")
        .arg(format!("--volume={}", volume_percent(args.gain)))
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);
    let ipc = connect_ipc(&socket_name, event_tx).await?;

    ipc.send(json!(["observe_property", OBS_CORE_IDLE, "core-idle"]))
        .await
        .map_err(|e| PlayerError::Control(e.to_string()))?;
    ipc.send(json!(["loadfile", args.url]))
        .await
        .map_err(|e| PlayerError::Control(e.to_string()))?;

    loop {
        tokio::select! {
            evt = event_rx.recv() => {
                let Some(evt) = evt else {
                    // mpv went away underneath us
                    args.loaded.store(false, Ordering::Release);
                    events.failed(args.id, MediaErrorKind::Aborted);
                    return Ok(());
                };
                match interpret(&evt) {
                    Observed::Playing => {
                        if !args.loaded.swap(true, Ordering::AcqRel) {
                            events.ready(args.id);
                        }
                    }
                    Observed::Ended(kind) => {
                        args.loaded.store(false, Ordering::Release);
                        events.failed(args.id, kind);
                        return Ok(());
                    }
                    Observed::Nothing => {}
                }
            }
            ctl = control_rx.recv() => {
                let command = match ctl {
                    None => return Ok(()),
                    Some(HandleControl::Pause(paused)) => json!(["set_property", "pause", paused]),
                    Some(HandleControl::Gain(gain)) => {
                        json!(["set_property", "volume", volume_percent(gain)])
                    }
                };
                if let Err(e) = ipc.send(command).await {
                    warn!("mpv handle {}: control failed: {}", args.id, e);
                }
            }
        }
    }
}
