use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Number of frequency bands the analyser produces.
pub const LEVEL_BANDS: usize = 32;

/// Bars the station site's player widget actually draws.
pub const VISUALIZER_BARS: usize = 5;

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play,
    Pause,
    /// Play when not playing, pause when live.
    TogglePlay,
    SetVolume { value: i32 },
    ToggleMute,
    /// Manual reconnect; tears the session down and restarts if it was active.
    Refresh,
    GetStatus,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        snapshot: PlayerSnapshot,
    },
    Status {
        snapshot: PlayerSnapshot,
    },
    /// Visualizer levels, sent once per display frame while live.
    Levels {
        levels: Vec<f32>,
    },
    Log {
        message: String,
    },
}

/// Coarse playback state shown by the status chip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Connecting,
    Live,
    Paused,
    Error,
}

/// Everything the player UI renders.  Rebuilt from player state after every
/// transition; never mutated by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    pub status: PlaybackStatus,
    pub is_playing: bool,
    pub is_loading: bool,
    pub status_label: String,
    /// Only set once automatic recovery has given up.
    pub error_message: Option<String>,
    pub audio_levels: Vec<f32>,
    pub volume: u8,
    pub muted: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub url_cursor: Option<usize>,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            is_playing: false,
            is_loading: false,
            status_label: "Stopped".to_string(),
            error_message: None,
            audio_levels: vec![0.0; LEVEL_BANDS],
            volume: 0,
            muted: false,
            retry_count: 0,
            url_cursor: None,
        }
    }
}

impl PlayerSnapshot {
    /// The first `count` analyser levels, zero-padded.
    pub fn visualizer_bars(&self, count: usize) -> Vec<f32> {
        let mut bars: Vec<f32> = self.audio_levels.iter().copied().take(count).collect();
        bars.resize(count, 0.0);
        bars
    }

    /// Whether the reconnect control should be offered.
    pub fn shows_reconnect(&self) -> bool {
        self.status == PlaybackStatus::Error && !self.is_loading
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
