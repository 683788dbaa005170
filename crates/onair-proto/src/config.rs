use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// Stream player settings.  The retry delays and the session retry cap are
/// tuned values, not protocol constants, so they live here rather than in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Candidate endpoints for the same live stream, tried in order.
    #[serde(default = "default_stream_urls")]
    pub stream_urls: Vec<String>,
    /// Delay before trying the next candidate URL after a failure.
    #[serde(default = "default_url_retry_delay_ms")]
    pub url_retry_delay_ms: u64,
    /// Delay before restarting the whole candidate list after all URLs failed.
    #[serde(default = "default_session_retry_delay_ms")]
    pub session_retry_delay_ms: u64,
    /// Full-session retries before the error is surfaced to the listener.
    #[serde(default = "default_max_session_retries")]
    pub max_session_retries: u32,
    /// Visualizer sampling cadence (one display frame).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Volume (0-100) the player starts with.
    #[serde(default = "default_initial_volume")]
    pub initial_volume: u8,
}

/// Hosted content backend used by the site's CRUD screens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.example.co`.
    #[serde(default)]
    pub project_url: String,
    /// Public (anon) API key sent with every request.
    #[serde(default)]
    pub anon_key: String,
    /// Storage bucket for uploaded images.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

impl PlayerConfig {
    pub fn url_retry_delay(&self) -> Duration {
        Duration::from_millis(self.url_retry_delay_ms)
    }

    pub fn session_retry_delay(&self) -> Duration {
        Duration::from_millis(self.session_retry_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        // tokio's interval panics on a zero period
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn with_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stream_urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            tcp_port: default_tcp_port(),
            log_file: default_log_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            stream_urls: default_stream_urls(),
            url_retry_delay_ms: default_url_retry_delay_ms(),
            session_retry_delay_ms: default_session_retry_delay_ms(),
            max_session_retries: default_max_session_retries(),
            frame_interval_ms: default_frame_interval_ms(),
            initial_volume: default_initial_volume(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_tcp_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("daemon.log")
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8990
}

fn default_stream_urls() -> Vec<String> {
    Vec::new()
}

fn default_url_retry_delay_ms() -> u64 {
    1_000
}

fn default_session_retry_delay_ms() -> u64 {
    3_000
}

fn default_max_session_retries() -> u32 {
    2
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_initial_volume() -> u8 {
    80
}

fn default_bucket() -> String {
    "images".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.player.initial_volume = config.player.initial_volume.min(100);
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
