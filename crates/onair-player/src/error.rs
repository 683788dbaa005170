//! Error types for the stream player.

use thiserror::Error;

/// Why a single URL attempt failed.  Used for the message shown to the
/// listener only; every kind is handled the same way by the retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaErrorKind {
    Aborted,
    Network,
    Decode,
    UnsupportedSource,
    Unknown,
}

impl MediaErrorKind {
    pub fn message(self) -> &'static str {
        match self {
            MediaErrorKind::Aborted => "Playback was aborted.",
            MediaErrorKind::Network => "A network error interrupted the stream.",
            MediaErrorKind::Decode => "The stream could not be decoded.",
            MediaErrorKind::UnsupportedSource => "The stream format is not supported.",
            MediaErrorKind::Unknown => "An unknown playback error occurred.",
        }
    }

    /// Map an mpv `end-file` event to a kind.  `reason` is the event's
    /// `reason` field, `detail` its optional `file_error` text.
    pub fn from_end_file(reason: &str, detail: Option<&str>) -> Self {
        match reason {
            "stop" | "quit" | "redirect" => return MediaErrorKind::Aborted,
            "network" => return MediaErrorKind::Network,
            _ => {}
        }
        let detail = detail.unwrap_or_default().to_ascii_lowercase();
        if detail.contains("network")
            || detail.contains("http")
            || detail.contains("connection")
            || detail.contains("timed out")
        {
            MediaErrorKind::Network
        } else if detail.contains("unrecognized")
            || detail.contains("unsupported")
            || detail.contains("format")
        {
            MediaErrorKind::UnsupportedSource
        } else if detail.contains("decod") || detail.contains("no audio") {
            MediaErrorKind::Decode
        } else if detail.contains("abort") || detail.contains("interrupt") {
            MediaErrorKind::Aborted
        } else {
            MediaErrorKind::Unknown
        }
    }
}

impl std::fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Errors raised by media backends.  The player never returns these to its
/// callers; it logs them and feeds them into the retry logic.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("media backend unavailable: {0}")]
    Unavailable(String),

    #[error("media control failed: {0}")]
    Control(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    pub fn kind(&self) -> MediaErrorKind {
        match self {
            PlayerError::Unavailable(_) => MediaErrorKind::UnsupportedSource,
            PlayerError::Control(_) => MediaErrorKind::Unknown,
            PlayerError::Io(_) => MediaErrorKind::Network,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
