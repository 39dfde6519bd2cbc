//! Error types for the voice ordering client

use thiserror::Error;

/// Result type alias for supply-voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a voice conversation
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Credential endpoint failed or returned no usable token
    #[error("credential fetch failed: {0}")]
    CredentialFetch(String),

    /// Transcription session could not be established
    #[error("transcription connect failed: {0}")]
    SessionConnect(String),

    /// Transcription service rejected the credential
    #[error("transcription auth error: {0}")]
    SessionAuth(String),

    /// Transcription session failed after it was established
    #[error("transcription error: {0}")]
    SessionRuntime(String),

    /// Duplex channel could not be opened
    #[error("channel connect failed: {0}")]
    ChannelConnect(String),

    /// Duplex channel failed while open
    #[error("channel error: {0}")]
    ChannelRuntime(String),

    /// Reply or greeting audio could not be played
    #[error("playback error: {0}")]
    Playback(String),

    /// Inbound text frame was not valid JSON or had malformed fields
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Short human-readable status line shown to the user
    #[must_use]
    pub fn status_text(&self) -> String {
        let detail = match self {
            Self::CredentialFetch(m)
            | Self::SessionConnect(m)
            | Self::SessionAuth(m)
            | Self::SessionRuntime(m)
            | Self::ChannelConnect(m)
            | Self::ChannelRuntime(m)
            | Self::Playback(m)
            | Self::Audio(m)
            | Self::Config(m) => m.clone(),
            other => other.to_string(),
        };
        format!("Error: {detail}")
    }

    /// Whether this error should ever reach the user
    ///
    /// Malformed frames are dropped after logging.
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        !matches!(self, Self::MalformedFrame(_))
    }
}
