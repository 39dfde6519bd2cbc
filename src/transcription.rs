//! Streaming transcription session contract
//!
//! The orchestrator only sees four events and two operations. The concrete
//! realtime adapter lives in [`crate::voice::ScribeSession`].

use async_trait::async_trait;
use secrecy::SecretString;

use crate::Result;
use crate::config::Language;

/// Event emitted by a transcription session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionEvent {
    /// In-progress transcript, may still change
    Partial(String),
    /// Final transcript for a detected end of utterance
    Committed(String),
    /// Service rejected the credential
    AuthError(String),
    /// Session failed after connecting
    Error(String),
}

/// Microphone processing requested from the capture side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Everything needed to open one transcription session
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Single-use credential from the credential endpoint
    pub token: SecretString,
    pub language: Language,
    pub constraints: AudioConstraints,
}

/// A realtime speech-to-text session
///
/// Implementations report transcripts through the event sender they were
/// built with. `connect` replaces any live connection. `disconnect` must also
/// cancel a `connect` that is still in flight, so that a connect overtaken by
/// a disconnect never leaves a live session behind.
#[async_trait]
pub trait TranscriptionSession: Send + Sync {
    /// Open the session and start streaming microphone audio
    ///
    /// # Errors
    ///
    /// Returns `SessionConnect` if the device or the service is unavailable,
    /// `SessionAuth` if the credential is rejected during the handshake
    async fn connect(&self, request: ConnectRequest) -> Result<()>;

    /// Close the session; a no-op when already closed
    fn disconnect(&self);
}
