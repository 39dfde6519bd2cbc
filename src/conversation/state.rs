//! Conversation state and the UI-observable view

use std::fmt;

/// Conversational phase; exactly one is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationState {
    /// Not running; initial and terminal
    #[default]
    Idle,
    /// Playing the local greeting
    Greeting,
    /// Waiting for the user to speak
    Listening,
    /// Turn sent, waiting for the first reply token
    Thinking,
    /// Reply streaming or playing
    Responding,
}

impl ConversationState {
    /// Whether new speech may start or commit a turn
    #[must_use]
    pub const fn accepts_speech(self) -> bool {
        matches!(self, Self::Greeting | Self::Listening)
    }

    /// Whether a reply is being awaited or delivered
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Thinking | Self::Responding)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Greeting => "greeting",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Responding => "responding",
        };
        f.write_str(name)
    }
}

/// Duplex channel status as shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Short human-readable error, already prefixed with "Error: "
    Error(String),
}

impl ConnectionStatus {
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Snapshot of everything a UI renders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub state: ConversationState,
    pub connection: ConnectionStatus,
    /// Microphone is live and feeding the transcription session
    pub recording: bool,
    /// Latest raw partial transcript
    pub transcript: String,
    pub transcript_visible: bool,
    /// Reply (or greeting) text revealed so far
    pub displayed_response: String,
    pub response_visible: bool,
}

impl ViewState {
    /// One-line status shown above the transcript
    #[must_use]
    pub fn status_text(&self) -> String {
        match &self.connection {
            ConnectionStatus::Error(message) => return message.clone(),
            ConnectionStatus::Disconnected => return "Disconnected".to_string(),
            ConnectionStatus::Connecting => return "Connecting...".to_string(),
            ConnectionStatus::Connected => {}
        }

        match self.state {
            ConversationState::Idle => "Press Enter to begin".to_string(),
            ConversationState::Greeting => "Greeting...".to_string(),
            ConversationState::Listening if self.recording => "Listening...".to_string(),
            ConversationState::Listening => "Ready".to_string(),
            ConversationState::Thinking => "Thinking...".to_string(),
            ConversationState::Responding => "Responding...".to_string(),
        }
    }

    /// Text currently on screen: the live transcript wins over the reply
    #[must_use]
    pub fn visible_text(&self) -> Option<&str> {
        if self.transcript_visible && !self.transcript.is_empty() {
            Some(&self.transcript)
        } else if self.response_visible && !self.displayed_response.is_empty() {
            Some(&self.displayed_response)
        } else {
            None
        }
    }
}
