//! Supply Voice - voice ordering client for materials procurement
//!
//! This library provides the conversation core of the voice ordering app:
//! - Turn detection from streaming partial transcripts
//! - Duplex channel to the backend ordering agent
//! - Reply playback with word-by-word text reveal
//! - Realtime speech-to-text and audio device adapters
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          Microphone  │  Speakers  │  Terminal UI      │
//! └───────────┬──────────────────▲────────────▲──────────┘
//!             │                  │            │ ViewState
//! ┌───────────▼──────────────────┴────────────┴──────────┐
//! │                    Orchestrator                       │
//! │  Utterance  │  Silence Timer  │  Playback  │  Reveal  │
//! └───────────┬──────────────────────────────▲───────────┘
//!             │ transcript                   │ tokens + audio
//! ┌───────────▼──────────────────────────────┴───────────┐
//! │            Backend ordering agent (WebSocket)         │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod transcription;
pub mod voice;

pub use channel::{ChannelClient, ChannelEvent, DuplexChannel, InboundFrame, OutboundFrame};
pub use config::{Config, Language};
pub use conversation::{
    Collaborators, ConnectionStatus, ConversationSettings, ConversationState, Event, EventSender,
    Orchestrator, ViewState, event_channel,
};
pub use credentials::{CredentialSource, HttpCredentials};
pub use error::{Error, Result};
pub use transcription::{AudioConstraints, ConnectRequest, TranscriptionEvent, TranscriptionSession};
