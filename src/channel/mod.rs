//! Duplex channel to the backend agent
//!
//! One long-lived connection per conversation carries JSON control frames in
//! both directions and binary reply audio from the server.

mod client;
mod frame;

pub use client::ChannelClient;
pub use frame::{InboundFrame, OutboundFrame, decode_text};

use crate::Result;

/// Channel output delivered to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connection established
    Opened,
    /// Connection could not be established
    ConnectFailed(String),
    /// Connection closed by either side
    Closed,
    /// Transport failure while open
    Error(String),
    /// Decoded control frame
    Frame(InboundFrame),
    /// Binary audio chunk
    Audio(Vec<u8>),
}

/// Outbound side of the duplex channel
pub trait DuplexChannel: Send + Sync {
    /// Whether the connection is currently open
    fn is_open(&self) -> bool;

    /// Queue one user turn for sending
    ///
    /// # Errors
    ///
    /// Returns `ChannelRuntime` if the channel is not open
    fn send_transcript(&self, text: &str) -> Result<()>;

    /// Close the connection; a no-op when already closed
    fn close(&self);
}
