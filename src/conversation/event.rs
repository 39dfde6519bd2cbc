//! Orchestrator input events
//!
//! Every input reaches the orchestrator as one [`Event`] on a single queue,
//! so handlers run one at a time in arrival order.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::Result;
use crate::channel::ChannelEvent;
use crate::transcription::TranscriptionEvent;

/// Progress of one playback, tagged with its playback id by the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Audio decoded, duration known
    Loaded(Duration),
    /// Audio played to the end
    Ended,
    /// Audio could not be decoded or played
    Failed(String),
}

/// Input to [`super::Orchestrator::dispatch`]
#[derive(Debug)]
pub enum Event {
    /// User asked to start a conversation
    Start,
    /// User asked to stop the conversation
    Stop,
    /// Start when idle, stop otherwise
    Toggle,
    /// Stop and close the duplex channel; ends [`super::Orchestrator::run`]
    Shutdown,
    /// Transcription session output
    Transcription(TranscriptionEvent),
    /// Duplex channel output
    Channel(ChannelEvent),
    /// Audio output progress
    Playback { id: u64, event: PlaybackEvent },
    /// Credential fetch + session connect finished
    SessionConnected { epoch: u64, result: Result<()> },
    /// Silence timer fired
    SilenceElapsed(u64),
    /// Word reveal ticked
    RevealTick(u64),
    /// Text fade timer fired
    FadeElapsed(u64),
    /// Text-only greeting pause finished
    GreetingWaitElapsed(u64),
}

/// Sending half of the orchestrator queue, cloned into every collaborator
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

/// Receiving half of the orchestrator queue
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

impl EventSender {
    /// Queue an event; returns false once the orchestrator is gone
    pub fn send(&self, event: Event) -> bool {
        match self.0.send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(event = ?e.0, "orchestrator gone, event dropped");
                false
            }
        }
    }
}

/// Create the orchestrator queue
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), rx)
}
