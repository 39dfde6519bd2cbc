//! Voice conversation orchestration
//!
//! Turns a stream of partial transcripts into discrete user turns, sends them
//! over the duplex channel, and plays the streamed reply while revealing its
//! text in sync.

mod event;
mod orchestrator;
mod playback;
mod reply;
mod reveal;
mod state;
mod timer;
mod utterance;

pub use event::{Event, EventReceiver, EventSender, PlaybackEvent, event_channel};
pub use orchestrator::{Collaborators, ConversationSettings, Orchestrator};
pub use playback::{
    AudioClip, AudioOutput, ClipSource, PlaybackHandle, PlaybackKind, PlaybackSession, REPLY_MIME,
};
pub use reply::ReplyBuffer;
pub use reveal::{RevealSchedule, WordReveal};
pub use state::{ConnectionStatus, ConversationState, ViewState};
pub use timer::{SingleShot, Ticker};
pub use utterance::{Action, UtteranceTracker, extract_speech, unsent_delta};
