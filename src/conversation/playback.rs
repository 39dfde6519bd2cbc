//! Audio output contract and the single active playback

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::event::EventSender;
use crate::Result;

/// MIME type of assembled reply audio
pub const REPLY_MIME: &str = "audio/mpeg";

/// Where clip bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipSource {
    Memory(Vec<u8>),
    File(PathBuf),
}

/// A playable audio resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub source: ClipSource,
    pub mime: &'static str,
}

impl AudioClip {
    #[must_use]
    pub const fn memory(bytes: Vec<u8>, mime: &'static str) -> Self {
        Self {
            source: ClipSource::Memory(bytes),
            mime,
        }
    }

    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ClipSource::File(path.into()),
            mime: REPLY_MIME,
        }
    }
}

/// Stops and releases one playback
///
/// Dropping the handle stops the playback too.
#[derive(Debug)]
pub struct PlaybackHandle {
    stop: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    /// Wrap a stop flag the player polls, and the task driving it
    #[must_use]
    pub const fn new(stop: Arc<AtomicBool>, task: Option<JoinHandle<()>>) -> Self {
        Self { stop, task }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Device that plays clips and reports progress
///
/// `play` must not block. Progress is posted to `events` as
/// [`super::Event::Playback`] tagged with `id`: `Loaded` once the duration is
/// known, then exactly one of `Ended` or `Failed`. Nothing is posted after
/// the returned handle is stopped.
pub trait AudioOutput: Send + Sync {
    /// Start playing `clip`
    ///
    /// # Errors
    ///
    /// Returns `Playback` if playback cannot even be started
    fn play(&self, id: u64, clip: AudioClip, events: EventSender) -> Result<PlaybackHandle>;
}

/// What a playback is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKind {
    Greeting,
    Reply,
}

/// The one active playback
#[derive(Debug)]
pub struct PlaybackSession {
    pub id: u64,
    pub kind: PlaybackKind,
    /// Known after the clip is loaded
    pub duration: Option<Duration>,
    handle: PlaybackHandle,
}

impl PlaybackSession {
    #[must_use]
    pub const fn new(id: u64, kind: PlaybackKind, handle: PlaybackHandle) -> Self {
        Self {
            id,
            kind,
            duration: None,
            handle,
        }
    }

    /// Stop and release the audio
    pub fn stop(mut self) {
        self.handle.stop();
    }
}
