//! Utterance tracking and turn deduplication
//!
//! Decides, per partial transcript, whether the silence timer should be
//! (re)armed, and computes what part of a committed transcript has not been
//! sent yet.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Trailing non-speech marker such as "(silence)" or "(background noise)"
static TRAILING_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)\s*$").expect("valid regex"));

/// What the caller should do with the silence timer after a partial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing new; leave the timer alone
    Ignore,
    /// New speech; (re)arm the timer and show the transcript
    Reset(Duration),
    /// Partial carried no speech; cancel the timer without re-arming
    Clear,
}

/// Strip trailing parenthetical annotations and surrounding whitespace
#[must_use]
pub fn extract_speech(text: &str) -> String {
    let mut speech = text.trim_end();
    while let Some(m) = TRAILING_ANNOTATION.find(speech) {
        speech = &speech[..m.start()];
    }
    speech.trim().to_string()
}

/// Portion of `speech` not covered by the already-sent prefix
#[must_use]
pub fn unsent_delta<'a>(sent: &str, speech: &'a str) -> &'a str {
    if !sent.is_empty() && speech.starts_with(sent) {
        speech[sent.len()..].trim()
    } else {
        speech.trim()
    }
}

/// Per-conversation utterance state
#[derive(Debug)]
pub struct UtteranceTracker {
    silence: Duration,
    last_partial: String,
    last_sent: String,
    turn_sent: bool,
}

impl UtteranceTracker {
    /// Create a tracker that debounces with the given silence window
    #[must_use]
    pub const fn new(silence: Duration) -> Self {
        Self {
            silence,
            last_partial: String::new(),
            last_sent: String::new(),
            turn_sent: false,
        }
    }

    /// Classify a raw partial transcript
    pub fn observe(&mut self, raw: &str) -> Action {
        if self.turn_sent {
            return Action::Ignore;
        }

        let speech = extract_speech(raw);

        // Already-sent content, or the sent prefix with nothing after it
        let sent = extract_speech(&self.last_sent);
        if !sent.is_empty() && unsent_delta(&sent, &speech).is_empty() {
            return Action::Ignore;
        }

        // Unchanged since the previous partial: the clock keeps running
        let previous = extract_speech(&self.last_partial);
        if !previous.is_empty() && speech == previous {
            return Action::Ignore;
        }

        self.last_partial = raw.to_string();
        if speech.is_empty() {
            Action::Clear
        } else {
            Action::Reset(self.silence)
        }
    }

    /// Mark a turn as sent and return the delta to transmit
    ///
    /// Returns `None` when a turn is already in flight or nothing new
    /// remains after removing the sent prefix.
    pub fn commit(&mut self, speech: &str) -> Option<String> {
        if self.turn_sent {
            return None;
        }

        let delta = unsent_delta(&self.last_sent, speech);
        if delta.is_empty() {
            return None;
        }

        let delta = delta.to_string();
        self.turn_sent = true;
        self.last_sent = speech.to_string();
        Some(delta)
    }

    /// Normalized speech of the latest accepted partial
    #[must_use]
    pub fn pending_speech(&self) -> String {
        extract_speech(&self.last_partial)
    }

    /// Forget everything; the next partial starts a fresh turn
    pub fn reset(&mut self) {
        self.last_partial.clear();
        self.last_sent.clear();
        self.turn_sent = false;
    }

    #[must_use]
    pub const fn turn_sent(&self) -> bool {
        self.turn_sent
    }

    #[must_use]
    pub fn last_sent(&self) -> &str {
        &self.last_sent
    }

    #[must_use]
    pub fn last_partial(&self) -> &str {
        &self.last_partial
    }
}
