//! Reply accumulation between `assistant_start` and `assistant_done`

use super::playback::{AudioClip, REPLY_MIME};

/// Text and audio of the reply currently streaming in
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    full_text: String,
    chunks: Vec<Vec<u8>>,
}

impl ReplyBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything from the previous reply
    pub fn clear(&mut self) {
        self.full_text.clear();
        self.chunks.clear();
    }

    pub fn push_text(&mut self, text: &str) {
        self.full_text.push_str(text);
    }

    pub fn push_audio(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    #[must_use]
    pub fn has_audio(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Total buffered audio bytes
    #[must_use]
    pub fn audio_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Assemble buffered chunks, in arrival order, into one playable clip
    pub fn take_clip(&mut self) -> Option<AudioClip> {
        if self.chunks.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.chunks).concat();
        Some(AudioClip::memory(bytes, REPLY_MIME))
    }
}
