//! Word-by-word text reveal paced to audio duration

use std::time::Duration;

use super::event::{Event, EventSender};
use super::timer::Ticker;

/// Pure reveal pacing for one text
#[derive(Debug, Clone)]
pub struct RevealSchedule {
    text: String,
    words: Vec<String>,
    shown: usize,
    interval: Duration,
}

impl RevealSchedule {
    /// Spread `text` over `factor * duration`, never faster than `min_interval` per word
    ///
    /// Returns `None` when the text has no words.
    #[must_use]
    pub fn new(text: &str, duration: Duration, min_interval: Duration, factor: f64) -> Option<Self> {
        let words: Vec<String> = text.split_whitespace().map(ToString::to_string).collect();
        if words.is_empty() {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let per_word = duration.mul_f64(factor).div_f64(words.len() as f64);
        Some(Self {
            text: text.to_string(),
            words,
            shown: 0,
            interval: per_word.max(min_interval),
        })
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Reveal one more word; the last step yields the untouched source text
    pub fn advance(&mut self) -> String {
        self.shown = (self.shown + 1).min(self.words.len());
        if self.is_complete() {
            self.text.clone()
        } else {
            self.words[..self.shown].join(" ")
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shown >= self.words.len()
    }
}

/// Drives a [`RevealSchedule`] from the orchestrator's ticker
#[derive(Debug)]
pub struct WordReveal {
    min_interval: Duration,
    factor: f64,
    schedule: Option<RevealSchedule>,
    ticker: Ticker,
}

impl WordReveal {
    #[must_use]
    pub fn new(min_interval: Duration, factor: f64) -> Self {
        Self {
            min_interval,
            factor,
            schedule: None,
            ticker: Ticker::new(),
        }
    }

    /// Begin revealing `text`; returns the text to display right away
    pub fn start(&mut self, text: &str, duration: Duration, events: &EventSender) -> String {
        self.stop();

        let Some(schedule) = RevealSchedule::new(text, duration, self.min_interval, self.factor)
        else {
            return text.to_string();
        };

        tracing::debug!(
            words = schedule.word_count(),
            interval_ms = schedule.interval().as_millis(),
            "starting word reveal"
        );
        self.ticker.start(schedule.interval(), events, Event::RevealTick);
        self.schedule = Some(schedule);
        String::new()
    }

    /// Handle a tick; returns the new text to display, if the tick is current
    pub fn tick(&mut self, generation: u64) -> Option<String> {
        if !self.ticker.is_current(generation) {
            return None;
        }
        let schedule = self.schedule.as_mut()?;
        let text = schedule.advance();
        if schedule.is_complete() {
            self.stop();
        }
        Some(text)
    }

    /// Cancel the reveal, leaving the displayed text as is
    pub fn stop(&mut self) {
        self.ticker.stop();
        self.schedule = None;
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.ticker.is_running()
    }
}
