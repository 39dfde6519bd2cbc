//! Generation-checked timers that fire into the orchestrator queue
//!
//! A timer posts an event carrying the generation it was armed with. The
//! orchestrator accepts the fire only if that generation is still current,
//! so a timer cancelled after its event was already queued has no effect.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::event::{Event, EventSender};

/// Single-shot timer; at most one fire pending
#[derive(Debug, Default)]
pub struct SingleShot {
    generation: u64,
    pending: Option<JoinHandle<()>>,
    arms: u64,
}

impl SingleShot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending fire and schedule a new one after `delay`
    pub fn arm(&mut self, delay: Duration, events: &EventSender, fire: fn(u64) -> Event) {
        self.cancel();
        self.generation += 1;
        self.arms += 1;

        let generation = self.generation;
        let events = events.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.send(fire(generation));
        }));
    }

    /// Cancel the pending fire, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Accept a fire; true only for the currently armed generation
    pub fn fire(&mut self, generation: u64) -> bool {
        if self.pending.is_some() && generation == self.generation {
            self.pending = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of times this timer has been armed
    #[must_use]
    pub const fn arms(&self) -> u64 {
        self.arms
    }
}

impl Drop for SingleShot {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

/// Repeating timer; first tick one period after start
#[derive(Debug, Default)]
pub struct Ticker {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Ticker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `period`, replacing any running ticker
    pub fn start(&mut self, period: Duration, events: &EventSender, tick: fn(u64) -> Event) {
        self.stop();
        self.generation += 1;

        let generation = self.generation;
        let events = events.clone();
        self.task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if !events.send(tick(generation)) {
                    break;
                }
            }
        }));
    }

    /// Stop ticking
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }

    /// Whether a tick belongs to the running ticker
    #[must_use]
    pub const fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::event::event_channel;

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_fires_once() {
        let (events, mut rx) = event_channel();
        let mut timer = SingleShot::new();
        timer.arm(Duration::from_millis(1500), &events, Event::SilenceElapsed);

        tokio::time::sleep(Duration::from_millis(1499)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let Ok(Event::SilenceElapsed(generation)) = rx.try_recv() else {
            panic!("expected silence event");
        };
        assert!(timer.fire(generation));
        assert!(!timer.fire(generation));
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_clock() {
        let (events, mut rx) = event_channel();
        let mut timer = SingleShot::new();
        timer.arm(Duration::from_millis(1500), &events, Event::SilenceElapsed);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        timer.arm(Duration::from_millis(1500), &events, Event::SilenceElapsed);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(rx.try_recv(), Ok(Event::SilenceElapsed(_))));
        assert_eq!(timer.arms(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fire_is_rejected() {
        let (events, mut rx) = event_channel();
        let mut timer = SingleShot::new();
        timer.arm(Duration::from_millis(10), &events, Event::FadeElapsed);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Event already queued when the cancel lands
        timer.cancel();
        let Ok(Event::FadeElapsed(generation)) = rx.try_recv() else {
            panic!("expected fade event");
        };
        assert!(!timer.fire(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_ticks_after_period() {
        let (events, mut rx) = event_channel();
        let mut ticker = Ticker::new();
        ticker.start(Duration::from_millis(100), &events, Event::RevealTick);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(260)).await;
        let mut ticks = 0;
        while let Ok(Event::RevealTick(generation)) = rx.try_recv() {
            assert!(ticker.is_current(generation));
            ticks += 1;
        }
        assert_eq!(ticks, 3);

        ticker.stop();
        assert!(!ticker.is_current(1));
    }
}
