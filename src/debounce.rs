//! Debounce scheduling for recomputes.
//!
//! Change signals are coalesced in two ways:
//! - a count threshold: once more than `count` signals accumulate, a
//!   recompute is due immediately
//! - a timer: when `count > 0`, the first signal of a burst arms a deadline
//!   `delay` ahead, and reaching it makes a recompute due
//!
//! This type only tracks state. The subscription worker owns it, waits for
//! [`DebounceState::deadline`], and runs the recompute.

use crate::config::DebounceConfig;
use std::time::{Duration, Instant};

/// What a signal did to the debounce state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The count threshold was exceeded: recompute now.
    RecomputeNow,
    /// The signal armed a new timer.
    TimerArmed(Instant),
    /// The signal was absorbed into the pending batch.
    Coalesced,
}

/// Per-subscription debounce state.
#[derive(Clone, Debug)]
pub struct DebounceState {
    threshold: u64,
    delay: Duration,
    accumulated: u64,
    deadline: Option<Instant>,
}

impl DebounceState {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            threshold: config.count,
            delay: config.delay,
            accumulated: 0,
            deadline: None,
        }
    }

    /// Register one change signal received at `now`.
    pub fn on_signal(&mut self, now: Instant) -> SignalOutcome {
        let mut armed = None;
        if self.deadline.is_none() && self.threshold > 0 {
            let deadline = now + self.delay;
            self.deadline = Some(deadline);
            armed = Some(deadline);
        }

        self.accumulated += 1;
        if self.accumulated > self.threshold {
            self.reset();
            return SignalOutcome::RecomputeNow;
        }

        match armed {
            Some(deadline) => SignalOutcome::TimerArmed(deadline),
            None => SignalOutcome::Coalesced,
        }
    }

    /// Fire the timer if its deadline has passed. Returns true if a
    /// recompute is due.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Pending timer deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Signals accumulated since the last recompute.
    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    /// Cancel the timer and clear the counter.
    pub fn reset(&mut self) {
        self.accumulated = 0;
        self.deadline = None;
    }
}
