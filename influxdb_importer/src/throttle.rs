//! Points-per-second throttling for batch writes.
//!
//! The rate is measured as the number of points flushed per second since the last flush
//! attempt. It is not a sliding window: the window is reset after every attempt, whether the
//! write succeeded or not.

use std::{num::NonZeroU64, time::Duration};

use tokio::time::Instant;

/// The smallest wait handed out when a batch is over the limit.
pub const TICK: Duration = Duration::from_micros(1);

/// Decision made for a batch that is about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The batch can be written now.
    Proceed,
    /// Writing now would exceed the limit; check again after this long.
    Wait(Duration),
}

/// Tracks the points written since the last flush attempt.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    limit: Option<NonZeroU64>,
    points_since_last_write: u64,
    last_write: Instant,
}

impl RateWindow {
    /// Create a window starting at `now`; a `points_per_second` of `0` disables throttling.
    pub fn new(points_per_second: u64, now: Instant) -> Self {
        Self {
            limit: NonZeroU64::new(points_per_second),
            points_since_last_write: 0,
            last_write: now,
        }
    }

    pub fn limit(&self) -> Option<NonZeroU64> {
        self.limit
    }

    pub fn points_since_last_write(&self) -> u64 {
        self.points_since_last_write
    }

    pub fn last_write(&self) -> Instant {
        self.last_write
    }

    /// Decide whether a batch of `batch_len` points may be written at `now`.
    ///
    /// The batch is counted into the window only when the answer is [`Admission::Proceed`];
    /// a [`Admission::Wait`] leaves the window untouched so the retry re-evaluates the same
    /// numerator against a later clock.
    pub fn admit(&mut self, batch_len: usize, now: Instant) -> Admission {
        let pending = self.points_since_last_write + batch_len as u64;
        let Some(limit) = self.limit else {
            self.points_since_last_write = pending;
            return Admission::Proceed;
        };

        let elapsed = now.saturating_duration_since(self.last_write);
        let current_rate = if elapsed.is_zero() {
            pending as f64
        } else {
            pending as f64 / elapsed.as_secs_f64()
        };

        if current_rate > limit.get() as f64 {
            let required = Duration::from_secs_f64(pending as f64 / limit.get() as f64);
            return Admission::Wait(required.saturating_sub(elapsed).max(TICK));
        }

        self.points_since_last_write = pending;
        Admission::Proceed
    }

    /// Reset the window after a flush attempt, regardless of its outcome.
    pub fn reset(&mut self, now: Instant) {
        self.points_since_last_write = 0;
        self.last_write = now;
    }
}
