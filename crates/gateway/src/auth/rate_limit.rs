//! Sliding-window limiter for key-set refreshes.
//!
//! Counts refresh *attempts*, successful or not, so a flapping key-set endpoint
//! cannot be hammered by a burst of tokens carrying an unknown `kid`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window over which refresh attempts are counted.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window attempt counter.
///
/// Not synchronized; the key-set cache wraps it in a mutex.
#[derive(Debug)]
pub struct RefreshLimiter {
    max_per_window: u32,
    window: Duration,
    attempts: VecDeque<Instant>,
}

impl RefreshLimiter {
    /// Allow `max_per_minute` attempts in any 60-second window.
    pub fn per_minute(max_per_minute: u32) -> Self {
        Self::new(max_per_minute, REFRESH_WINDOW)
    }

    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            attempts: VecDeque::with_capacity(max_per_window as usize),
        }
    }

    /// Record an attempt at `now` if the budget allows it.
    ///
    /// On refusal, returns how long until the oldest attempt leaves the window.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.evict_expired(now);

        if self.attempts.len() >= self.max_per_window as usize {
            let retry_after = self
                .attempts
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default();
            return Err(retry_after);
        }

        self.attempts.push_back(now);
        Ok(())
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(oldest) = self.attempts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }
}
