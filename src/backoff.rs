//! Exponential delay sequence for polling a server until it comes up.
//!
//! Each delay is the previous one times `multiplier`, capped at
//! `max_delay`. The sequence is endless unless bounded with
//! [`Backoff::with_max_attempts`].
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max_delay: Duration,
    multiplier: u32,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            current: initial_delay.min(max_delay),
            max_delay,
            multiplier,
            attempts: 0,
            max_attempts: None,
        }
    }

    /// Delays used while waiting for a freshly started kernel:
    /// 100 ms doubling up to 2 s.
    pub fn readiness() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(2), 2)
    }

    /// Ends the sequence after `max` delays.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        let delay = self.current;
        self.attempts += 1;
        self.current = self
            .current
            .saturating_mul(self.multiplier)
            .min(self.max_delay);
        Some(delay)
    }
}
