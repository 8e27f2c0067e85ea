//! Reconnect backoff policy

use crate::timing;
use std::time::Duration;

/// Multiplicative backoff with an upper bound
///
/// `initial <= current <= max` holds after every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(timing::RECONNECT_INITIAL_MS),
            Duration::from_millis(timing::RECONNECT_MAX_MS),
            timing::RECONNECT_MULTIPLIER,
        )
    }
}

impl Backoff {
    /// Create a new policy; `max` is raised to `initial` and the multiplier to 1.0 if lower
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            current: initial,
            initial,
            max,
            multiplier,
        }
    }

    /// Delay that the next scheduled reconnect will use
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Take the current delay and grow it for the following failure
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        // An overflowing product saturates at the cap
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    /// Back to the initial delay (called once a connection is open)
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
