use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Think-time a virtual user waits between two actions.
///
/// The delay is drawn uniformly from `[min, max]` after every action.
/// `Pacing::between(1s, 5s)` reproduces a human pausing a few seconds between
/// clicks; `Pacing::none()` turns a user into a closed-loop hammer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn between(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn constant(delay: Duration) -> Self {
        Self::between(delay, delay)
    }

    pub fn none() -> Self {
        Self::constant(Duration::ZERO)
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// Draws the next delay. An inverted range yields `min`; the scheduler
    /// rejects such ranges before any user runs.
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::none()
    }
}
