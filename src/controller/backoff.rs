//! Exponential retry delays.

use std::time::Duration;

use crate::config::BackoffSettings;
use crate::error::Result;

/// Exponential backoff, doubling from `initial` up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5 * 60))
    }
}

impl Backoff {
    /// Creates a backoff. A `max` below `initial` is raised to `initial`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Builds a backoff from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if a duration is malformed.
    pub fn from_settings(settings: &BackoffSettings) -> Result<Self> {
        Ok(Self::new(settings.initial()?, settings.max()?))
    }

    /// Returns the delay before retry number `failures` (starting at 1).
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}
