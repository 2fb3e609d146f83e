//! Local backoff after rate-limited verdicts.
//!
//! Each consecutive `RateLimited` completion doubles the pause before the
//! next admission, up to a cap. Any other verdict resets the streak.
//!
//! Delay: base, 2×base, 4×base, ... → cap.

use crate::types::SweepConfig;
use std::time::Duration;

/// Consecutive-rate-limit counter and its delay curve.
#[derive(Debug, Clone)]
pub struct LocalBackoff {
    base: Duration,
    cap: Duration,
    consecutive: u32,
}

impl LocalBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            consecutive: 0,
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_cap)
    }

    /// Delay for a streak of `consecutive` rate-limited verdicts.
    pub fn delay_for(&self, consecutive: u32) -> Duration {
        if consecutive == 0 {
            return Duration::ZERO;
        }
        let shift = (consecutive - 1).min(20);
        self.base.saturating_mul(1u32 << shift).min(self.cap)
    }

    /// Register a rate-limited verdict and return how long to pause.
    pub fn on_rate_limited(&mut self) -> Duration {
        self.consecutive = self.consecutive.saturating_add(1);
        self.delay_for(self.consecutive)
    }

    /// Any non-rate-limited verdict ends the streak.
    pub fn on_other(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
