//! Feedback-driven concurrency ceiling.
//!
//! Two bounded windows hold the timestamps of recent successes and failures.
//! Their ratio drives a discrete control loop: grow the ceiling additively
//! while the service keeps answering, shrink it multiplicatively as soon as
//! it starts throttling. The ceiling is always clamped to the configured
//! bounds and changes at most once per adjustment interval.

use crate::types::{SweepConfig, Verdict};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// What a call to [`ThroughputAdjuster::maybe_adjust`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// Still inside the adjustment interval
    Skipped,
    /// Interval elapsed, rate between thresholds or ceiling already at a bound
    Held,
    Raised { from: usize, to: usize },
    Lowered { from: usize, to: usize },
}

#[derive(Debug)]
struct AdjusterState {
    ceiling: usize,
    successes: VecDeque<Instant>,
    failures: VecDeque<Instant>,
    last_adjust: Instant,
}

/// Owner of the concurrency ceiling.
#[derive(Debug)]
pub struct ThroughputAdjuster {
    min: usize,
    max: usize,
    window_size: usize,
    interval: Duration,
    high_threshold: f64,
    low_threshold: f64,
    increase_step: usize,
    decrease_factor: f64,
    state: Mutex<AdjusterState>,
}

impl ThroughputAdjuster {
    pub fn from_config(config: &SweepConfig) -> Self {
        let min = config.min_concurrency.max(1);
        let max = config.max_concurrency.max(min);
        Self {
            min,
            max,
            window_size: config.window_size.max(1),
            interval: config.adjust_interval,
            high_threshold: config.high_threshold,
            low_threshold: config.low_threshold,
            increase_step: config.increase_step.max(1),
            decrease_factor: config.decrease_factor,
            state: Mutex::new(AdjusterState {
                ceiling: config.initial_concurrency.clamp(min, max),
                successes: VecDeque::with_capacity(config.window_size),
                failures: VecDeque::with_capacity(config.window_size),
                last_adjust: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdjusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current ceiling on in-flight probes.
    pub fn ceiling(&self) -> usize {
        self.lock().ceiling
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }

    fn push(window: &mut VecDeque<Instant>, capacity: usize) {
        if window.len() == capacity {
            window.pop_front();
        }
        window.push_back(Instant::now());
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        Self::push(&mut state.successes, self.window_size);
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        Self::push(&mut state.failures, self.window_size);
    }

    /// Route a completed verdict to the matching window.
    ///
    /// Only throttling-style outcomes count against the service; a blocked or
    /// unknown answer is still an answer.
    pub fn record(&self, verdict: Verdict) {
        if verdict.is_transient() {
            self.record_failure();
        } else {
            self.record_success();
        }
    }

    fn rate_of(state: &AdjusterState) -> f64 {
        let successes = state.successes.len();
        let total = successes + state.failures.len();
        if total == 0 {
            1.0
        } else {
            successes as f64 / total as f64
        }
    }

    /// Share of recent outcomes that were successes; `1.0` with no data.
    pub fn success_rate(&self) -> f64 {
        Self::rate_of(&self.lock())
    }

    /// Move the ceiling if the adjustment interval has elapsed.
    pub fn maybe_adjust(&self) -> Adjustment {
        let mut state = self.lock();
        let now = Instant::now();
        if now.saturating_duration_since(state.last_adjust) < self.interval {
            return Adjustment::Skipped;
        }
        state.last_adjust = now;

        let rate = Self::rate_of(&state);
        let from = state.ceiling;

        let adjustment = if rate > self.high_threshold && from < self.max {
            let to = (from + self.increase_step).min(self.max);
            Adjustment::Raised { from, to }
        } else if rate < self.low_threshold && from > self.min {
            let shrunk = (from as f64 * self.decrease_factor).floor() as usize;
            let to = shrunk.min(from - 1).max(self.min);
            Adjustment::Lowered { from, to }
        } else {
            Adjustment::Held
        };

        match adjustment {
            Adjustment::Raised { to, .. } => {
                state.ceiling = to;
                tracing::info!(from, to, rate, "raising concurrency ceiling");
            }
            Adjustment::Lowered { to, .. } => {
                state.ceiling = to;
                tracing::info!(from, to, rate, "lowering concurrency ceiling");
            }
            _ => {}
        }

        adjustment
    }

    /// When the next adjustment falls due; `None` when the interval is zero.
    pub fn next_adjust_at(&self) -> Option<Instant> {
        if self.interval.is_zero() {
            return None;
        }
        Some(self.lock().last_adjust + self.interval)
    }

    /// Clear both windows, set the ceiling, and restart the interval.
    pub fn reset(&self, ceiling: usize) {
        let mut state = self.lock();
        state.successes.clear();
        state.failures.clear();
        state.ceiling = ceiling.clamp(self.min, self.max);
        state.last_adjust = Instant::now();
    }
}
