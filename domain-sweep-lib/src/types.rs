//! Core data types for sweep runs.
//!
//! This module defines the verdict taxonomy, the per-run statistics and
//! report, and the `SweepConfig` that every engine component is built from.

use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Classification result of one probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The service cleared the identifier
    Success,
    /// The service flagged the identifier; a legitimate terminal outcome
    Blocked,
    /// The service asked us to slow down
    RateLimited,
    /// Network failure, timeout or server error
    TransientError,
    /// The service will never accept this identifier
    PermanentError,
    /// The response matched nothing actionable
    Unknown,
}

impl Verdict {
    /// Whether this verdict sends the identifier to the next pass.
    pub fn is_transient(self) -> bool {
        matches!(self, Verdict::RateLimited | Verdict::TransientError)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Success => write!(f, "success"),
            Verdict::Blocked => write!(f, "blocked"),
            Verdict::RateLimited => write!(f, "rate_limited"),
            Verdict::TransientError => write!(f, "transient_error"),
            Verdict::PermanentError => write!(f, "permanent_error"),
            Verdict::Unknown => write!(f, "unknown"),
        }
    }
}

/// Terminal output bucket an identifier is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkCategory {
    Success,
    Blocked,
    Failed,
    Unknown,
}

impl SinkCategory {
    pub const ALL: [SinkCategory; 4] = [
        SinkCategory::Success,
        SinkCategory::Blocked,
        SinkCategory::Failed,
        SinkCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SinkCategory::Success => "success",
            SinkCategory::Blocked => "blocked",
            SinkCategory::Failed => "failed",
            SinkCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SinkCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where `Verdict::Unknown` identifiers end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownDisposition {
    /// Dedicated unknown sink
    #[default]
    Sink,
    /// Success sink, without firing an alert
    Success,
    /// Permanent-failure sink
    Failed,
    /// Counted, then discarded
    Drop,
}

impl UnknownDisposition {
    /// Sink the identifier goes to, if any.
    pub fn category(self) -> Option<SinkCategory> {
        match self {
            UnknownDisposition::Sink => Some(SinkCategory::Unknown),
            UnknownDisposition::Success => Some(SinkCategory::Success),
            UnknownDisposition::Failed => Some(SinkCategory::Failed),
            UnknownDisposition::Drop => None,
        }
    }
}

/// One probe attempt, as logged.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub identifier: String,
    pub pass: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub verdict: Verdict,
}

/// Counters for one run, owned by the orchestrator's aggregating task.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub total: usize,
    /// Identifiers that reached a terminal outcome
    pub processed: usize,
    /// Probe attempts completed, across all passes
    pub attempts: usize,
    pub succeeded: usize,
    pub blocked: usize,
    pub failed: usize,
    pub unknown: usize,
    pub dropped: usize,
    pub rate_limited: usize,
    pub retried: usize,
    pub ceiling: usize,
    #[serde(skip)]
    pub started: Instant,
}

impl RunStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            attempts: 0,
            succeeded: 0,
            blocked: 0,
            failed: 0,
            unknown: 0,
            dropped: 0,
            rate_limited: 0,
            retried: 0,
            ceiling: 0,
            started: Instant::now(),
        }
    }

    /// Probe attempts completed per second since the run started.
    pub fn attempts_per_second(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.attempts as f64 / secs
        } else {
            0.0
        }
    }
}

/// Final outcome of `RetryOrchestrator::execute`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub succeeded: Vec<String>,
    pub blocked: Vec<String>,
    pub permanently_failed: Vec<String>,
    pub unknown: Vec<String>,
    /// Identifiers never classified because the run was cancelled
    pub unprocessed: Vec<String>,
    pub passes: u32,
    pub cancelled: bool,
    pub stats: RunStats,
}

impl RunReport {
    /// Number of identifiers that reached a terminal bucket (dropped unknowns included).
    pub fn classified(&self) -> usize {
        self.succeeded.len()
            + self.blocked.len()
            + self.permanently_failed.len()
            + self.unknown.len()
            + self.stats.dropped
    }
}

/// Configuration for the whole engine.
///
/// Every component takes its settings from here; there is no global state.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Admission rate, tokens per second (also the bucket capacity)
    pub requests_per_second: f64,
    /// Sleep between token polls while waiting
    pub limiter_tick: Duration,

    /// Ceiling at run start
    pub initial_concurrency: usize,
    /// Lower bound of the ceiling
    pub min_concurrency: usize,
    /// Upper bound of the ceiling
    pub max_concurrency: usize,
    /// Ceiling at the start of each retry pass; `None` means `min_concurrency`
    pub retry_concurrency: Option<usize>,

    /// Capacity of each outcome window
    pub window_size: usize,
    /// Minimum time between ceiling changes
    pub adjust_interval: Duration,
    /// Success rate above which the ceiling grows
    pub high_threshold: f64,
    /// Success rate below which the ceiling shrinks
    pub low_threshold: f64,
    /// Additive growth step
    pub increase_step: usize,
    /// Multiplicative shrink factor, in (0, 1)
    pub decrease_factor: f64,

    /// Per-probe deadline
    pub probe_timeout: Duration,

    /// Number of retry passes after the first pass
    pub max_retries: u32,
    /// Cool-down before each retry pass
    pub inter_pass_delay: Duration,
    /// Whether retry passes restart from `retry_concurrency`
    pub reset_ceiling_on_retry: bool,

    /// First local backoff after a rate-limited verdict
    pub backoff_base: Duration,
    /// Upper bound of the local backoff
    pub backoff_cap: Duration,

    /// Whether `PermanentError` is terminal or retried like a transient failure
    pub permanent_errors_terminal: bool,
    /// Where `Unknown` verdicts go
    pub unknown_disposition: UnknownDisposition,

    /// How often progress is logged
    pub progress_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 20.0,
            limiter_tick: Duration::from_millis(5),
            initial_concurrency: 10,
            min_concurrency: 2,
            max_concurrency: 50,
            retry_concurrency: None,
            window_size: 100,
            adjust_interval: Duration::from_secs(4),
            high_threshold: 0.92,
            low_threshold: 0.75,
            increase_step: 5,
            decrease_factor: 0.7,
            probe_timeout: Duration::from_secs(15),
            max_retries: 3,
            inter_pass_delay: Duration::from_secs(5),
            reset_ceiling_on_retry: true,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            permanent_errors_terminal: true,
            unknown_disposition: UnknownDisposition::Sink,
            progress_interval: Duration::from_secs(10),
        }
    }
}

impl SweepConfig {
    /// Set the admission rate.
    pub fn with_rate(mut self, requests_per_second: f64) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    /// Set the concurrency bounds and starting ceiling.
    pub fn with_concurrency(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.initial_concurrency = initial;
        self.min_concurrency = min;
        self.max_concurrency = max;
        self
    }

    /// Set the per-probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the retry ceiling and inter-pass delay.
    pub fn with_retries(mut self, max_retries: u32, inter_pass_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.inter_pass_delay = inter_pass_delay;
        self
    }

    /// Set the local backoff base and cap.
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Set where unknown verdicts go.
    pub fn with_unknown_disposition(mut self, disposition: UnknownDisposition) -> Self {
        self.unknown_disposition = disposition;
        self
    }

    /// Ceiling a retry pass starts from.
    pub fn retry_ceiling(&self) -> usize {
        self.retry_concurrency
            .unwrap_or(self.min_concurrency)
            .clamp(self.min_concurrency, self.max_concurrency)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), SweepError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(SweepError::config(
                "requests_per_second must be a positive number",
            ));
        }
        if self.limiter_tick.is_zero() || self.limiter_tick > Duration::from_millis(10) {
            return Err(SweepError::config("limiter_tick must be between 1ms and 10ms"));
        }
        if self.min_concurrency == 0 {
            return Err(SweepError::config("min_concurrency must be at least 1"));
        }
        if self.min_concurrency > self.max_concurrency {
            return Err(SweepError::config(format!(
                "min_concurrency ({}) exceeds max_concurrency ({})",
                self.min_concurrency, self.max_concurrency
            )));
        }
        if self.initial_concurrency < self.min_concurrency
            || self.initial_concurrency > self.max_concurrency
        {
            return Err(SweepError::config(format!(
                "initial_concurrency must be within {}..={}",
                self.min_concurrency, self.max_concurrency
            )));
        }
        if self.window_size == 0 {
            return Err(SweepError::config("window_size must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.low_threshold)
            || !(0.0..=1.0).contains(&self.high_threshold)
            || self.low_threshold >= self.high_threshold
        {
            return Err(SweepError::config(
                "thresholds must satisfy 0 <= low_threshold < high_threshold <= 1",
            ));
        }
        if self.increase_step == 0 {
            return Err(SweepError::config("increase_step must be at least 1"));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return Err(SweepError::config("decrease_factor must be in (0, 1)"));
        }
        if self.probe_timeout.is_zero() {
            return Err(SweepError::config("probe_timeout must be non-zero"));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(SweepError::config("backoff_base exceeds backoff_cap"));
        }
        Ok(())
    }
}
