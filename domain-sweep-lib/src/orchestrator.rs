//! Multi-pass retry orchestration.
//!
//! Pass 0 runs every identifier through the [`WorkPool`]. Identifiers with a
//! transient verdict are collected, in input order, and become the input of
//! the next pass after a cool-down and an adjuster reset. Once the retry
//! passes are used up the remaining identifiers go to the failed sink.
//!
//! Completions of a pass are consumed by one aggregating future that owns the
//! run statistics and does all sink and alert dispatch, so no counter is ever
//! shared between tasks.

use crate::adjuster::ThroughputAdjuster;
use crate::alert::AlertDispatcher;
use crate::backoff::LocalBackoff;
use crate::error::SweepError;
use crate::limiter::RateLimiter;
use crate::pool::{Completion, WorkPool};
use crate::probe::ProbeExecutor;
use crate::sink::VerdictSink;
use crate::types::{
    AttemptRecord, RunReport, RunStats, SinkCategory, SweepConfig, UnknownDisposition, Verdict,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Type-erased per-identifier work.
pub type ProbeFn = Arc<dyn Fn(String) -> BoxFuture<'static, Verdict> + Send + Sync>;

#[derive(Debug, Default)]
struct Buckets {
    succeeded: Vec<String>,
    blocked: Vec<String>,
    permanently_failed: Vec<String>,
    unknown: Vec<String>,
}

/// Drives a whole run: passes, retries, dispatch and accounting.
pub struct RetryOrchestrator {
    config: SweepConfig,
    pool: WorkPool,
    probe: ProbeFn,
    sinks: Arc<dyn VerdictSink>,
    alerts: AlertDispatcher,
    cancel: CancellationToken,
    stats: watch::Sender<RunStats>,
}

impl std::fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("alerts", &self.alerts)
            .finish()
    }
}

impl RetryOrchestrator {
    /// Build an orchestrator around an arbitrary async probe function.
    pub fn new<F, Fut>(
        config: SweepConfig,
        probe: F,
        sinks: Arc<dyn VerdictSink>,
    ) -> Result<Self, SweepError>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        let probe: ProbeFn = Arc::new(move |identifier| probe(identifier).boxed());
        Self::from_parts(config, probe, sinks)
    }

    /// Build an orchestrator that classifies through a [`ProbeExecutor`].
    pub fn with_executor(
        config: SweepConfig,
        executor: ProbeExecutor,
        sinks: Arc<dyn VerdictSink>,
    ) -> Result<Self, SweepError> {
        let executor = Arc::new(executor);
        Self::new(
            config,
            move |identifier: String| {
                let executor = executor.clone();
                async move { executor.execute(&identifier).await }
            },
            sinks,
        )
    }

    fn from_parts(
        config: SweepConfig,
        probe: ProbeFn,
        sinks: Arc<dyn VerdictSink>,
    ) -> Result<Self, SweepError> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let pool = WorkPool::new(
            Arc::new(RateLimiter::from_config(&config)),
            Arc::new(ThroughputAdjuster::from_config(&config)),
            LocalBackoff::from_config(&config),
        )
        .with_cancellation(cancel.clone());
        let (stats, _) = watch::channel(RunStats::new(0));

        Ok(Self {
            config,
            pool,
            probe,
            sinks,
            alerts: AlertDispatcher::disabled(),
            cancel,
            stats,
        })
    }

    /// Fire alerts on `Success` verdicts through `alerts`.
    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = alerts;
        self
    }

    /// Stop the run early when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.pool = self.pool.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Current concurrency ceiling.
    pub fn ceiling(&self) -> usize {
        self.pool.adjuster().ceiling()
    }

    /// Live statistics, updated after every completion.
    pub fn subscribe(&self) -> watch::Receiver<RunStats> {
        self.stats.subscribe()
    }

    /// Classify every identifier.
    pub async fn execute(&self, items: Vec<String>) -> RunReport {
        let mut stats = RunStats::new(items.len());
        stats.ceiling = self.ceiling();
        self.stats.send_replace(stats.clone());

        let progress = self.spawn_progress_logger();
        let mut buckets = Buckets::default();
        let mut unprocessed = Vec::new();
        let mut cancelled = false;
        let mut passes = 0u32;

        tracing::info!(
            total = items.len(),
            rps = self.config.requests_per_second,
            ceiling = stats.ceiling,
            max_retries = self.config.max_retries,
            "starting sweep"
        );

        let mut input = items;
        let mut pass = 0u32;
        while !input.is_empty() {
            if pass > 0 {
                tracing::info!(
                    pass,
                    remaining = input.len(),
                    delay = ?self.config.inter_pass_delay,
                    "scheduling retry pass"
                );
                let interrupted = tokio::select! {
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(self.config.inter_pass_delay) => false,
                };
                if interrupted {
                    cancelled = true;
                    unprocessed = input;
                    break;
                }
                let ceiling = if self.config.reset_ceiling_on_retry {
                    self.config.retry_ceiling()
                } else {
                    self.ceiling()
                };
                self.pool.adjuster().reset(ceiling);
                stats.retried += input.len();
            }

            let batch = input.len();
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = |identifier: String| (self.probe)(identifier);
            let (summary, failures) = tokio::join!(
                self.pool.run_streaming(input, worker, tx),
                self.aggregate(pass, rx, &mut stats, &mut buckets),
            );
            passes = pass + 1;

            tracing::info!(
                pass,
                batch,
                completed = summary.completed,
                transient = failures.len(),
                rate_limited = summary.rate_limited,
                backoff = ?summary.backoff,
                ceiling = self.ceiling(),
                "pass complete"
            );

            if summary.cancelled {
                cancelled = true;
                unprocessed = failures;
                unprocessed.extend(summary.not_admitted);
                break;
            }
            if failures.is_empty() {
                break;
            }
            if pass >= self.config.max_retries {
                tracing::warn!(
                    count = failures.len(),
                    passes,
                    "retries exhausted, marking remaining identifiers failed"
                );
                for identifier in failures {
                    self.write(SinkCategory::Failed, &identifier).await;
                    stats.failed += 1;
                    stats.processed += 1;
                    buckets.permanently_failed.push(identifier);
                }
                self.stats.send_replace(stats.clone());
                break;
            }
            if self.cancel.is_cancelled() {
                cancelled = true;
                unprocessed = failures;
                break;
            }
            input = failures;
            pass += 1;
        }

        if let Err(e) = self.sinks.flush().await {
            tracing::warn!(error = %e, "failed to flush sinks");
        }
        progress.abort();

        stats.ceiling = self.ceiling();
        self.stats.send_replace(stats.clone());
        tracing::info!(
            succeeded = stats.succeeded,
            blocked = stats.blocked,
            failed = stats.failed,
            unknown = stats.unknown,
            unprocessed = unprocessed.len(),
            passes,
            cancelled,
            "sweep finished"
        );

        RunReport {
            succeeded: buckets.succeeded,
            blocked: buckets.blocked,
            permanently_failed: buckets.permanently_failed,
            unknown: buckets.unknown,
            unprocessed,
            passes,
            cancelled,
            stats,
        }
    }

    /// Close the alert queue, waiting up to `grace` for pending deliveries.
    pub async fn shutdown(self, grace: Duration) -> usize {
        self.alerts.shutdown(grace).await
    }

    /// Consume one pass worth of completions; returns that pass's failure queue.
    async fn aggregate(
        &self,
        pass: u32,
        mut rx: mpsc::UnboundedReceiver<Completion>,
        stats: &mut RunStats,
        buckets: &mut Buckets,
    ) -> Vec<String> {
        let mut failures: Vec<(usize, String)> = Vec::new();

        while let Some(Completion {
            index,
            identifier,
            verdict,
        }) = rx.recv().await
        {
            let record = AttemptRecord {
                identifier,
                pass,
                timestamp: chrono::Utc::now(),
                verdict,
            };
            tracing::debug!(
                identifier = %record.identifier,
                pass = record.pass,
                verdict = %record.verdict,
                at = %record.timestamp.to_rfc3339(),
                "attempt"
            );
            let identifier = record.identifier;
            stats.attempts += 1;

            match verdict {
                Verdict::Success => {
                    self.write(SinkCategory::Success, &identifier).await;
                    self.alerts.notify(&identifier);
                    stats.succeeded += 1;
                    stats.processed += 1;
                    buckets.succeeded.push(identifier);
                }
                Verdict::Blocked => {
                    self.write(SinkCategory::Blocked, &identifier).await;
                    stats.blocked += 1;
                    stats.processed += 1;
                    buckets.blocked.push(identifier);
                }
                Verdict::Unknown => {
                    stats.unknown += 1;
                    stats.processed += 1;
                    let disposition = self.config.unknown_disposition;
                    if let Some(category) = disposition.category() {
                        self.write(category, &identifier).await;
                    }
                    match disposition {
                        UnknownDisposition::Sink => buckets.unknown.push(identifier),
                        UnknownDisposition::Success => buckets.succeeded.push(identifier),
                        UnknownDisposition::Failed => buckets.permanently_failed.push(identifier),
                        UnknownDisposition::Drop => stats.dropped += 1,
                    }
                }
                Verdict::PermanentError if self.config.permanent_errors_terminal => {
                    self.write(SinkCategory::Failed, &identifier).await;
                    stats.failed += 1;
                    stats.processed += 1;
                    buckets.permanently_failed.push(identifier);
                }
                Verdict::RateLimited | Verdict::TransientError | Verdict::PermanentError => {
                    if verdict == Verdict::RateLimited {
                        stats.rate_limited += 1;
                    }
                    failures.push((index, identifier));
                }
            }

            stats.ceiling = self.pool.adjuster().ceiling();
            self.stats.send_replace(stats.clone());
        }

        failures.sort_by_key(|(index, _)| *index);
        failures.into_iter().map(|(_, identifier)| identifier).collect()
    }

    async fn write(&self, category: SinkCategory, identifier: &str) {
        if let Err(e) = self.sinks.write(category, identifier).await {
            tracing::warn!(identifier, category = %category, error = %e, "sink write failed");
        }
    }

    fn spawn_progress_logger(&self) -> tokio::task::JoinHandle<()> {
        let rx = self.stats.subscribe();
        let period = self.config.progress_interval;
        tokio::spawn(async move {
            if period.is_zero() {
                return;
            }
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = rx.borrow().clone();
                tracing::info!(
                    processed = stats.processed,
                    total = stats.total,
                    attempts = stats.attempts,
                    ceiling = stats.ceiling,
                    rate = format!("{:.1}/s", stats.attempts_per_second()),
                    "progress"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySinks;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fast_config() -> SweepConfig {
        SweepConfig::default()
            .with_rate(1000.0)
            .with_retries(3, Duration::from_secs(5))
    }

    /// Verdicts keyed by (identifier, pass), defaulting to `Success`.
    fn scripted(
        script: HashMap<(String, u32), Verdict>,
    ) -> impl Fn(String) -> BoxFuture<'static, Verdict> + Send + Sync + 'static {
        let attempts: Arc<Mutex<HashMap<String, u32>>> = Arc::default();
        move |identifier: String| {
            let n = {
                let mut attempts = attempts.lock().unwrap();
                let n = attempts.entry(identifier.clone()).or_insert(0);
                *n += 1;
                *n - 1
            };
            let verdict = script
                .get(&(identifier, n))
                .copied()
                .unwrap_or(Verdict::Success);
            async move { verdict }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_verdicts_dispatch() {
        let sinks = Arc::new(MemorySinks::new());
        let script = HashMap::from([
            (("b".to_string(), 0), Verdict::Blocked),
            (("u".to_string(), 0), Verdict::Unknown),
            (("p".to_string(), 0), Verdict::PermanentError),
            (("t".to_string(), 0), Verdict::TransientError),
        ]);
        let orchestrator =
            RetryOrchestrator::new(fast_config(), scripted(script), sinks.clone()).unwrap();
        let items = ["s", "b", "u", "p", "t"].map(String::from).to_vec();

        let report = orchestrator.execute(items).await;

        assert_eq!(report.passes, 2);
        assert_eq!(report.succeeded, vec!["s", "t"]);
        assert_eq!(report.blocked, vec!["b"]);
        assert_eq!(report.unknown, vec!["u"]);
        assert_eq!(report.permanently_failed, vec!["p"]);
        assert_eq!(report.classified(), 5);
        assert_eq!(report.stats.attempts, 6);
        assert_eq!(report.stats.retried, 1);
        assert_eq!(sinks.entries(SinkCategory::Unknown), vec!["u"]);
        assert_eq!(sinks.entries(SinkCategory::Failed), vec!["p"]);
    }

    /// Sink whose every write and flush fails.
    struct BrokenSink {
        writes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VerdictSink for BrokenSink {
        async fn write(&self, category: SinkCategory, _identifier: &str) -> Result<(), SweepError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(SweepError::sink(category.to_string(), "disk full"))
        }

        async fn flush(&self) -> Result<(), SweepError> {
            Err(SweepError::sink("all", "disk full"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_errors_do_not_stop_the_run() {
        let sink = Arc::new(BrokenSink {
            writes: AtomicUsize::new(0),
        });
        let script = HashMap::from([
            (("b".to_string(), 0), Verdict::Blocked),
            (("t".to_string(), 0), Verdict::RateLimited),
            (("x".to_string(), 0), Verdict::TransientError),
            (("x".to_string(), 1), Verdict::TransientError),
            (("x".to_string(), 2), Verdict::TransientError),
            (("x".to_string(), 3), Verdict::TransientError),
        ]);
        let orchestrator =
            RetryOrchestrator::new(fast_config(), scripted(script), sink.clone()).unwrap();
        let items = ["s", "b", "t", "x"].map(String::from).to_vec();

        let report = orchestrator.execute(items).await;

        assert!(!report.cancelled);
        assert_eq!(report.passes, 4);
        assert_eq!(report.succeeded, vec!["s", "t"]);
        assert_eq!(report.blocked, vec!["b"]);
        assert_eq!(report.permanently_failed, vec!["x"]);
        assert_eq!(report.classified(), 4);
        assert!(report.unprocessed.is_empty());
        assert_eq!(report.stats.retried, 4);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_disposition_drop_counts_only() {
        let sinks = Arc::new(MemorySinks::new());
        let config = fast_config().with_unknown_disposition(UnknownDisposition::Drop);
        let orchestrator =
            RetryOrchestrator::new(config, |_| async { Verdict::Unknown }, sinks.clone()).unwrap();

        let report = orchestrator.execute(vec!["a".into(), "b".into()]).await;
        assert_eq!(report.stats.dropped, 2);
        assert_eq!(report.classified(), 2);
        assert_eq!(sinks.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_terminal_permanent_errors_are_retried() {
        let sinks = Arc::new(MemorySinks::new());
        let mut config = fast_config().with_retries(1, Duration::from_secs(1));
        config.permanent_errors_terminal = false;
        let orchestrator =
            RetryOrchestrator::new(config, |_| async { Verdict::PermanentError }, sinks.clone())
                .unwrap();

        let report = orchestrator.execute(vec!["a".into()]).await;
        assert_eq!(report.passes, 2);
        assert_eq!(report.stats.attempts, 2);
        assert_eq!(sinks.entries(SinkCategory::Failed), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_pass_resets_ceiling() {
        let config = fast_config().with_concurrency(20, 3, 40);
        let orchestrator = RetryOrchestrator::new(
            config,
            scripted(HashMap::from([(("a".to_string(), 0), Verdict::TransientError)])),
            Arc::new(MemorySinks::new()),
        )
        .unwrap();
        assert_eq!(orchestrator.ceiling(), 20);

        let report = orchestrator.execute(vec!["a".into()]).await;
        assert_eq!(report.passes, 2);
        assert_eq!(orchestrator.ceiling(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_are_published() {
        let orchestrator =
            RetryOrchestrator::new(fast_config(), |_| async { Verdict::Blocked }, Arc::new(MemorySinks::new()))
                .unwrap();
        let rx = orchestrator.subscribe();
        orchestrator.execute(vec!["a".into(), "b".into(), "c".into()]).await;

        let stats = rx.borrow().clone();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.blocked, 3);
        assert_eq!(stats.processed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_inter_pass_delay_reports_unprocessed() {
        let sinks = Arc::new(MemorySinks::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let orchestrator = RetryOrchestrator::new(
            fast_config(),
            move |identifier: String| {
                let trigger = trigger.clone();
                async move {
                    if identifier == "t" {
                        trigger.cancel();
                        Verdict::TransientError
                    } else {
                        Verdict::Success
                    }
                }
            },
            sinks.clone(),
        )
        .unwrap()
        .with_cancellation(cancel);

        let report = orchestrator
            .execute(vec!["s".into(), "t".into()])
            .await;

        assert!(report.cancelled);
        assert_eq!(report.unprocessed, vec!["t"]);
        assert!(sinks.entries(SinkCategory::Failed).is_empty());
        assert_eq!(report.passes, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SweepConfig::default().with_rate(-1.0);
        let err = RetryOrchestrator::new(config, |_| async { Verdict::Success }, Arc::new(MemorySinks::new()))
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
