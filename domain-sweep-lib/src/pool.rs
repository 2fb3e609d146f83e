//! Bounded concurrent execution of probe work.
//!
//! The driver admits items strictly in input order. Before each admission it
//! sits out any local backoff, takes a rate-limiter token, gives the adjuster
//! a chance to move the ceiling, and waits until fewer than `ceiling` probes
//! are in flight. Work runs in spawned tasks; the driver alone reaps
//! completions, feeds them to the adjuster and the local backoff, and
//! forwards them on the results channel. It keeps reaping while it waits.
//! Every admitted item produces exactly one completion.

use crate::adjuster::ThroughputAdjuster;
use crate::backoff::LocalBackoff;
use crate::limiter::RateLimiter;
use crate::types::Verdict;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One finished unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Position of the identifier in the pass input
    pub index: usize,
    pub identifier: String,
    pub verdict: Verdict,
}

/// What happened during one `run_streaming` call.
#[derive(Debug, Clone, Default)]
pub struct PoolSummary {
    pub admitted: usize,
    pub completed: usize,
    pub rate_limited: usize,
    /// Items left unstarted because the pool was cancelled, in input order
    pub not_admitted: Vec<String>,
    /// Total time admissions were paused by local backoff
    pub backoff: Duration,
    pub cancelled: bool,
}

/// Concurrency-bounded, rate-limited driver.
#[derive(Debug, Clone)]
pub struct WorkPool {
    limiter: Arc<RateLimiter>,
    adjuster: Arc<ThroughputAdjuster>,
    backoff: LocalBackoff,
    cancel: CancellationToken,
}

struct PassState {
    backoff: LocalBackoff,
    resume_at: Option<Instant>,
    summary: PoolSummary,
}

impl WorkPool {
    pub fn new(
        limiter: Arc<RateLimiter>,
        adjuster: Arc<ThroughputAdjuster>,
        backoff: LocalBackoff,
    ) -> Self {
        Self {
            limiter,
            adjuster,
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop admitting new work when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn adjuster(&self) -> &Arc<ThroughputAdjuster> {
        &self.adjuster
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Process every item and return the verdicts in input order.
    ///
    /// If the pool is cancelled, items that were never admitted have no
    /// verdict and are left out.
    pub async fn run<W, Fut>(&self, items: Vec<String>, worker: W) -> Vec<Verdict>
    where
        W: Fn(String) -> Fut,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.run_streaming(items, worker, tx).await;

        let mut completions = Vec::new();
        while let Some(completion) = rx.recv().await {
            completions.push(completion);
        }
        completions.sort_by_key(|c| c.index);
        completions.into_iter().map(|c| c.verdict).collect()
    }

    /// Process every item, sending each completion on `results` as it is reaped.
    pub async fn run_streaming<W, Fut>(
        &self,
        items: Vec<String>,
        worker: W,
        results: mpsc::UnboundedSender<Completion>,
    ) -> PoolSummary
    where
        W: Fn(String) -> Fut,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        let mut in_flight = FuturesUnordered::new();
        let mut state = PassState {
            backoff: self.backoff.clone(),
            resume_at: None,
            summary: PoolSummary::default(),
        };

        let mut queue = items.into_iter().enumerate();
        while let Some((index, identifier)) = queue.next() {
            if !self.wait_for_admission(&mut in_flight, &mut state, &results).await {
                self.stop(&mut state, identifier, &mut queue);
                break;
            }

            let handle = tokio::spawn(worker(identifier.clone()));
            in_flight.push(async move {
                let verdict = match handle.await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        tracing::error!(identifier = %identifier, error = %e, "probe task failed");
                        Verdict::TransientError
                    }
                };
                Completion {
                    index,
                    identifier,
                    verdict,
                }
            });
            state.summary.admitted += 1;
        }

        while let Some(done) = in_flight.next().await {
            self.reap(done, &mut state, &results);
        }
        state.summary
    }

    /// Wait until the next item may start: no backoff pending, a token in
    /// hand, and a free slot under the current ceiling. Completions are reaped
    /// throughout, so a rate-limited verdict that lands mid-wait still pauses
    /// this admission. Returns `false` if cancelled.
    async fn wait_for_admission<F>(
        &self,
        in_flight: &mut FuturesUnordered<F>,
        state: &mut PassState,
        results: &mpsc::UnboundedSender<Completion>,
    ) -> bool
    where
        F: Future<Output = Completion>,
    {
        let mut token = false;
        loop {
            while let Some(Some(done)) = in_flight.next().now_or_never() {
                self.reap(done, state, results);
            }
            if self.cancel.is_cancelled() {
                return false;
            }
            self.adjuster.maybe_adjust();

            let now = Instant::now();
            if let Some(until) = state.resume_at.filter(|at| *at > now) {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return false,
                    Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                        self.reap(done, state, results);
                    }
                    _ = tokio::time::sleep_until(until) => {}
                }
                state.summary.backoff += Instant::now() - now;
                continue;
            }
            state.resume_at = None;

            if !token {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return false,
                    Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                        self.reap(done, state, results);
                    }
                    _ = self.limiter.acquire() => token = true,
                }
                continue;
            }

            if in_flight.len() < self.adjuster.ceiling() {
                return true;
            }
            // Wake for the next adjustment too; a raised ceiling frees slots.
            let next_adjust = self.adjuster.next_adjust_at();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                Some(done) = in_flight.next() => self.reap(done, state, results),
                _ = tokio::time::sleep_until(next_adjust.unwrap_or(now)), if next_adjust.is_some() => {}
            }
        }
    }

    fn reap(
        &self,
        done: Completion,
        state: &mut PassState,
        results: &mpsc::UnboundedSender<Completion>,
    ) {
        self.adjuster.record(done.verdict);
        state.summary.completed += 1;

        if done.verdict == Verdict::RateLimited {
            state.summary.rate_limited += 1;
            let delay = state.backoff.on_rate_limited();
            let until = Instant::now() + delay;
            state.resume_at = Some(state.resume_at.map_or(until, |at| at.max(until)));
            tracing::warn!(
                identifier = %done.identifier,
                streak = state.backoff.consecutive(),
                ?delay,
                "rate limited, pausing admissions"
            );
        } else {
            state.backoff.on_other();
        }

        let _ = results.send(done);
    }

    fn stop(
        &self,
        state: &mut PassState,
        current: String,
        rest: &mut impl Iterator<Item = (usize, String)>,
    ) {
        state.summary.cancelled = true;
        state.summary.not_admitted.push(current);
        state.summary.not_admitted.extend(rest.map(|(_, identifier)| identifier));
        tracing::info!(
            not_admitted = state.summary.not_admitted.len(),
            "pool cancelled, draining in-flight probes"
        );
    }
}
