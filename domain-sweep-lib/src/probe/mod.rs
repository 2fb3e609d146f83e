//! Probe execution for a single identifier.
//!
//! A [`Probe`] performs the actual call; the [`ProbeExecutor`] wraps it with
//! the current session, a fixed deadline and the classification policy, and
//! always produces a [`Verdict`]. Nothing past this boundary sees an error.

/// HTTP POST probe
pub mod http;

pub use http::{HttpProbe, HttpProbeConfig};

use crate::error::ProbeError;
use crate::policy::{ClassificationPolicy, RawResponse};
use crate::session::{Session, SessionManager};
use crate::types::Verdict;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// One external call for one identifier.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, identifier: &str, session: &Session) -> Result<RawResponse, ProbeError>;
}

/// Probe + session + deadline + policy.
#[derive(Clone)]
pub struct ProbeExecutor {
    probe: Arc<dyn Probe>,
    policy: Arc<dyn ClassificationPolicy>,
    sessions: Arc<SessionManager>,
    timeout: Duration,
}

impl std::fmt::Debug for ProbeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeExecutor")
            .field("timeout", &self.timeout)
            .field("sessions", &self.sessions)
            .finish()
    }
}

impl ProbeExecutor {
    pub fn new(
        probe: Arc<dyn Probe>,
        policy: Arc<dyn ClassificationPolicy>,
        sessions: Arc<SessionManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            probe,
            policy,
            sessions,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `identifier` and classify the outcome.
    pub async fn execute(&self, identifier: &str) -> Verdict {
        let session = self
            .sessions
            .current()
            .unwrap_or_else(|| Arc::new(Session::empty()));

        let outcome = match tokio::time::timeout(
            self.timeout,
            self.probe.probe(identifier, &session),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout),
        };

        match outcome {
            Ok(response) => self.policy.classify(&response),
            Err(ProbeError::Timeout) => {
                tracing::debug!(identifier, timeout = ?self.timeout, "probe timed out");
                Verdict::TransientError
            }
            Err(ProbeError::Network(message)) => {
                tracing::debug!(identifier, error = %message, "probe network failure");
                Verdict::TransientError
            }
            Err(ProbeError::SessionRejected) => {
                tracing::warn!(identifier, "session rejected, refreshing");
                self.sessions.invalidate(&session).await;
                Verdict::TransientError
            }
            Err(ProbeError::Rejected(reason)) => {
                tracing::debug!(identifier, reason = %reason, "probe rejected identifier");
                Verdict::PermanentError
            }
        }
    }
}
