//! Classification of raw probe responses into verdicts.
//!
//! The service signals its answer through phrases in the response body and
//! through status codes. Those phrases change without notice, so they live
//! in configuration and are applied by [`MarkerPolicy`]; any other policy can
//! be injected through the [`ClassificationPolicy`] trait or a plain closure.

use crate::types::Verdict;
use serde::{Deserialize, Serialize};

/// What came back from one probe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new<B: Into<String>>(status: u16, body: B) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Total mapping from a response to a verdict.
pub trait ClassificationPolicy: Send + Sync {
    fn classify(&self, response: &RawResponse) -> Verdict;
}

impl<F> ClassificationPolicy for F
where
    F: Fn(&RawResponse) -> Verdict + Send + Sync,
{
    fn classify(&self, response: &RawResponse) -> Verdict {
        self(response)
    }
}

/// One body phrase and the verdict it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRule {
    pub marker: String,
    pub verdict: Verdict,
}

impl MarkerRule {
    pub fn new<M: Into<String>>(marker: M, verdict: Verdict) -> Self {
        Self {
            marker: marker.into(),
            verdict,
        }
    }
}

/// `[policy]` table of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Checked in order; the first marker found in the body wins
    pub rules: Vec<MarkerRule>,
    /// Match markers ignoring ASCII case
    pub case_insensitive: bool,
    /// Verdict for 4xx responses other than 429 that matched no marker
    pub client_error_verdict: Verdict,
    /// Verdict for responses that matched nothing at all
    pub default_verdict: Verdict,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            case_insensitive: false,
            client_error_verdict: Verdict::TransientError,
            default_verdict: Verdict::Unknown,
        }
    }
}

/// Substring-and-status policy.
///
/// Order of evaluation: body markers, then 429, then 5xx, then other 4xx,
/// then the default verdict.
#[derive(Debug, Clone)]
pub struct MarkerPolicy {
    config: PolicyConfig,
}

impl MarkerPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        let mut config = config;
        if config.case_insensitive {
            for rule in &mut config.rules {
                rule.marker = rule.marker.to_ascii_lowercase();
            }
        }
        config.rules.retain(|rule| !rule.marker.is_empty());
        Self { config }
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.config.rules
    }

    fn match_marker(&self, body: &str) -> Option<Verdict> {
        if self.config.case_insensitive {
            let lowered = body.to_ascii_lowercase();
            self.config
                .rules
                .iter()
                .find(|rule| lowered.contains(&rule.marker))
                .map(|rule| rule.verdict)
        } else {
            self.config
                .rules
                .iter()
                .find(|rule| body.contains(&rule.marker))
                .map(|rule| rule.verdict)
        }
    }
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl ClassificationPolicy for MarkerPolicy {
    fn classify(&self, response: &RawResponse) -> Verdict {
        if let Some(verdict) = self.match_marker(&response.body) {
            return verdict;
        }
        match response.status {
            429 => Verdict::RateLimited,
            500..=599 => Verdict::TransientError,
            400..=499 => self.config.client_error_verdict,
            _ => self.config.default_verdict,
        }
    }
}
