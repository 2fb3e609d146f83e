//! Session/auth context attached to every probe.
//!
//! The service expects a pair of rotating header values. They are fetched
//! once at startup (a failure there aborts the run), refreshed on a fixed
//! timer, and refreshed on demand when a probe reports the session as
//! rejected. A failed refresh keeps the previous session.

use crate::config::parse_duration_string;
use crate::error::SweepError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(600);

/// Header values to send with each probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub headers: Vec<(String, String)>,
    pub fetched_at: DateTime<Utc>,
}

impl Session {
    pub fn new(headers: Vec<(String, String)>) -> Self {
        Self {
            headers,
            fetched_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Source of fresh sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn fetch(&self) -> Result<Session, SweepError>;
}

/// Fixed headers (or none) for services that need no rotation.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionProvider {
    headers: Vec<(String, String)>,
}

impl StaticSessionProvider {
    pub fn new(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn fetch(&self) -> Result<Session, SweepError> {
        Ok(Session::new(self.headers.clone()))
    }
}

/// `[session]` table of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Endpoint returning a JSON document with the header values
    pub url: Option<String>,
    /// Header name → JSON pointer into the endpoint's response
    pub headers: BTreeMap<String, String>,
    /// Headers sent unchanged with every probe
    pub static_headers: BTreeMap<String, String>,
    /// Proactive refresh period, e.g. "10m"
    pub refresh_interval: Option<String>,
}

impl SessionConfig {
    /// HTTP provider when `url` is set, static headers otherwise.
    pub fn provider(&self, timeout: Duration) -> Result<Arc<dyn SessionProvider>, SweepError> {
        let static_headers: Vec<(String, String)> = self
            .static_headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        match &self.url {
            Some(url) if !url.trim().is_empty() => {
                let pointers = self
                    .headers
                    .iter()
                    .map(|(name, pointer)| (name.clone(), pointer.clone()))
                    .collect();
                let provider = HttpSessionProvider::new(url.clone(), pointers, timeout)?
                    .with_static_headers(static_headers);
                Ok(Arc::new(provider))
            }
            _ => Ok(Arc::new(StaticSessionProvider::new(static_headers))),
        }
    }

    /// Proactive refresh period. HTTP sessions refresh every ten minutes
    /// unless configured otherwise; `"0s"` disables refreshing.
    pub fn refresh_period(&self) -> Result<Option<Duration>, SweepError> {
        let period = match &self.refresh_interval {
            Some(interval) => parse_duration_string(interval).ok_or_else(|| {
                SweepError::config(format!("Invalid session refresh_interval '{}'", interval))
            })?,
            None if self.url.is_some() => DEFAULT_REFRESH_PERIOD,
            None => return Ok(None),
        };
        Ok(Some(period).filter(|p| !p.is_zero()))
    }
}

/// Fetches header values from a JSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    client: reqwest::Client,
    url: String,
    pointers: Vec<(String, String)>,
    static_headers: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpSessionProvider {
    pub fn new(
        url: impl Into<String>,
        pointers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, SweepError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                SweepError::network_with_detail("Failed to create session HTTP client", e.to_string())
            })?;
        Ok(Self {
            client,
            url: url.into(),
            pointers,
            static_headers: Vec::new(),
            timeout,
        })
    }

    pub fn with_static_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.static_headers = headers;
        self
    }
}

/// Render a JSON leaf as a header value.
fn json_leaf_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn fetch(&self) -> Result<Session, SweepError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SweepError::from_http(e, "session fetch", self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SweepError::session(format!(
                "session endpoint returned {}",
                status
            )));
        }
        let json: serde_json::Value = response.json().await.map_err(|e| {
            SweepError::session(format!("session endpoint returned invalid JSON: {}", e))
        })?;

        let mut headers = self.static_headers.clone();
        for (name, pointer) in &self.pointers {
            let value = json
                .pointer(pointer)
                .and_then(json_leaf_to_string)
                .ok_or_else(|| {
                    SweepError::session(format!(
                        "session response has no value at '{}' for header '{}'",
                        pointer, name
                    ))
                })?;
            headers.push((name.clone(), value));
        }
        Ok(Session::new(headers))
    }
}

/// Cached session with proactive and reactive refresh.
pub struct SessionManager {
    provider: Arc<dyn SessionProvider>,
    current: RwLock<Option<Arc<Session>>>,
    refreshing: tokio::sync::Mutex<()>,
    last_refresh: Mutex<Option<Instant>>,
    min_refresh_gap: Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("has_session", &self.current().is_some())
            .field("min_refresh_gap", &self.min_refresh_gap)
            .finish()
    }
}

impl SessionManager {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
            refreshing: tokio::sync::Mutex::new(()),
            last_refresh: Mutex::new(None),
            min_refresh_gap: Duration::from_secs(5),
        }
    }

    /// Session manager that always hands out the same fixed headers.
    pub fn fixed(headers: Vec<(String, String)>) -> Self {
        let manager = Self::new(Arc::new(StaticSessionProvider::new(headers.clone())));
        manager.store(Arc::new(Session::new(headers)));
        manager
    }

    /// Reactive refreshes closer together than `gap` are skipped.
    pub fn with_min_refresh_gap(mut self, gap: Duration) -> Self {
        self.min_refresh_gap = gap;
        self
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, session: Arc<Session>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        *self.last_refresh.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Fetch the first session. There is no fallback yet, so failure is fatal.
    pub async fn initialize(&self) -> Result<Arc<Session>, SweepError> {
        let session = self.provider.fetch().await.map_err(|e| match e {
            SweepError::SessionError { .. } => e,
            other => SweepError::session(format!("initial session fetch failed: {}", other)),
        })?;
        let session = Arc::new(session);
        self.store(session.clone());
        tracing::info!(headers = session.headers.len(), "session initialized");
        Ok(session)
    }

    /// Fetch a new session now. On failure the cached one stays in place.
    pub async fn refresh(&self) -> Result<Arc<Session>, SweepError> {
        let _guard = self.refreshing.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<Session>, SweepError> {
        match self.provider.fetch().await {
            Ok(session) => {
                let session = Arc::new(session);
                self.store(session.clone());
                tracing::debug!("session refreshed");
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(error = %e, "session refresh failed, keeping previous session");
                Err(e)
            }
        }
    }

    /// A probe saw `observed` rejected; refresh unless someone already did.
    ///
    /// Returns `true` if this call performed a refresh.
    pub async fn invalidate(&self, observed: &Arc<Session>) -> bool {
        let Ok(_guard) = self.refreshing.try_lock() else {
            return false;
        };
        if let Some(current) = self.current() {
            if !Arc::ptr_eq(&current, observed) {
                return false;
            }
        }
        let recent = self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|at| at.elapsed() < self.min_refresh_gap);
        if recent {
            return false;
        }
        self.refresh_locked().await.is_ok()
    }

    /// Refresh every `period` until `cancel` fires.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = manager.refresh().await;
                    }
                }
            }
        })
    }
}
