//! Best-effort notifications on successful verdicts.
//!
//! Alerts go through a bounded queue to a single background task, so a slow
//! or failing notification endpoint never holds up verdict accounting. A
//! full queue drops the alert.

use crate::error::SweepError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Something to tell about an identifier.
#[async_trait]
pub trait Alert: Send + Sync {
    async fn send(&self, identifier: &str) -> Result<(), SweepError>;
}

/// `[alert]` table of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Webhook URL; alerts are disabled when unset
    pub url: Option<String>,
    /// JSON body template; `{identifier}` and `{timestamp}` are substituted
    pub body: serde_json::Value,
    /// Queue capacity before alerts are dropped
    pub queue_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            url: None,
            body: serde_json::json!({ "text": "SUCCESS\n{identifier}\n{timestamp}" }),
            queue_capacity: 1024,
        }
    }
}

fn render(template: &serde_json::Value, identifier: &str, timestamp: &str) -> serde_json::Value {
    match template {
        serde_json::Value::String(s) => serde_json::Value::String(
            s.replace("{identifier}", identifier)
                .replace("{timestamp}", timestamp),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| render(item, identifier, timestamp))
                .collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render(value, identifier, timestamp)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// POSTs a JSON message to a webhook (chat bot, incident hook, ...).
#[derive(Debug, Clone)]
pub struct WebhookAlert {
    client: reqwest::Client,
    url: String,
    body: serde_json::Value,
    timeout: Duration,
}

impl WebhookAlert {
    pub fn new(
        url: impl Into<String>,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<Self, SweepError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                SweepError::network_with_detail("Failed to create alert HTTP client", e.to_string())
            })?;
        Ok(Self {
            client,
            url: url.into(),
            body,
            timeout,
        })
    }

    /// Webhook from config, or `None` when no URL is configured.
    pub fn from_config(config: &AlertConfig) -> Result<Option<Self>, SweepError> {
        match &config.url {
            Some(url) if !url.trim().is_empty() => Ok(Some(Self::new(
                url.clone(),
                config.body.clone(),
                Duration::from_secs(10),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Alert for WebhookAlert {
    async fn send(&self, identifier: &str) -> Result<(), SweepError> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let body = render(&self.body, identifier, &timestamp);
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SweepError::from_http(e, "alert webhook", self.timeout))?;
        if !response.status().is_success() {
            return Err(SweepError::network(format!(
                "alert webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Bounded queue in front of an [`Alert`].
#[derive(Debug)]
pub struct AlertDispatcher {
    tx: Option<mpsc::Sender<String>>,
    worker: Option<JoinHandle<usize>>,
}

impl AlertDispatcher {
    /// Start the background delivery task.
    pub fn spawn(alert: Arc<dyn Alert>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));
        let worker = tokio::spawn(async move {
            let mut delivered = 0usize;
            while let Some(identifier) = rx.recv().await {
                match alert.send(&identifier).await {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(identifier = %identifier, error = %e, "alert delivery failed")
                    }
                }
            }
            delivered
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Dispatcher that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an alert without waiting. Returns `false` if it was dropped.
    pub fn notify(&self, identifier: &str) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(identifier.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(identifier, "alert queue full, dropping alert");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the queue and wait up to `grace` for pending deliveries.
    ///
    /// Returns the number of alerts delivered successfully.
    pub async fn shutdown(mut self, grace: Duration) -> usize {
        self.tx.take();
        let Some(mut worker) = self.worker.take() else {
            return 0;
        };
        match tokio::time::timeout(grace, &mut worker).await {
            Ok(Ok(delivered)) => delivered,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "alert worker failed");
                0
            }
            Err(_) => {
                tracing::warn!(?grace, "alert worker did not finish in time, aborting");
                worker.abort();
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingAlert {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Alert for RecordingAlert {
        async fn send(&self, identifier: &str) -> Result<(), SweepError> {
            if self.fail {
                return Err(SweepError::network("webhook down"));
            }
            self.sent.lock().unwrap().push(identifier.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_in_order() {
        let alert = Arc::new(RecordingAlert::default());
        let dispatcher = AlertDispatcher::spawn(alert.clone(), 16);
        assert!(dispatcher.notify("a"));
        assert!(dispatcher.notify("b"));
        let delivered = dispatcher.shutdown(Duration::from_secs(1)).await;
        assert_eq!(delivered, 2);
        assert_eq!(*alert.sent.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let alert = Arc::new(RecordingAlert {
            fail: true,
            ..RecordingAlert::default()
        });
        let dispatcher = AlertDispatcher::spawn(alert, 4);
        assert!(dispatcher.notify("a"));
        assert_eq!(dispatcher.shutdown(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_drops() {
        let dispatcher = AlertDispatcher::disabled();
        assert!(!dispatcher.is_enabled());
        assert!(!dispatcher.notify("a"));
        assert_eq!(dispatcher.shutdown(Duration::from_millis(10)).await, 0);
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let body = serde_json::json!({ "chat_id": 42, "text": "ok {identifier} at {timestamp}" });
        let rendered = render(&body, "https://a.example", "2026-01-01T00:00:00Z");
        assert_eq!(
            rendered,
            serde_json::json!({ "chat_id": 42, "text": "ok https://a.example at 2026-01-01T00:00:00Z" })
        );
    }

    #[tokio::test]
    async fn test_webhook_posts_rendered_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_string_contains("https://a.example"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = AlertConfig {
            url: Some(format!("{}/hook", server.uri())),
            ..AlertConfig::default()
        };
        let webhook = WebhookAlert::from_config(&config).unwrap().unwrap();
        webhook.send("https://a.example").await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let webhook =
            WebhookAlert::new(server.uri(), serde_json::json!({}), Duration::from_secs(2)).unwrap();
        assert!(webhook.send("x").await.is_err());
    }

    #[test]
    fn test_no_url_means_no_webhook() {
        assert!(WebhookAlert::from_config(&AlertConfig::default())
            .unwrap()
            .is_none());
    }
}
