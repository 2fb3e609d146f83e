//! HTTP POST probe.
//!
//! Sends one JSON request per identifier to a fixed endpoint, carrying the
//! session headers and, optionally, a fresh random request id. The body is
//! built from a template where `{identifier}` is substituted in every string.

use crate::error::{ProbeError, SweepError};
use crate::policy::RawResponse;
use crate::probe::Probe;
use crate::session::Session;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const IDENTIFIER_PLACEHOLDER: &str = "{identifier}";

/// `[probe]` table of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpProbeConfig {
    /// Endpoint every probe is POSTed to
    pub endpoint: String,
    /// JSON body template
    pub body: serde_json::Value,
    /// Extra headers sent with every probe
    pub headers: BTreeMap<String, String>,
    /// Header carrying a random UUID per request, if set
    pub request_id_header: Option<String>,
    /// Body phrases meaning the session was not accepted
    pub session_invalid_markers: Vec<String>,
}

impl Default for HttpProbeConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            body: serde_json::json!({ "url": IDENTIFIER_PLACEHOLDER }),
            headers: BTreeMap::new(),
            request_id_header: None,
            session_invalid_markers: Vec::new(),
        }
    }
}

/// Substitute the identifier into every string of the template.
pub fn render_body(template: &serde_json::Value, identifier: &str) -> serde_json::Value {
    match template {
        serde_json::Value::String(s) => {
            serde_json::Value::String(s.replace(IDENTIFIER_PLACEHOLDER, identifier))
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|item| render_body(item, identifier)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render_body(value, identifier)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Default probe implementation over reqwest.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    config: HttpProbeConfig,
}

impl HttpProbe {
    /// Build a probe whose HTTP client gives up slightly after `timeout`.
    ///
    /// The executor enforces the real deadline; the client timeout only
    /// stops abandoned connections from lingering.
    pub fn new(config: HttpProbeConfig, timeout: Duration) -> Result<Self, SweepError> {
        if config.endpoint.trim().is_empty() {
            return Err(SweepError::config("probe endpoint is not configured"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(2))
            .build()
            .map_err(|e| {
                SweepError::network_with_detail("Failed to create probe HTTP client", e.to_string())
            })?;
        Ok(Self { client, config })
    }

    fn session_rejected(&self, status: u16, body: &str) -> bool {
        status == 401
            || self
                .config
                .session_invalid_markers
                .iter()
                .any(|marker| !marker.is_empty() && body.contains(marker.as_str()))
    }
}

impl HttpProbe {
    /// Configured headers, overridden by session headers of the same name.
    fn request_headers(&self, session: &Session) -> Result<HeaderMap, ProbeError> {
        let mut headers = HeaderMap::new();
        let pairs = self
            .config
            .headers
            .iter()
            .chain(session.headers.iter().map(|(name, value)| (name, value)));
        for (name, value) in pairs {
            headers.insert(header_name(name)?, header_value(name, value)?);
        }
        if let Some(name) = &self.config.request_id_header {
            let id = uuid::Uuid::new_v4().to_string();
            headers.insert(header_name(name)?, header_value(name, &id)?);
        }
        Ok(headers)
    }
}

fn header_name(name: &str) -> Result<HeaderName, ProbeError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ProbeError::Network(format!("invalid header name '{}': {}", name, e)))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ProbeError> {
    HeaderValue::from_str(value)
        .map_err(|e| ProbeError::Network(format!("invalid value for header '{}': {}", name, e)))
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, identifier: &str, session: &Session) -> Result<RawResponse, ProbeError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.request_headers(session)?)
            .json(&render_body(&self.config.body, identifier))
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if self.session_rejected(status, &body) {
            return Err(ProbeError::SessionRejected);
        }
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_render_body_substitutes_nested_strings() {
        let template = json!({
            "url": "{identifier}",
            "meta": { "note": "checking {identifier} now", "n": 3 },
            "list": ["{identifier}", true]
        });
        let rendered = render_body(&template, "https://a.example");
        assert_eq!(
            rendered,
            json!({
                "url": "https://a.example",
                "meta": { "note": "checking https://a.example now", "n": 3 },
                "list": ["https://a.example", true]
            })
        );
    }

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let err = HttpProbe::new(HttpProbeConfig::default(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SweepError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_probe_sends_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/simulate"))
            .and(header("x-auth", "token-1"))
            .and(header("x-client", "sweep"))
            .and(header_exists("x-request-id"))
            .and(body_json(json!({ "url": "https://a.example", "kind": "scan" })))
            .respond_with(ResponseTemplate::new(200).set_body_string("all clear"))
            .expect(1)
            .mount(&server)
            .await;

        let config = HttpProbeConfig {
            endpoint: format!("{}/simulate", server.uri()),
            body: json!({ "url": "{identifier}", "kind": "scan" }),
            headers: BTreeMap::from([("x-client".to_string(), "sweep".to_string())]),
            request_id_header: Some("x-request-id".into()),
            session_invalid_markers: Vec::new(),
        };
        let probe = HttpProbe::new(config, Duration::from_secs(5)).unwrap();
        let session = Session::new(vec![("x-auth".into(), "token-1".into())]);

        let response = probe.probe("https://a.example", &session).await.unwrap();
        assert_eq!(response, RawResponse::new(200, "all clear"));
    }

    #[tokio::test]
    async fn test_session_header_replaces_configured_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(|request: &wiremock::Request| {
                let values: Vec<String> = request
                    .headers
                    .get_all("x-auth")
                    .iter()
                    .map(|v| v.to_str().unwrap_or_default().to_string())
                    .collect();
                ResponseTemplate::new(200).set_body_string(values.join(","))
            })
            .mount(&server)
            .await;

        let config = HttpProbeConfig {
            endpoint: server.uri(),
            headers: BTreeMap::from([("x-auth".to_string(), "static".to_string())]),
            ..HttpProbeConfig::default()
        };
        let probe = HttpProbe::new(config, Duration::from_secs(5)).unwrap();
        let session = Session::new(vec![("X-Auth".into(), "token-1".into())]);

        let response = probe.probe("https://a.example", &session).await.unwrap();
        assert_eq!(response.body, "token-1");
    }

    #[tokio::test]
    async fn test_probe_reports_session_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"error\":\"nonce expired\"}"))
            .mount(&server)
            .await;

        let config = HttpProbeConfig {
            endpoint: server.uri(),
            session_invalid_markers: vec!["nonce expired".into()],
            ..HttpProbeConfig::default()
        };
        let probe = HttpProbe::new(config, Duration::from_secs(5)).unwrap();
        let err = probe.probe("x", &Session::empty()).await.unwrap_err();
        assert_eq!(err, ProbeError::SessionRejected);
    }

    #[tokio::test]
    async fn test_probe_unauthorized_is_session_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let config = HttpProbeConfig {
            endpoint: server.uri(),
            ..HttpProbeConfig::default()
        };
        let probe = HttpProbe::new(config, Duration::from_secs(5)).unwrap();
        assert_eq!(
            probe.probe("x", &Session::empty()).await.unwrap_err(),
            ProbeError::SessionRejected
        );
    }

    #[tokio::test]
    async fn test_probe_passes_through_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let config = HttpProbeConfig {
            endpoint: server.uri(),
            ..HttpProbeConfig::default()
        };
        let probe = HttpProbe::new(config, Duration::from_secs(5)).unwrap();
        let response = probe.probe("x", &Session::empty()).await.unwrap();
        assert_eq!(response.status, 429);
        assert_eq!(response.body, "slow down");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let config = HttpProbeConfig {
            endpoint: "http://127.0.0.1:9/".into(),
            ..HttpProbeConfig::default()
        };
        let probe = HttpProbe::new(config, Duration::from_secs(2)).unwrap();
        let err = probe.probe("x", &Session::empty()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Network(_) | ProbeError::Timeout));
    }
}
