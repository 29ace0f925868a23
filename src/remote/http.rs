//! HTTP transport for the remote document API.
//!
//! # Responsibilities
//! - POST batch updates to `{base_url}/v1/presentations/{id}:batchUpdate`
//! - Attach the bearer token read from the configured environment variable
//! - Map HTTP and network failures onto the error taxonomy

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use url::Url;

use crate::config::RemoteConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::remote::transport::{ConnectionFactory, Transport};

/// Message fragments that indicate a broken connection rather than a bad request.
const TRANSPORT_MARKERS: &[&str] = &["ssl", "tls", "connection", "broken pipe", "reset by peer"];

/// One pooled HTTP client.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: Url, token: Option<String>) -> Self {
        Self { client, base_url, token }
    }

    fn endpoint(&self, document_id: &str) -> OrchestratorResult<Url> {
        self.base_url
            .join(&format!("v1/presentations/{}:batchUpdate", document_id))
            .map_err(|e| OrchestratorError::fatal(format!("invalid document id '{}': {}", document_id, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn batch_update(&self, document_id: &str, requests: Vec<Value>) -> OrchestratorResult<Value> {
        let url = self.endpoint(document_id)?;
        let mut request = self.client.post(url).json(&json!({ "requests": requests }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| OrchestratorError::transient(format!("unreadable response body: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> OrchestratorError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.chars().take(200).collect::<String>())
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => OrchestratorError::transient(format!("rate limited ({})", detail)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            OrchestratorError::transient(format!("timeout ({})", detail))
        }
        StatusCode::BAD_REQUEST => OrchestratorError::fatal(format!("invalid request ({})", detail)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            OrchestratorError::fatal(format!("authorization failed ({})", detail))
        }
        s if s.is_server_error() => OrchestratorError::transient(format!("server error ({})", detail)),
        _ => OrchestratorError::fatal(detail),
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> OrchestratorError {
    if err.is_timeout() {
        return OrchestratorError::transient(format!("request timed out: {}", err));
    }
    if err.is_connect() || err.is_request() || is_transport_message(&err.to_string()) {
        return OrchestratorError::transport(err.to_string());
    }
    OrchestratorError::transient(err.to_string())
}

/// True when an error message points at a broken channel.
pub fn is_transport_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSPORT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Builds one `reqwest::Client` per pool entry.
pub struct HttpConnectionFactory {
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpConnectionFactory {
    /// Create a factory from the remote configuration.
    ///
    /// The bearer token is read once from `config.token_env`.
    pub fn from_config(config: &RemoteConfig) -> OrchestratorResult<Self> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| OrchestratorError::fatal(format!("invalid base url '{}': {}", config.base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        if token.is_none() {
            tracing::warn!(env = %config.token_env, "No API token configured, requests are unauthenticated");
        }

        Ok(Self {
            base_url,
            token,
            timeout: config.request_timeout(),
        })
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn connect(&self) -> OrchestratorResult<Arc<dyn Transport>> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| OrchestratorError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Arc::new(HttpTransport::new(client, self.base_url.clone(), self.token.clone())))
    }
}
