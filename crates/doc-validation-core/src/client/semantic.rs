//! HTTP client for the semantic enhancement service
//!
//! Posts a [`SemanticPrompt`] to `{base_url}/v1/enhance` and expects a
//! [`SemanticResponse`] back. Transient failures (connection errors, 429,
//! 5xx) are retried with exponential backoff; client errors and malformed
//! responses are not. The caller's timeout bounds each attempt, and the
//! enhancer bounds the call as a whole.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

use super::SemanticBackend;
use crate::contracts::{SemanticPrompt, SemanticResponse};
use crate::error::EnhancerError;

/// Configuration for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpSemanticBackendConfig {
    /// Base URL of the semantic service
    pub base_url: String,

    /// Upper bound on a single request, in milliseconds
    pub timeout_ms: u64,

    /// Maximum retry attempts
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Model requested from the service
    pub model: Option<String>,

    /// Bearer token
    pub api_key: Option<String>,
}

impl Default for HttpSemanticBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            timeout_ms: 5000,
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
            model: None,
            api_key: None,
        }
    }
}

#[derive(Serialize)]
struct EnhanceRequest<'a> {
    #[serde(flatten)]
    prompt: &'a SemanticPrompt,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// HTTP-backed semantic enhancer
pub struct HttpSemanticBackend {
    client: Client,
    config: HttpSemanticBackendConfig,
}

impl HttpSemanticBackend {
    /// Create a backend with default settings for `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self, EnhancerError> {
        Self::with_config(HttpSemanticBackendConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    pub fn with_config(config: HttpSemanticBackendConfig) -> Result<Self, EnhancerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EnhancerError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/enhance", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, url: &str, prompt: &SemanticPrompt, timeout: Duration) -> Result<SemanticResponse, EnhancerError> {
        let body = EnhanceRequest {
            prompt,
            model: self.config.model.as_deref(),
        };

        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header("X-Doc-Family", &prompt.family)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EnhancerError::Timeout(timeout.as_millis() as u64)
            } else {
                EnhancerError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<SemanticResponse>()
                .await
                .map_err(|e| EnhancerError::InvalidResponse(e.to_string()))
        } else if status == StatusCode::BAD_REQUEST {
            let error_text = response.text().await.unwrap_or_default();
            Err(EnhancerError::Service(format!("Bad request: {}", error_text)))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(EnhancerError::Service(format!(
                "Authentication failed: {}",
                status
            )))
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(EnhancerError::Http(format!("Server error: {}", status)))
        } else {
            Err(EnhancerError::Service(format!("Unexpected status: {}", status)))
        }
    }
}

#[async_trait]
impl SemanticBackend for HttpSemanticBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn enhance(
        &self,
        prompt: &SemanticPrompt,
        timeout: Duration,
    ) -> Result<SemanticResponse, EnhancerError> {
        let url = self.endpoint();
        let mut last_error = None;
        let mut backoff_ms = self.config.initial_backoff_ms;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(attempt, backoff_ms, "Retrying semantic enhancement");
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms as f64 * self.config.backoff_multiplier) as u64;
                backoff_ms = backoff_ms.min(self.config.max_backoff_ms);
            }

            match self.send(&url, prompt, timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Semantic enhancement request failed");
                    let permanent = is_permanent_error(&e);
                    last_error = Some(e);
                    if permanent {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            EnhancerError::Service("Unknown error during semantic enhancement".to_string())
        }))
    }
}

/// Determine if an error is permanent (should not retry)
fn is_permanent_error(error: &EnhancerError) -> bool {
    match error {
        EnhancerError::Service(_) | EnhancerError::InvalidResponse(_) => true,
        EnhancerError::Timeout(_) => true,
        EnhancerError::Http(_) => false,
    }
}

/// Builder for [`HttpSemanticBackend`]
pub struct HttpSemanticBackendBuilder {
    config: HttpSemanticBackendConfig,
}

impl HttpSemanticBackendBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpSemanticBackendConfig::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.config.timeout_ms = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_backoff_ms(mut self, backoff: u64) -> Self {
        self.config.initial_backoff_ms = backoff;
        self
    }

    pub fn max_backoff_ms(mut self, backoff: u64) -> Self {
        self.config.max_backoff_ms = backoff;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<HttpSemanticBackend, EnhancerError> {
        HttpSemanticBackend::with_config(self.config)
    }
}

impl Default for HttpSemanticBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}
