//! Transport collaborator
//!
//! The remote backend talks to its server through this trait: one call
//! returning a future of the parsed response, with any transport failure
//! surfaced as a rejection. The default implementation posts JSON over HTTP.

use crate::wire::{WireRequest, WireResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use trellis_core::{Result, TrellisError};

/// Request/response transport to the remote store service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: &WireRequest) -> Result<WireResponse>;
}

/// Configuration for the HTTP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Endpoint receiving the POSTed operations
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Extra headers sent with every request (auth tokens and the like)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7478/store".to_string(),
            timeout_secs: 30,
            headers: HashMap::new(),
        }
    }
}

/// HTTP transport posting each operation as a JSON body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: RemoteConfig,
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrellisError::Transport(e.to_string()))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: &WireRequest) -> Result<WireResponse> {
        let mut builder = self
            .http_client
            .post(&self.config.base_url)
            .header("Content-Type", "application/json");
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| TrellisError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrellisError::Transport(format!(
                "remote store error ({}): {}",
                status, body
            )));
        }

        response
            .json::<WireResponse>()
            .await
            .map_err(|e| TrellisError::Transport(e.to_string()))
    }
}
