//! Client configuration and assembly.
//!
//! ```json
//! {
//!   "request_timeout_ms": 10000,
//!   "backoff": { "mode": "exponential", "max_retries": 3, "initial_delay_ms": 100, "max_delay_ms": 2000 },
//!   "retry_mode": "classified",
//!   "batch": { "max_batch_size": 50, "max_batch_time_ms": 5 },
//!   "log": { "level": "warn", "retry": "debug", "json": true }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rpcdispatch_core::client::RpcClient;
use rpcdispatch_core::error::RpcError;
use rpcdispatch_core::policy::{BackoffConfig, RequestDispatcher, RetryMode};
use rpcdispatch_core::tracing_setup::{init_tracing, LogConfig};
use rpcdispatch_core::transport::RpcTransport;

use crate::batch::{BatcherConfig, BatchingTransport};
use crate::client::{HttpTransport, DEFAULT_REQUEST_TIMEOUT};

/// Configuration for an HTTP-backed [`RpcClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Timeout for each HTTP exchange.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retry budget and delay bounds.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Which failures unbatched calls retry.
    #[serde(default)]
    pub retry_mode: RetryMode,
    /// Enables request batching when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatcherConfig>,
    /// Installed as the global subscriber by [`connect`](Self::connect).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            backoff: BackoffConfig::default(),
            retry_mode: RetryMode::default(),
            batch: None,
            log: None,
        }
    }
}

impl HttpClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RpcError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RpcError::InvalidConfig(e.to_string()))?;
        if let Some(batch) = &config.batch {
            batch.validate()?;
        }
        if let Some(log) = &config.log {
            log.validate()?;
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RpcError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Assemble `HttpTransport → [BatchingTransport] → RpcClient` for `url`.
    ///
    /// With batching enabled, retries run per physical batch inside the
    /// batcher (classified, using `batch.retry` or else `backoff`), and the
    /// client itself does not retry. Without batching the client dispatches
    /// every call with `backoff` and `retry_mode`.
    ///
    /// Batching spawns a task, so this must run inside a Tokio runtime.
    pub fn connect(&self, url: impl Into<String>) -> Result<RpcClient, RpcError> {
        if let Some(log) = &self.log {
            if !init_tracing(log)? {
                tracing::debug!("subscriber already installed, keeping it");
            }
        }

        let http: Arc<dyn RpcTransport> =
            Arc::new(HttpTransport::new(url, self.request_timeout())?);

        match &self.batch {
            Some(batch) => {
                let mut batch = batch.clone();
                if batch.retry.is_none() {
                    batch.retry = Some(self.backoff.clone());
                }
                let batcher = BatchingTransport::new(http, batch)?;
                tracing::info!(url = %batcher.url(), "connected with batching");
                Ok(RpcClient::new(batcher))
            }
            None => {
                tracing::info!(url = %http.url(), "connected");
                let dispatcher = RequestDispatcher::with_mode(self.backoff.clone(), self.retry_mode);
                Ok(RpcClient::new(http).with_dispatcher(dispatcher))
            }
        }
    }
}
