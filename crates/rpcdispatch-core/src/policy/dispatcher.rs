//! Retry dispatch: couples a transport call with a [`BackoffManager`].

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::classify::ErrorClass;
use crate::error::RpcError;
use crate::policy::backoff::{BackoffConfig, BackoffError, BackoffManager};
use crate::request::{JsonRpcRequest, JsonRpcResponse, RequestConfig};
use crate::transport::RpcTransport;

/// Which failures the dispatcher retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Retry every transport failure until the backoff budget runs out.
    #[default]
    Always,
    /// Return fatal errors at once. Error responses whose error object
    /// classifies as retryable are retried as well.
    Classified,
}

/// Retries a single logical call.
///
/// The only bound on attempts is the backoff config's `max_retries`. When
/// the budget is spent the caller gets the last real error, never the
/// exhaustion signal.
#[derive(Debug, Clone, Default)]
pub struct RequestDispatcher {
    config: BackoffConfig,
    mode: RetryMode,
}

impl RequestDispatcher {
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_mode(config, RetryMode::Always)
    }

    pub fn classified(config: BackoffConfig) -> Self {
        Self::with_mode(config, RetryMode::Classified)
    }

    pub fn with_mode(config: BackoffConfig, mode: RetryMode) -> Self {
        Self { config, mode }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub fn mode(&self) -> RetryMode {
        self.mode
    }

    /// Send `req` through `transport`, retrying failures.
    pub async fn dispatch(
        &self,
        transport: &dyn RpcTransport,
        req: JsonRpcRequest,
        cfg: &RequestConfig,
    ) -> Result<JsonRpcResponse, RpcError> {
        let mode = self.mode;
        self.retry(|| {
            let req = req.clone();
            async move {
                let resp = transport.send(req, cfg).await?;
                if mode == RetryMode::Classified {
                    if let Some(err) = &resp.error {
                        return Err(RpcError::Rpc(err.clone()));
                    }
                }
                Ok(resp)
            }
        })
        .await
    }

    /// Drive `op` through the retry loop with a fresh backoff manager.
    pub async fn retry<T, F, Fut>(&self, op: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let backoff = BackoffManager::new(self.config.clone());
        self.retry_with(&backoff, op).await
    }

    /// Drive `op` through the retry loop using the caller's manager.
    pub async fn retry_with<T, F, Fut>(
        &self,
        backoff: &BackoffManager,
        mut op: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if self.mode == RetryMode::Classified {
                let class = ErrorClass::of(&err);
                if class == ErrorClass::Fatal {
                    tracing::debug!(attempt, error = %err, "fatal error, not retrying");
                    return Err(err);
                }
            }

            match backoff.backoff().await {
                Ok(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                }
                Err(BackoffError::RetriesExhausted { retries }) => {
                    tracing::error!(attempt, retries, error = %err, "max retries exceeded");
                    return Err(err);
                }
            }
        }
    }
}
