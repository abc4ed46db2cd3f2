//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! One request goes out as a JSON object, several as a JSON array. The
//! transport performs exactly one HTTP exchange per call; retry and
//! batching live in the layers above it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use rpcdispatch_core::error::RpcError;
use rpcdispatch_core::request::{JsonRpcRequest, JsonRpcResponse, RequestConfig};
use rpcdispatch_core::transport::RpcTransport;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A batch reply: normally an array, but nodes that reject the whole batch
/// answer with a single error object.
#[derive(Deserialize)]
#[serde(untagged)]
enum BatchReply {
    Many(Vec<JsonRpcResponse>),
    One(JsonRpcResponse),
}

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            request_timeout,
        })
    }

    /// Create with the default timeout.
    pub fn default_for(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::new(url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn post(&self, body: Vec<u8>, cfg: &RequestConfig) -> Result<Vec<u8>, RpcError> {
        let timeout = cfg.timeout.unwrap_or(self.request_timeout);
        let resp = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        Ok(bytes.to_vec())
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout {
            ms: timeout.as_millis() as u64,
        }
    } else if e.is_decode() {
        RpcError::Unmarshal(e.to_string())
    } else {
        RpcError::Connection(e.to_string())
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, RpcError> {
    serde_json::from_slice(body).map_err(|e| RpcError::Unmarshal(e.to_string()))
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(
        &self,
        req: JsonRpcRequest,
        cfg: &RequestConfig,
    ) -> Result<JsonRpcResponse, RpcError> {
        let body = serde_json::to_vec(&req).map_err(|e| RpcError::Marshal(e.to_string()))?;
        tracing::trace!(url = %self.url, method = %req.method, id = %req.id, "sending request");
        let reply = self.post(body, cfg).await?;
        decode(&reply)
    }

    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
        cfg: &RequestConfig,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }

        let body = serde_json::to_vec(&reqs).map_err(|e| RpcError::Marshal(e.to_string()))?;
        tracing::debug!(url = %self.url, batch_size = reqs.len(), "sending batch");
        let reply = self.post(body, cfg).await?;

        match decode::<BatchReply>(&reply)? {
            BatchReply::Many(responses) => Ok(responses),
            BatchReply::One(JsonRpcResponse {
                error: Some(err), ..
            }) => Err(RpcError::Rpc(err)),
            BatchReply::One(resp) => Ok(vec![resp]),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
