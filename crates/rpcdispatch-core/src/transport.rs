//! The `RpcTransport` trait, the seam between dispatch logic and the network.

use async_trait::async_trait;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RequestConfig};

/// Performs the physical call for one or many envelope requests.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single request using the singular JSON-RPC envelope.
    async fn send(
        &self,
        req: JsonRpcRequest,
        cfg: &RequestConfig,
    ) -> Result<JsonRpcResponse, RpcError>;

    /// Send many requests as one JSON array envelope.
    ///
    /// Results may come back in any order; callers correlate them by id.
    /// The default implementation sends them one by one, override for true
    /// batching.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
        cfg: &RequestConfig,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let mut responses = Vec::with_capacity(reqs.len());
        for req in reqs {
            responses.push(self.send(req, cfg).await?);
        }
        Ok(responses)
    }

    /// Return the transport's identifier (URL or name).
    fn url(&self) -> &str;
}
