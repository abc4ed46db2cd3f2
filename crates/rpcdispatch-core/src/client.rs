//! `RpcClient`: id allocation and result unwrapping over any transport.
//!
//! The client is the place where batched and unbatched paths meet: whether
//! the transport below is a plain HTTP transport or a batching wrapper, the
//! caller sees the same [`RpcError`] shapes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RpcError;
use crate::policy::RequestDispatcher;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RequestConfig};
use crate::transport::RpcTransport;

pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    dispatcher: Option<RequestDispatcher>,
    request_config: RequestConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    /// A client that sends every call exactly once.
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            dispatcher: None,
            request_config: RequestConfig::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Route every call through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: RequestDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_request_config(mut self, request_config: RequestConfig) -> Self {
        self.request_config = request_config;
        self
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// Build a request with a fresh id.
    pub fn request(&self, method: impl Into<String>, params: Vec<Value>) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        JsonRpcRequest::new(id, method, params)
    }

    /// Send a prepared request and return the raw response.
    pub async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        match &self.dispatcher {
            Some(dispatcher) => {
                dispatcher
                    .dispatch(self.transport.as_ref(), req, &self.request_config)
                    .await
            }
            None => self.transport.send(req, &self.request_config).await,
        }
    }

    /// Call `method` and return its result value.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let req = self.request(method, params);
        let resp = self.send(req).await?;
        resp.into_result().map_err(RpcError::Rpc)
    }

    /// Call `method` and deserialize its result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Unmarshal(e.to_string()))
    }

    /// Issue all `calls` concurrently; results come back in input order.
    ///
    /// Over a batching transport the calls coalesce into as few physical
    /// requests as the batch size allows.
    pub async fn call_many(&self, calls: Vec<(String, Vec<Value>)>) -> Vec<Result<Value, RpcError>> {
        future::join_all(
            calls
                .into_iter()
                .map(|(method, params)| async move { self.call(&method, params).await }),
        )
        .await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.transport.url())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;
    use crate::policy::BackoffConfig;
    use crate::request::{JsonRpcError, RpcId};

    #[tokio::test]
    async fn ids_increase_per_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let client = RpcClient::new(transport.clone());
        client.call("eth_blockNumber", vec![]).await.unwrap();
        client.call("eth_chainId", vec![]).await.unwrap();

        let ids: Vec<RpcId> = transport.seen().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RpcId::Number(1), RpcId::Number(2)]);
    }

    #[tokio::test]
    async fn error_response_becomes_rpc_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(JsonRpcResponse::failure(
            1,
            JsonRpcError::new(3, "execution reverted"),
        ))]));
        let client = RpcClient::new(transport);
        let err = client.call("eth_call", vec![]).await.unwrap_err();
        assert!(err.is_execution_error());
    }

    #[tokio::test]
    async fn typed_result() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(JsonRpcResponse::success(
            1,
            serde_json::json!({"number": "0x10"}),
        ))]));
        let client = RpcClient::new(transport);

        #[derive(serde::Deserialize)]
        struct Block {
            number: String,
        }
        let block: Block = client.call_as("eth_getBlockByNumber", vec![]).await.unwrap();
        assert_eq!(block.number, "0x10");

        let err = client.call_as::<u64>("eth_blockNumber", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Unmarshal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_retries_transport_failures() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(RpcError::Connection(
            "reset by peer".into(),
        ))]));
        let client = RpcClient::new(transport.clone()).with_dispatcher(RequestDispatcher::new(
            BackoffConfig::exponential(2, 5, 5).unwrap(),
        ));
        let value = client.call("eth_blockNumber", vec![]).await.unwrap();
        assert_eq!(value, Value::String("0x1".into()));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn call_many_keeps_input_order() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let client = RpcClient::new(transport.clone());
        let results = client
            .call_many(vec![
                ("eth_blockNumber".into(), vec![]),
                ("eth_chainId".into(), vec![]),
            ])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.calls(), 2);
    }
}
