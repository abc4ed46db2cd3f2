//! Scripted transport shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RequestConfig};
use crate::transport::RpcTransport;

/// Replays scripted outcomes in order; echoes `"0x1"` once the script runs out.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<JsonRpcResponse, RpcError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<JsonRpcRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Result<JsonRpcResponse, RpcError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<JsonRpcRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn send(
        &self,
        req: JsonRpcRequest,
        _cfg: &RequestConfig,
    ) -> Result<JsonRpcResponse, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = req.id.clone();
        self.seen.lock().unwrap().push(req);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(JsonRpcResponse::success(id, "0x1".into())))
    }

    fn url(&self) -> &str {
        "mock://scripted"
    }
}
