//! Auto-batching engine: coalesce concurrent requests into bounded batches.
//!
//! Requests pushed through [`BatchingTransport`] land on a bounded intake
//! channel. A background task owns the current batch and flushes it when it
//! reaches `max_batch_size` or when the batch window closes, whichever comes
//! first. Each caller gets its response back on a `oneshot` channel,
//! correlated by request id.
//!
//! # Usage
//! ```rust,no_run
//! use rpcdispatch_http::batch::{BatcherConfig, BatchingTransport};
//! use rpcdispatch_http::HttpTransport;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), rpcdispatch_core::RpcError> {
//! let http = Arc::new(HttpTransport::default_for("https://rpc.example.com")?);
//! let batcher = BatchingTransport::new(http, BatcherConfig::default())?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use rpcdispatch_core::error::RpcError;
use rpcdispatch_core::classify::ErrorClass;
use rpcdispatch_core::policy::{BackoffConfig, BackoffError, BackoffManager, RequestDispatcher};
use rpcdispatch_core::request::{JsonRpcRequest, JsonRpcResponse, RequestConfig, RpcId};
use rpcdispatch_core::transport::RpcTransport;

type ResponseSender = oneshot::Sender<Result<JsonRpcResponse, RpcError>>;

struct QueuedRequest {
    req: JsonRpcRequest,
    tx: ResponseSender,
}

impl QueuedRequest {
    fn deliver(self, outcome: Result<JsonRpcResponse, RpcError>) {
        // The caller may have given up already; nothing to do then.
        let _ = self.tx.send(outcome);
    }
}

/// Batching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Flush as soon as this many requests are queued. Also the capacity of
    /// the intake channel.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Length of the batch window in milliseconds.
    #[serde(default = "default_max_batch_time_ms")]
    pub max_batch_time_ms: u64,
    /// Timeout for each physical call (transport default when unset).
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Retry failed flushes with classified backoff.
    #[serde(default)]
    pub retry: Option<BackoffConfig>,
}

fn default_max_batch_size() -> usize { 100 }
fn default_max_batch_time_ms() -> u64 { 10 }

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_time_ms: default_max_batch_time_ms(),
            request_timeout_ms: None,
            retry: None,
        }
    }
}

impl BatcherConfig {
    /// Size/time bounds only, no retry.
    pub fn new(max_batch_size: usize, max_batch_time: Duration) -> Self {
        Self {
            max_batch_size,
            max_batch_time_ms: max_batch_time.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: BackoffConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn max_batch_time(&self) -> Duration {
        Duration::from_millis(self.max_batch_time_ms)
    }

    pub fn request_config(&self) -> RequestConfig {
        RequestConfig {
            timeout: self.request_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn validate(&self) -> Result<(), RpcError> {
        if self.max_batch_size == 0 {
            return Err(RpcError::InvalidConfig("max_batch_size must be > 0".into()));
        }
        if self.max_batch_time_ms == 0 {
            return Err(RpcError::InvalidConfig("max_batch_time_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Auto-batching transport wrapper.
///
/// Cancelling the token supplied at construction (or calling
/// [`close`](Self::close)) fails every pending request with
/// [`RpcError::Canceled`] and refuses new ones. Dropping the last handle
/// flushes whatever is queued, then stops the background task.
pub struct BatchingTransport {
    inner: Arc<dyn RpcTransport>,
    tx: mpsc::Sender<QueuedRequest>,
    cancel: CancellationToken,
    config: BatcherConfig,
}

impl BatchingTransport {
    /// Create a new batching transport wrapping `inner`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(inner: Arc<dyn RpcTransport>, config: BatcherConfig) -> Result<Arc<Self>, RpcError> {
        Self::with_cancellation(inner, config, CancellationToken::new())
    }

    /// Like [`new`](Self::new), stopped when `cancel` fires.
    pub fn with_cancellation(
        inner: Arc<dyn RpcTransport>,
        config: BatcherConfig,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, RpcError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel::<QueuedRequest>(config.max_batch_size);
        let flusher = Flusher {
            transport: inner.clone(),
            request_config: config.request_config(),
            dispatcher: config.retry.clone().map(RequestDispatcher::classified),
        };

        // Spawn background flush task
        tokio::spawn(batch_loop(
            rx,
            flusher,
            config.max_batch_size,
            config.max_batch_time(),
            cancel.clone(),
        ));

        Ok(Arc::new(Self {
            inner,
            tx,
            cancel,
            config,
        }))
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Queue `req` for the next batch and wait for its response.
    pub async fn enqueue(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        self.submit(req, None).await
    }

    /// Like [`enqueue`](Self::enqueue), abandoned with
    /// [`RpcError::Canceled`] once `cancel` fires.
    pub async fn enqueue_with_cancel(
        &self,
        req: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, RpcError> {
        self.submit(req, Some(cancel)).await
    }

    /// Stop the batcher. Pending and future requests fail with `Canceled`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn submit(
        &self,
        req: JsonRpcRequest,
        caller: Option<&CancellationToken>,
    ) -> Result<JsonRpcResponse, RpcError> {
        if self.cancel.is_cancelled() {
            return Err(RpcError::Canceled);
        }

        let caller_cancelled = async {
            match caller {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(caller_cancelled);

        let (tx, rx) = oneshot::channel();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RpcError::Canceled),
            _ = &mut caller_cancelled => return Err(RpcError::Canceled),
            sent = self.tx.send(QueuedRequest { req, tx }) => {
                sent.map_err(|_| RpcError::Canceled)?;
            }
        }

        tokio::select! {
            biased;
            _ = &mut caller_cancelled => Err(RpcError::Canceled),
            outcome = rx => outcome.unwrap_or(Err(RpcError::Canceled)),
        }
    }
}

type Outcome = Result<JsonRpcResponse, RpcError>;

/// Performs the physical call for one batch and fans the outcome out.
struct Flusher {
    transport: Arc<dyn RpcTransport>,
    request_config: RequestConfig,
    dispatcher: Option<RequestDispatcher>,
}

impl Flusher {
    async fn flush(&self, batch: Vec<QueuedRequest>, cancel: &CancellationToken) {
        let reqs: Vec<JsonRpcRequest> = batch.iter().map(|q| q.req.clone()).collect();
        tracing::debug!(batch_size = reqs.len(), url = %self.transport.url(), "flushing batch");

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => vec![Err(RpcError::Canceled); batch.len()],
            outcomes = self.execute(&reqs) => outcomes,
        };

        for (item, outcome) in batch.into_iter().zip(outcomes) {
            item.deliver(outcome);
        }
    }

    /// One outcome per request, in request order.
    async fn execute(&self, reqs: &[JsonRpcRequest]) -> Vec<Outcome> {
        let Some(dispatcher) = &self.dispatcher else {
            return match self.send_once(reqs.to_vec()).await {
                Ok(responses) => correlate(reqs, responses),
                Err(e) => fail_all(reqs.len(), e),
            };
        };

        // One budget per flush, shared by whole-call failures and by
        // re-sends of individual error responses.
        let backoff = BackoffManager::new(dispatcher.config().clone());
        let mut outcomes = vec![Err(RpcError::Canceled); reqs.len()];
        let mut outstanding: Vec<usize> = (0..reqs.len()).collect();

        loop {
            let round: Vec<JsonRpcRequest> = outstanding.iter().map(|&i| reqs[i].clone()).collect();
            let responses = match dispatcher
                .retry_with(&backoff, || self.send_once(round.clone()))
                .await
            {
                Ok(responses) => responses,
                Err(e) => {
                    for &i in &outstanding {
                        outcomes[i] = Err(e.clone());
                    }
                    return outcomes;
                }
            };

            let mut again = Vec::new();
            for (&i, outcome) in outstanding.iter().zip(correlate(&round, responses)) {
                if has_retryable_error(&outcome) {
                    again.push(i);
                }
                outcomes[i] = outcome;
            }
            if again.is_empty() {
                return outcomes;
            }

            match backoff.backoff().await {
                Ok(delay) => {
                    tracing::warn!(
                        requests = again.len(),
                        delay_ms = delay.as_millis() as u64,
                        "re-sending error responses"
                    );
                    outstanding = again;
                }
                Err(BackoffError::RetriesExhausted { retries }) => {
                    tracing::error!(requests = again.len(), retries, "max retries exceeded");
                    return outcomes;
                }
            }
        }
    }

    async fn send_once(
        &self,
        mut reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        if reqs.len() == 1 {
            // Single item: skip batch envelope
            let req = reqs.remove(0);
            let resp = self.transport.send(req, &self.request_config).await?;
            Ok(vec![resp])
        } else {
            self.transport.send_batch(reqs, &self.request_config).await
        }
    }
}

fn fail_all(n: usize, e: RpcError) -> Vec<Outcome> {
    tracing::warn!(batch_size = n, error = %e, "batch failed");
    vec![Err(e); n]
}

/// Match responses to requests by id; repeated ids are served in order.
fn correlate(reqs: &[JsonRpcRequest], responses: Vec<JsonRpcResponse>) -> Vec<Outcome> {
    let mut by_id: HashMap<RpcId, VecDeque<JsonRpcResponse>> = HashMap::new();
    for resp in responses {
        by_id.entry(resp.id.clone()).or_default().push_back(resp);
    }
    reqs.iter()
        .map(|req| match by_id.get_mut(&req.id).and_then(VecDeque::pop_front) {
            Some(resp) => Ok(resp),
            None => {
                tracing::warn!(id = %req.id, "no result for request in batch");
                Err(RpcError::NoResultFound { id: req.id.clone() })
            }
        })
        .collect()
}

fn has_retryable_error(outcome: &Outcome) -> bool {
    match outcome {
        Ok(JsonRpcResponse { error: Some(err), .. }) => {
            ErrorClass::of(&RpcError::Rpc(err.clone())).is_retryable()
        }
        _ => false,
    }
}

async fn batch_loop(
    mut rx: mpsc::Receiver<QueuedRequest>,
    flusher: Flusher,
    max_batch_size: usize,
    window: Duration,
    cancel: CancellationToken,
) {
    let mut batch: Vec<QueuedRequest> = Vec::with_capacity(max_batch_size);
    let deadline = time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                drain_canceled(&mut rx, batch).await;
                tracing::debug!("batcher closed");
                return;
            }
            _ = &mut deadline => {
                if !batch.is_empty() {
                    let due = std::mem::replace(&mut batch, Vec::with_capacity(max_batch_size));
                    flusher.flush(due, &cancel).await;
                }
                deadline.as_mut().reset(Instant::now() + window);
            }
            item = rx.recv() => match item {
                Some(item) => {
                    // A fresh batch opens its own window.
                    if batch.is_empty() {
                        deadline.as_mut().reset(Instant::now() + window);
                    }
                    batch.push(item);
                    if batch.len() >= max_batch_size {
                        let full = std::mem::replace(&mut batch, Vec::with_capacity(max_batch_size));
                        flusher.flush(full, &cancel).await;
                        deadline.as_mut().reset(Instant::now() + window);
                    }
                }
                None => {
                    // All handles dropped
                    if !batch.is_empty() {
                        flusher.flush(batch, &cancel).await;
                    }
                    return;
                }
            },
        }
    }
}

async fn drain_canceled(rx: &mut mpsc::Receiver<QueuedRequest>, batch: Vec<QueuedRequest>) {
    for item in batch {
        item.deliver(Err(RpcError::Canceled));
    }
    rx.close();
    while let Some(item) = rx.recv().await {
        item.deliver(Err(RpcError::Canceled));
    }
}

#[async_trait]
impl RpcTransport for BatchingTransport {
    async fn send(
        &self,
        req: JsonRpcRequest,
        _cfg: &RequestConfig,
    ) -> Result<JsonRpcResponse, RpcError> {
        self.enqueue(req).await
    }

    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
        _cfg: &RequestConfig,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        future::try_join_all(reqs.into_iter().map(|req| self.enqueue(req))).await
    }

    fn url(&self) -> &str {
        self.inner.url()
    }
}
