//! rpcdispatch-http: HTTP JSON-RPC transport with request batching.
//!
//! # Features
//! - [`HttpTransport`]: one HTTP POST per physical call, singular or array
//!   envelope
//! - [`BatchingTransport`]: coalesces concurrent calls into size/time
//!   bounded batches, optionally retrying each batch with classified backoff
//! - [`HttpClientConfig`]: serde configuration that assembles an
//!   [`RpcClient`](rpcdispatch_core::RpcClient)

pub mod batch;
pub mod client;
pub mod config;

pub use batch::{BatcherConfig, BatchingTransport};
pub use client::HttpTransport;
pub use config::HttpClientConfig;
