//! rpcdispatch-core: foundation traits and types for rpcdispatch.
//!
//! # Overview
//!
//! rpcdispatch turns many concurrent logical JSON-RPC calls into fewer
//! physical HTTP calls and rides out transient failures with classified
//! retry-with-backoff. The core crate defines:
//!
//! - [`RpcTransport`]: the async trait every transport implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: envelope types
//! - [`RpcError`]: structured error type
//! - [`classify`] module: the retry/no-retry verdict per error
//! - [`policy`] module: backoff manager and retry dispatcher
//! - [`RpcClient`]: id allocation and result unwrapping over a transport

pub mod classify;
pub mod client;
pub mod error;
pub mod policy;
pub mod request;
pub mod tracing_setup;
pub mod transport;

#[cfg(test)]
mod mock;

pub use classify::{is_always_reproduced, ErrorClass};
pub use client::RpcClient;
pub use error::RpcError;
pub use policy::{BackoffConfig, BackoffError, BackoffManager, BackoffMode, RequestDispatcher, RetryMode};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestConfig, RpcId, RpcParam};
pub use tracing_setup::{init_tracing, LogConfig};
pub use transport::RpcTransport;
