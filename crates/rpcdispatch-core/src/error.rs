//! Transport-level error types.

use thiserror::Error;

use crate::request::{JsonRpcError, RpcId};

/// Errors that can occur while dispatching an RPC call.
///
/// The type is `Clone` because a failed physical batch call is delivered,
/// unchanged, to every logical call it carried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// The transport could not complete the exchange (connection refused,
    /// reset, DNS failure, ...).
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The request could not be serialized.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// The response could not be deserialized.
    #[error("unmarshal error: {0}")]
    Unmarshal(String),

    /// A batch response did not carry a result for this request id.
    #[error("no result found for request id {id}")]
    NoResultFound { id: RpcId },

    /// The call was canceled before a response was delivered.
    #[error("request canceled")]
    Canceled,

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Returns `true` for failures of the network layer itself.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }

    /// Returns `true` if this error is worth retrying.
    ///
    /// See [`crate::classify::ErrorClass`] for the full rule set.
    pub fn is_retryable(&self) -> bool {
        crate::classify::ErrorClass::of(self).is_retryable()
    }

    /// Returns `true` if this is a node-side execution error.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// The HTTP status carried by this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_rpc_code() {
        let err = RpcError::Rpc(JsonRpcError {
            code: -32601,
            message: "method not found".into(),
            data: None,
        });
        assert_eq!(err.to_string(), "RPC error -32601: method not found");
    }

    #[test]
    fn network_predicate() {
        assert!(RpcError::Connection("refused".into()).is_network());
        assert!(RpcError::Timeout { ms: 10 }.is_network());
        assert!(!RpcError::Canceled.is_network());
        assert_eq!(
            RpcError::HttpStatus { status: 502, body: String::new() }.http_status(),
            Some(502)
        );
    }
}
