//! Error classification: decides whether a failed call is worth retrying.
//!
//! The JSON-RPC code table below is kept exactly as providers document it,
//! including adjacent ranges with opposite verdicts and the one code whose
//! verdict depends on the message text. Do not normalise it.

use crate::error::RpcError;
use crate::request::JsonRpcError;

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Message that turns a `-32000` server error into a retryable one.
const EXECUTION_TIMEOUT: &str = "execution timeout";

/// Verdict of the table lookup for one error instance.
///
/// `true` marks failures that a later attempt can get past (rate limiting,
/// overloaded or timing-out nodes, 5xx); `false` marks failures that will
/// reproduce on every attempt, plus the cases that carry no verdict (no
/// error at all, bare network errors).
pub fn is_always_reproduced(err: Option<&RpcError>) -> bool {
    let Some(err) = err else {
        return false;
    };
    match err {
        RpcError::Connection(_) | RpcError::Timeout { .. } => false,
        RpcError::HttpStatus { status, .. } => http_status_verdict(*status),
        RpcError::Rpc(rpc) => rpc_code_verdict(rpc),
        // Unrecognised shapes fail open.
        _ => true,
    }
}

fn http_status_verdict(status: u16) -> bool {
    match status {
        HTTP_TOO_MANY_REQUESTS => true,
        400..=499 => false,
        _ => true,
    }
}

fn rpc_code_verdict(err: &JsonRpcError) -> bool {
    match err.code {
        -32000 => err.message == EXECUTION_TIMEOUT,
        -32001 | -32002 | -32003 | -32004 | -32006 => false,
        -32005 => true,
        -32099..=-32007 => true,
        -32599..=-32100 => false,
        -32699..=-32604 => false,
        -32768..=-32701 => false,
        -32600 | -32601 | -32602 | -32603 | -32700 => false,
        0..=62 => false,
        _ => true,
    }
}

/// Retry class of an error, as consumed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A later attempt may succeed.
    Retryable,
    /// Retrying would reproduce the same failure.
    Fatal,
}

impl ErrorClass {
    /// Classify `err` for the retry loop.
    ///
    /// Network failures are always retried. Errors produced locally before
    /// anything reached the wire never change between attempts. Everything
    /// else follows [`is_always_reproduced`].
    pub fn of(err: &RpcError) -> Self {
        match err {
            e if e.is_network() => Self::Retryable,
            RpcError::Canceled | RpcError::Marshal(_) | RpcError::InvalidConfig(_) => Self::Fatal,
            e if is_always_reproduced(Some(e)) => Self::Retryable,
            _ => Self::Fatal,
        }
    }

    pub fn is_retryable(self) -> bool {
        self == Self::Retryable
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable => write!(f, "retryable"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}
