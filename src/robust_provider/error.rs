use std::sync::Arc;

use alloy::{
    primitives::TxHash,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Errors returned by [`RobustProvider`](super::RobustProvider) calls.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Operation timed out")]
    Timeout,
    #[error("RPC call failed after exhausting all retry attempts: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),
    #[error("Transaction receipt not found: {0}")]
    ReceiptNotFound(TxHash),
}

impl Error {
    /// Whether the failure is a connectivity problem worth retrying.
    ///
    /// Timeouts and transport-level failures (closed connections, HTTP errors, backend gone) are
    /// transient. JSON-RPC error responses and decoding failures are not: the node answered and
    /// asking again will not change the answer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::RpcError(err) => matches!(err.as_ref(), RpcError::Transport(_)),
            Error::ReceiptNotFound(_) => false,
        }
    }
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}
