use std::sync::Arc;

use alloy::{
    primitives::TxHash,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

use crate::{
    events::MarkerSide, registry::RegistryError, robust_provider::Error as RobustProviderError,
    types::CorrelationKey,
};

/// Errors emitted by the pipeline.
///
/// Only the configuration variants are returned from builder `connect()`/`build()` methods as
/// fatal errors. Everything else is produced while processing a single poll cycle or transaction;
/// the running loops log those and move on.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// A node call failed after the provider exhausted its retries.
    #[error("Provider error: {0}")]
    Provider(#[from] RobustProviderError),

    /// A log filter could not be installed.
    #[error("Failed to create log filter after {attempts} attempt(s): {source}")]
    FilterCreation {
        attempts: usize,
        #[source]
        source: RobustProviderError,
    },

    /// The pipeline was asked to stop while waiting on the node.
    #[error("Operation cancelled")]
    Cancelled,

    /// A marker event has no counterpart with the same correlation key.
    #[error("Unmatched {side} marker {key} at log index {log_index} in transaction {txn_hash}")]
    UnmatchedMarker { txn_hash: TxHash, side: MarkerSide, key: CorrelationKey, log_index: u64 },

    /// Two marked ranges of the same transaction overlap.
    #[error("Overlapping execution contexts at log index {log_index} in transaction {txn_hash}")]
    OverlappingContexts { txn_hash: TxHash, log_index: u64 },

    #[error("Invalid event registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("At least one event group must be configured")]
    NoEventGroups,

    #[error("Dedup capacity must be greater than 0")]
    InvalidDedupCapacity,

    #[error("Poll interval must be greater than 0")]
    InvalidPollInterval,

    #[error("Stream buffer capacity must be greater than 0")]
    InvalidBufferCapacity,

    #[error("Channel payload limit must be greater than 0")]
    InvalidPayloadLimit,

    #[error("Dispatch interval must be greater than 0")]
    InvalidDispatchInterval,
}

impl PipelineError {
    /// Whether the error belongs to a single transaction rather than to the connection.
    #[must_use]
    pub fn is_data_inconsistency(&self) -> bool {
        matches!(self, Self::UnmatchedMarker { .. } | Self::OverlappingContexts { .. })
    }
}

impl From<RpcError<TransportErrorKind>> for PipelineError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        PipelineError::Provider(RobustProviderError::RpcError(Arc::new(error)))
    }
}
