use std::{ops::RangeInclusive, sync::Arc};

use alloy::{
    primitives::{Address, B256, BlockNumber, TxHash, U256},
    rpc::types::Log,
};
use tokio::sync::mpsc;

use crate::events::EventKind;

/// A log exactly as the node returned it.
pub type RawLog = Log;

/// The part of a transaction receipt the pipeline carries around.
///
/// Shared read-only between every [`DecodedLog`] of the transaction so that formatters can look at
/// sibling logs the filter did not match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<BlockNumber>,
    pub from: Address,
    pub to: Option<Address>,
    pub status: bool,
    pub logs: Vec<RawLog>,
}

/// A raw log matched against the event registry and decoded into an [`EventKind`].
#[derive(Clone, Debug)]
pub struct DecodedLog {
    pub log: RawLog,
    pub name: &'static str,
    pub event: EventKind,
    pub receipt: Arc<TxnReceipt>,
}

impl DecodedLog {
    /// Position of the log in its block. Logs without one sort last.
    #[must_use]
    pub fn log_index(&self) -> u64 {
        self.log.log_index.unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn transaction_hash(&self) -> TxHash {
        self.log.transaction_hash.unwrap_or(self.receipt.transaction_hash)
    }

    #[must_use]
    pub fn block_number(&self) -> Option<BlockNumber> {
        self.log.block_number.or(self.receipt.block_number)
    }

    /// Contract that emitted the log.
    #[must_use]
    pub fn address(&self) -> Address {
        self.log.address()
    }
}

/// Every decoded log of one transaction, sorted by log index.
#[derive(Clone, Debug)]
pub struct TxnEventBatch {
    pub transaction_hash: TxHash,
    pub block_number: Option<BlockNumber>,
    pub logs: Vec<DecodedLog>,
}

impl TxnEventBatch {
    /// Sort key giving the global processing order: block number, then first log index.
    pub(crate) fn order_key(&self) -> (BlockNumber, u64) {
        (
            self.block_number.unwrap_or(BlockNumber::MAX),
            self.logs.first().map_or(u64::MAX, DecodedLog::log_index),
        )
    }
}

/// Identifies one Tractor blueprint execution inside a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub blueprint_hash: B256,
    pub nonce: U256,
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.blueprint_hash, self.nonce)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextKind {
    /// Logs emitted between a begin marker and its matching end marker, both included.
    Marked {
        key: CorrelationKey,
        operator: Address,
        publisher: Address,
        range: RangeInclusive<u64>,
    },
    /// Everything in the transaction not claimed by a marked context.
    Outer,
}

/// The logs of one logical operation inside a transaction.
///
/// Built by the [`splitter`](crate::splitter) and handed to an
/// [`AlertFormatter`](crate::AlertFormatter); never mutated after creation.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub transaction_hash: TxHash,
    pub block_number: Option<BlockNumber>,
    pub kind: ContextKind,
    pub logs: Vec<DecodedLog>,
    pub receipt: Arc<TxnReceipt>,
}

impl ExecutionContext {
    #[must_use]
    pub fn is_outer(&self) -> bool {
        self.kind == ContextKind::Outer
    }

    /// Log indices of this context, ascending.
    #[must_use]
    pub fn log_indices(&self) -> Vec<u64> {
        self.logs.iter().map(DecodedLog::log_index).collect()
    }

    #[must_use]
    pub fn contains_log_index(&self, index: u64) -> bool {
        self.logs.iter().any(|log| log.log_index() == index)
    }

    /// Logs whose event name is one of `names`, in log order.
    pub fn logs_named<'a>(&'a self, names: &'a [&str]) -> impl Iterator<Item = &'a DecodedLog> {
        self.logs.iter().filter(move |log| names.contains(&log.name))
    }

    #[must_use]
    pub fn contains_event(&self, name: &str) -> bool {
        self.logs.iter().any(|log| log.name == name)
    }
}

/// Lifecycle of an [`EventPoller`](crate::EventPoller) task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    WaitingInterval,
    Polling,
    Processing,
    Stopped,
}

pub(crate) trait TryStream<T> {
    /// Sends `item` downstream, returning `false` once the receiver is gone.
    async fn try_stream(&self, item: T) -> bool;
}

impl<T> TryStream<T> for mpsc::Sender<T> {
    async fn try_stream(&self, item: T) -> bool {
        if let Err(err) = self.send(item).await {
            warn!(error = %err, "Downstream channel closed, stopping stream");
            return false;
        }
        true
    }
}
