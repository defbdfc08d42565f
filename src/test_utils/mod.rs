//! In-memory doubles for the node and the chat platform, plus stream assertions.

pub mod macros;
mod mock;
mod sink;

use alloy::{
    primitives::{Address, BlockNumber, TxHash},
    sol_types::SolEvent,
};

pub use mock::MockLogSource;
pub use sink::RecordingSink;

use crate::types::{RawLog, TxnReceipt};

/// A mined log carrying `event`, as a node would return it.
pub fn raw_log<E: SolEvent>(
    event: &E,
    address: Address,
    txn: TxHash,
    block: BlockNumber,
    log_index: u64,
) -> RawLog {
    RawLog {
        inner: alloy::primitives::Log { address, data: event.encode_log_data() },
        block_number: Some(block),
        transaction_hash: Some(txn),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// A successful receipt holding `logs`.
#[must_use]
pub fn receipt_with(txn: TxHash, block: BlockNumber, logs: Vec<RawLog>) -> TxnReceipt {
    TxnReceipt {
        transaction_hash: txn,
        block_number: Some(block),
        from: Address::ZERO,
        to: None,
        status: true,
        logs,
    }
}
