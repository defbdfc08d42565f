use std::{collections::HashMap, sync::Arc};

use alloy::primitives::TxHash;

use crate::{
    registry::EventRegistry,
    types::{DecodedLog, RawLog, TxnEventBatch, TxnReceipt},
};

/// Turns raw logs into [`DecodedLog`]s using an [`EventRegistry`] and regroups them per
/// transaction.
#[derive(Clone, Debug)]
pub struct LogDecoder {
    registry: Arc<EventRegistry>,
}

impl LogDecoder {
    #[must_use]
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Decodes `raw`, attaching the shared `receipt`.
    ///
    /// Logs whose first topic is not registered, and logs that fail ABI decoding, are discarded
    /// with a diagnostic.
    #[must_use]
    pub fn decode(&self, raw: RawLog, receipt: &Arc<TxnReceipt>) -> Option<DecodedLog> {
        let Some(topic0) = raw.topic0() else {
            debug!(
                txn_hash = %receipt.transaction_hash,
                log_index = ?raw.log_index,
                "Skipping anonymous log"
            );
            return None;
        };

        let Some(signature) = self.registry.by_hash(topic0) else {
            debug!(
                txn_hash = %receipt.transaction_hash,
                log_index = ?raw.log_index,
                topic0 = %topic0,
                "Skipping log with unknown event signature"
            );
            return None;
        };

        match (signature.decode)(raw.data()) {
            Ok(event) => Some(DecodedLog {
                log: raw,
                name: signature.name,
                event,
                receipt: Arc::clone(receipt),
            }),
            Err(err) => {
                warn!(
                    txn_hash = %receipt.transaction_hash,
                    log_index = ?raw.log_index,
                    event = signature.name,
                    error = %err,
                    "Failed to decode log"
                );
                None
            }
        }
    }

    /// Decodes every log of `receipt` known to the registry, in log order.
    #[must_use]
    pub fn decode_receipt(&self, receipt: &Arc<TxnReceipt>) -> Vec<DecodedLog> {
        receipt.logs.iter().filter_map(|raw| self.decode(raw.clone(), receipt)).collect()
    }

    /// Groups logs per transaction.
    ///
    /// Each batch is sorted by log index. Batches are ordered by block number and then by their
    /// first log index, with missing values last; this is the order the rest of the pipeline
    /// processes transactions in.
    #[must_use]
    pub fn group_by_transaction(logs: impl IntoIterator<Item = DecodedLog>) -> Vec<TxnEventBatch> {
        let mut positions: HashMap<TxHash, usize> = HashMap::new();
        let mut batches: Vec<TxnEventBatch> = Vec::new();

        for log in logs {
            let txn = log.transaction_hash();
            let idx = *positions.entry(txn).or_insert_with(|| {
                batches.push(TxnEventBatch {
                    transaction_hash: txn,
                    block_number: log.block_number(),
                    logs: Vec::new(),
                });
                batches.len() - 1
            });
            batches[idx].logs.push(log);
        }

        for batch in &mut batches {
            batch.logs.sort_by_key(DecodedLog::log_index);
            batch.logs.dedup_by_key(|log| log.log_index());
        }
        batches.sort_by_key(TxnEventBatch::order_key);

        batches
    }
}
