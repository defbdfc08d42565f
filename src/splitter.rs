//! Partitioning of a transaction's logs into execution contexts.
//!
//! A Tractor blueprint execution is delimited by a `TractorExecutionBegan` log and a `Tractor` log
//! carrying the same blueprint hash and nonce. Every log between the two, markers included, belongs
//! to that execution. Whatever no execution claims forms the outer context of the transaction.

use std::sync::Arc;

use crate::{
    error::PipelineError,
    events::{Marker, MarkerSide},
    types::{ContextKind, DecodedLog, ExecutionContext, TxnEventBatch},
};

struct Pair {
    begin: Marker,
    start: u64,
    end: u64,
}

/// Splits `batch` into its marked contexts, in the order their begin markers appear, followed by
/// the outer context when it is not empty.
///
/// A batch without markers yields a single outer context holding every log.
///
/// # Errors
///
/// * [`PipelineError::UnmatchedMarker`] if a begin marker has no later end marker with the same
///   key, or an end marker is left without a begin.
/// * [`PipelineError::OverlappingContexts`] if two marked ranges share a log.
pub fn split(batch: TxnEventBatch) -> Result<Vec<ExecutionContext>, PipelineError> {
    let Some(receipt) = batch.logs.first().map(|log| Arc::clone(&log.receipt)) else {
        return Ok(Vec::new());
    };
    let txn_hash = batch.transaction_hash;

    let markers: Vec<(u64, Marker)> = batch
        .logs
        .iter()
        .filter_map(|log| log.event.marker().map(|marker| (log.log_index(), marker)))
        .collect();

    let mut claimed = vec![false; markers.len()];
    let mut pairs = Vec::new();
    for (i, (start, begin)) in markers.iter().enumerate() {
        if begin.side != MarkerSide::Begin {
            continue;
        }
        let end = markers.iter().enumerate().skip(i + 1).find(|(j, (index, marker))| {
            !claimed[*j]
                && marker.side == MarkerSide::End
                && marker.key == begin.key
                && index >= start
        });
        let Some((j, (end, _))) = end else {
            return Err(PipelineError::UnmatchedMarker {
                txn_hash,
                side: MarkerSide::Begin,
                key: begin.key,
                log_index: *start,
            });
        };
        claimed[j] = true;
        pairs.push(Pair { begin: *begin, start: *start, end: *end });
    }

    if let Some((index, marker)) = markers
        .iter()
        .zip(&claimed)
        .find(|((_, marker), claimed)| marker.side == MarkerSide::End && !**claimed)
        .map(|(marker, _)| marker)
    {
        return Err(PipelineError::UnmatchedMarker {
            txn_hash,
            side: MarkerSide::End,
            key: marker.key,
            log_index: *index,
        });
    }

    let mut ranges: Vec<(u64, u64)> = pairs.iter().map(|pair| (pair.start, pair.end)).collect();
    ranges.sort_unstable();
    if let Some(window) = ranges.windows(2).find(|w| w[1].0 <= w[0].1) {
        return Err(PipelineError::OverlappingContexts { txn_hash, log_index: window[1].0 });
    }

    let mut contexts = Vec::with_capacity(pairs.len() + 1);
    for pair in &pairs {
        let logs: Vec<DecodedLog> = batch
            .logs
            .iter()
            .filter(|log| (pair.start..=pair.end).contains(&log.log_index()))
            .cloned()
            .collect();
        contexts.push(ExecutionContext {
            transaction_hash: txn_hash,
            block_number: batch.block_number,
            kind: ContextKind::Marked {
                key: pair.begin.key,
                operator: pair.begin.operator,
                publisher: pair.begin.publisher,
                range: pair.start..=pair.end,
            },
            logs,
            receipt: Arc::clone(&receipt),
        });
    }

    let outer: Vec<DecodedLog> = batch
        .logs
        .into_iter()
        .filter(|log| !pairs.iter().any(|pair| (pair.start..=pair.end).contains(&log.log_index())))
        .collect();
    if !outer.is_empty() {
        contexts.push(ExecutionContext {
            transaction_hash: txn_hash,
            block_number: batch.block_number,
            kind: ContextKind::Outer,
            logs: outer,
            receipt,
        });
    }

    trace!(txn_hash = %txn_hash, contexts = contexts.len(), "Split transaction into contexts");

    Ok(contexts)
}

/// The context that owns the log at `index`, if any.
#[must_use]
pub fn context_for_log_index(
    contexts: &[ExecutionContext],
    index: u64,
) -> Option<&ExecutionContext> {
    contexts.iter().find(|context| context.contains_log_index(index))
}
