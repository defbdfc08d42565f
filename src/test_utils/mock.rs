use std::collections::{BTreeMap, HashSet};

use alloy::{
    primitives::{Address, TxHash, U256},
    rpc::types::Filter,
    transports::{RpcError, TransportErrorKind},
};
use parking_lot::Mutex;

use crate::{
    log_source::{FilterId, LogSource},
    robust_provider::Error,
    types::{RawLog, TxnReceipt},
};

#[derive(Debug)]
struct InstalledFilter {
    filter: Filter,
    cursor: usize,
}

#[derive(Debug, Default)]
struct State {
    history: Vec<RawLog>,
    filters: BTreeMap<U256, InstalledFilter>,
    next_id: u64,
    create_attempts: usize,
    created: usize,
    removed: usize,
    receipt_requests: usize,
    failing_creates: usize,
    failing_polls: usize,
    failing_poll_for: Option<Address>,
    new_filters_at_head: bool,
    failing_receipts: HashSet<TxHash>,
}

/// A node held in memory.
///
/// Logs pushed with [`push_log`](Self::push_log) form the chain history. A new filter starts at the
/// beginning of the history, so its first poll returns every matching log already pushed, unless
/// [`start_new_filters_at_head`](Self::start_new_filters_at_head) was called.
/// Receipts are assembled from the history. Injected failures are transient (timeouts), except
/// receipt failures which report the receipt as missing.
#[derive(Debug, Default)]
pub struct MockLogSource {
    state: Mutex<State>,
}

impl MockLogSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().history.push(log);
    }

    pub fn push_logs(&self, logs: impl IntoIterator<Item = RawLog>) {
        self.state.lock().history.extend(logs);
    }

    /// Makes every installed filter return its whole history again on its next poll.
    pub fn resurface_all(&self) {
        for installed in self.state.lock().filters.values_mut() {
            installed.cursor = 0;
        }
    }

    pub fn fail_next_creates(&self, times: usize) {
        self.state.lock().failing_creates = times;
    }

    pub fn fail_next_polls(&self, times: usize) {
        self.state.lock().failing_polls = times;
    }

    /// Fails the next poll of a filter watching `address`.
    pub fn fail_next_poll_for(&self, address: Address) {
        self.state.lock().failing_poll_for = Some(address);
    }

    /// Makes filters installed from now on skip the logs already in the history, like a node
    /// filter created at `latest`.
    pub fn start_new_filters_at_head(&self) {
        self.state.lock().new_filters_at_head = true;
    }

    pub fn fail_receipt(&self, txn: TxHash) {
        self.state.lock().failing_receipts.insert(txn);
    }

    /// Filters successfully installed so far.
    #[must_use]
    pub fn created_filters(&self) -> usize {
        self.state.lock().created
    }

    /// Installation calls so far, failed ones included.
    #[must_use]
    pub fn create_attempts(&self) -> usize {
        self.state.lock().create_attempts
    }

    #[must_use]
    pub fn removed_filters(&self) -> usize {
        self.state.lock().removed
    }

    #[must_use]
    pub fn installed_filters(&self) -> usize {
        self.state.lock().filters.len()
    }

    #[must_use]
    pub fn receipt_requests(&self) -> usize {
        self.state.lock().receipt_requests
    }
}

fn unknown_filter(id: FilterId) -> Error {
    RpcError::<TransportErrorKind>::local_usage_str(&format!("filter {id} not found")).into()
}

fn matches(filter: &Filter, log: &RawLog) -> bool {
    if !filter.address.matches(&log.address()) {
        return false;
    }
    let topics = log.topics();
    let topics_match = filter.topics.iter().enumerate().all(|(position, wanted)| {
        wanted.is_empty() || topics.get(position).is_some_and(|topic| wanted.matches(topic))
    });
    if !topics_match {
        return false;
    }
    let block = log.block_number.unwrap_or_default();
    filter.get_from_block().is_none_or(|from| block >= from)
        && filter.get_to_block().is_none_or(|to| block <= to)
}

impl LogSource for MockLogSource {
    async fn create_filter(&self, filter: &Filter) -> Result<FilterId, Error> {
        let mut state = self.state.lock();
        state.create_attempts += 1;
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(Error::Timeout);
        }
        state.next_id += 1;
        state.created += 1;
        let id = U256::from(state.next_id);
        let cursor = if state.new_filters_at_head { state.history.len() } else { 0 };
        state.filters.insert(id, InstalledFilter { filter: filter.clone(), cursor });
        Ok(FilterId(id))
    }

    async fn poll_new(&self, id: FilterId) -> Result<Vec<RawLog>, Error> {
        let mut state = self.state.lock();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(Error::Timeout);
        }
        let State { history, filters, failing_poll_for, .. } = &mut *state;
        let installed = filters.get_mut(&id.0).ok_or_else(|| unknown_filter(id))?;
        if failing_poll_for.is_some_and(|address| installed.filter.address.matches(&address)) {
            *failing_poll_for = None;
            return Err(Error::Timeout);
        }
        let fresh = history[installed.cursor..]
            .iter()
            .filter(|log| matches(&installed.filter, log))
            .cloned()
            .collect();
        installed.cursor = history.len();
        Ok(fresh)
    }

    async fn poll_all(&self, id: FilterId) -> Result<Vec<RawLog>, Error> {
        let state = self.state.lock();
        let installed = state.filters.get(&id.0).ok_or_else(|| unknown_filter(id))?;
        Ok(state.history.iter().filter(|log| matches(&installed.filter, log)).cloned().collect())
    }

    async fn remove_filter(&self, id: FilterId) -> Result<bool, Error> {
        let mut state = self.state.lock();
        let removed = state.filters.remove(&id.0).is_some();
        if removed {
            state.removed += 1;
        }
        Ok(removed)
    }

    async fn receipt(&self, txn: TxHash) -> Result<TxnReceipt, Error> {
        let mut state = self.state.lock();
        state.receipt_requests += 1;
        if state.failing_receipts.contains(&txn) {
            return Err(Error::ReceiptNotFound(txn));
        }
        let mut logs: Vec<RawLog> = state
            .history
            .iter()
            .filter(|log| log.transaction_hash == Some(txn))
            .cloned()
            .collect();
        if logs.is_empty() {
            return Err(Error::ReceiptNotFound(txn));
        }
        logs.sort_by_key(|log| log.log_index);
        Ok(TxnReceipt {
            transaction_hash: txn,
            block_number: logs[0].block_number,
            from: alloy::primitives::Address::ZERO,
            to: None,
            status: true,
            logs,
        })
    }
}
