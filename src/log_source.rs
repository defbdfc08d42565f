use std::fmt;

use alloy::{
    network::Ethereum,
    primitives::{TxHash, U256},
    rpc::types::Filter,
};

use crate::{
    robust_provider::{Error, RobustProvider},
    types::{RawLog, TxnReceipt},
};

/// Identifier of a log filter installed on a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(pub U256);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The node capability the pipeline consumes: installable log filters and transaction receipts.
///
/// Implementations do their own timeouts and per-call retries; callers decide what to do with the
/// error once those are exhausted, using [`Error::is_transient`] to tell a dropped connection from
/// an answer the node will keep giving.
pub trait LogSource: Send + Sync + 'static {
    /// Installs `filter` and returns its id.
    fn create_filter(
        &self,
        filter: &Filter,
    ) -> impl Future<Output = Result<FilterId, Error>> + Send;

    /// Logs that matched `id` since the previous call. Entries may occasionally resurface.
    fn poll_new(&self, id: FilterId) -> impl Future<Output = Result<Vec<RawLog>, Error>> + Send;

    /// Every log matching `id` over its whole block range.
    fn poll_all(&self, id: FilterId) -> impl Future<Output = Result<Vec<RawLog>, Error>> + Send;

    /// Removes `id` from the node. Returns `false` if the node did not know it.
    fn remove_filter(&self, id: FilterId) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Receipt of a mined transaction.
    fn receipt(&self, txn: TxHash) -> impl Future<Output = Result<TxnReceipt, Error>> + Send;
}

impl LogSource for RobustProvider<Ethereum> {
    async fn create_filter(&self, filter: &Filter) -> Result<FilterId, Error> {
        self.new_filter(filter).await.map(FilterId)
    }

    async fn poll_new(&self, id: FilterId) -> Result<Vec<RawLog>, Error> {
        self.get_filter_changes(id.0).await
    }

    async fn poll_all(&self, id: FilterId) -> Result<Vec<RawLog>, Error> {
        self.get_filter_logs(id.0).await
    }

    async fn remove_filter(&self, id: FilterId) -> Result<bool, Error> {
        self.uninstall_filter(id.0).await
    }

    async fn receipt(&self, txn: TxHash) -> Result<TxnReceipt, Error> {
        let receipt = self.get_transaction_receipt(txn).await?;
        Ok(TxnReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            from: receipt.from,
            to: receipt.to,
            status: receipt.inner.status(),
            logs: receipt.inner.logs().to_vec(),
        })
    }
}
