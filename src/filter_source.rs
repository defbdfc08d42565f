use std::{sync::Arc, time::Duration};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, TxHash},
    rpc::types::Filter,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::PipelineError,
    log_source::{FilterId, LogSource},
    robust_provider::{Error, RetryPolicy},
    types::{RawLog, TxnReceipt},
};

/// Default number of retries when installing a filter over a flaky connection.
pub const DEFAULT_FILTER_CREATION_RETRIES: usize = 14;
/// Default delay between two filter installation attempts.
pub const DEFAULT_FILTER_CREATION_DELAY: Duration = Duration::from_secs(2);

/// A filter installed on the node for one watched address (or for any address).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FilterHandle {
    pub id: FilterId,
    pub address: Option<Address>,
}

/// Log filters for one event set: one handle per watched contract, all sharing the same topic0
/// list.
///
/// Handles are installed lazily on the first poll and replaced wholesale by [`reset`](Self::reset);
/// a handle that failed once is never polled again. Logs already pulled from the other handles
/// of a failed poll are kept and returned by the next successful one.
#[derive(Debug)]
pub struct LogFilterSource<S> {
    source: Arc<S>,
    addresses: Vec<Address>,
    topics: Vec<B256>,
    from_block: BlockNumberOrTag,
    to_block: BlockNumberOrTag,
    retry: RetryPolicy,
    handles: Option<Vec<FilterHandle>>,
    pending: Vec<RawLog>,
    cancel: CancellationToken,
}

impl<S: LogSource> LogFilterSource<S> {
    #[must_use]
    pub fn new(source: Arc<S>, addresses: Vec<Address>, topics: Vec<B256>) -> Self {
        Self {
            source,
            addresses,
            topics,
            from_block: BlockNumberOrTag::Latest,
            to_block: BlockNumberOrTag::Latest,
            retry: RetryPolicy::fixed(DEFAULT_FILTER_CREATION_RETRIES, DEFAULT_FILTER_CREATION_DELAY),
            handles: None,
            pending: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_block_range(mut self, from: BlockNumberOrTag, to: BlockNumberOrTag) -> Self {
        self.from_block = from;
        self.to_block = to;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Aborts filter installation retries once `cancel` fires.
    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    #[must_use]
    pub fn topics(&self) -> &[B256] {
        &self.topics
    }

    /// Currently installed handles, if any.
    #[must_use]
    pub fn handles(&self) -> Option<&[FilterHandle]> {
        self.handles.as_deref()
    }

    /// Installs one filter, retrying transient failures according to the retry policy.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::FilterCreation`] once every attempt failed with a transient error.
    /// * [`PipelineError::Provider`] on the first non-transient error.
    /// * [`PipelineError::Cancelled`] if the cancellation token fired first.
    pub async fn create_filter(
        &self,
        address: Option<Address>,
        from: BlockNumberOrTag,
        to: BlockNumberOrTag,
    ) -> Result<FilterHandle, PipelineError> {
        let filter = self.event_filter(from, to);
        self.install(&filter, address).await
    }

    fn event_filter(&self, from: BlockNumberOrTag, to: BlockNumberOrTag) -> Filter {
        Filter::new().event_signature(self.topics.clone()).from_block(from).to_block(to)
    }

    async fn install(
        &self,
        filter: &Filter,
        address: Option<Address>,
    ) -> Result<FilterHandle, PipelineError> {
        let filter = match address {
            Some(address) => filter.clone().address(address),
            None => filter.clone(),
        };
        let source = &self.source;
        let result = self
            .retry
            .retry_until_cancelled(|| source.create_filter(&filter), Error::is_transient, &self.cancel)
            .await;

        match result {
            None => {
                debug!(address = ?address, "Log filter creation cancelled");
                Err(PipelineError::Cancelled)
            }
            Some(Ok(id)) => {
                debug!(filter_id = %id, address = ?address, "Installed log filter");
                Ok(FilterHandle { id, address })
            }
            Some(Err(err)) if err.is_transient() => {
                error!(error = %err, address = ?address, "Giving up on log filter creation");
                Err(PipelineError::FilterCreation { attempts: self.retry.max_attempts(), source: err })
            }
            Some(Err(err)) => Err(err.into()),
        }
    }

    /// Installs `filter` once per watched address, or once without an address when none are set.
    async fn install_all(&self, filter: &Filter) -> Result<Vec<FilterHandle>, PipelineError> {
        let targets: Vec<Option<Address>> = if self.addresses.is_empty() {
            vec![None]
        } else {
            self.addresses.iter().copied().map(Some).collect()
        };

        let mut handles = Vec::with_capacity(targets.len());
        for address in targets {
            match self.install(filter, address).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.uninstall(&handles).await;
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    async fn uninstall(&self, handles: &[FilterHandle]) {
        for handle in handles {
            if let Err(err) = self.source.remove_filter(handle.id).await {
                debug!(filter_id = %handle.id, error = %err, "Could not uninstall log filter");
            }
        }
    }

    /// Logs that matched any handle since the previous poll, installing handles first if needed.
    ///
    /// # Errors
    ///
    /// Returns the first installation or polling error. The caller is expected to
    /// [`reset`](Self::reset) before polling again. Logs already pulled from other handles are
    /// held back until the next successful poll.
    pub async fn poll_new_entries(&mut self) -> Result<Vec<RawLog>, PipelineError> {
        if self.handles.is_none() {
            let filter = self.event_filter(self.from_block, self.to_block);
            self.handles = Some(self.install_all(&filter).await?);
        }

        for handle in self.handles.iter().flatten() {
            let logs = match self.source.poll_new(handle.id).await {
                Ok(logs) => logs,
                Err(err) => {
                    if !self.pending.is_empty() {
                        debug!(held = self.pending.len(), "Holding logs of the other filters");
                    }
                    return Err(err.into());
                }
            };
            trace!(filter_id = %handle.id, count = logs.len(), "Polled filter changes");
            self.pending.extend(logs);
        }
        Ok(std::mem::take(&mut self.pending))
    }

    /// Every matching log in `[from, to]`, through temporary filters that are removed afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first installation or polling error.
    pub async fn poll_all_entries(
        &self,
        from: BlockNumberOrTag,
        to: BlockNumberOrTag,
    ) -> Result<Vec<RawLog>, PipelineError> {
        let handles = self.install_all(&self.event_filter(from, to)).await?;
        let result = self.read_all(&handles).await;
        self.uninstall(&handles).await;
        result
    }

    /// Every log of the event `topic0` whose indexed arguments match `indexed_topics`, from genesis
    /// to the latest block. Only the first three indexed topics are used.
    ///
    /// # Errors
    ///
    /// Returns the first installation or polling error.
    pub async fn logs_with_topics(
        &self,
        topic0: B256,
        indexed_topics: &[B256],
    ) -> Result<Vec<RawLog>, PipelineError> {
        let mut filter = Filter::new()
            .event_signature(topic0)
            .from_block(BlockNumberOrTag::Earliest)
            .to_block(BlockNumberOrTag::Latest);
        for (position, topic) in indexed_topics.iter().take(3).enumerate() {
            filter = match position {
                0 => filter.topic1(*topic),
                1 => filter.topic2(*topic),
                _ => filter.topic3(*topic),
            };
        }

        let handles = self.install_all(&filter).await?;
        let result = self.read_all(&handles).await;
        self.uninstall(&handles).await;
        result
    }

    async fn read_all(&self, handles: &[FilterHandle]) -> Result<Vec<RawLog>, PipelineError> {
        let mut entries = Vec::new();
        for handle in handles {
            entries.extend(self.source.poll_all(handle.id).await?);
        }
        Ok(entries)
    }

    /// Drops every handle and installs fresh ones.
    ///
    /// The old handles are uninstalled on a best-effort basis. If installation fails the source is
    /// left without handles and the next [`poll_new_entries`](Self::poll_new_entries) tries again.
    ///
    /// # Errors
    ///
    /// Returns the installation error.
    pub async fn reset(&mut self) -> Result<(), PipelineError> {
        if let Some(stale) = self.handles.take() {
            self.uninstall(&stale).await;
        }
        let filter = self.event_filter(self.from_block, self.to_block);
        let handles = self.install_all(&filter).await?;
        info!(filters = handles.len(), "Log filters recreated");
        self.handles = Some(handles);
        Ok(())
    }

    /// Receipt of `txn`.
    ///
    /// # Errors
    ///
    /// Returns the provider error once its retries are exhausted.
    pub async fn receipt(&self, txn: TxHash) -> Result<TxnReceipt, PipelineError> {
        Ok(self.source.receipt(txn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::erc20,
        test_utils::{MockLogSource, raw_log},
    };
    use alloy::primitives::{U256, address};

    const WELL: Address = address!("0x000000000000000000000000000000000000000a");
    const SILO: Address = address!("0x000000000000000000000000000000000000000b");

    fn transfer() -> erc20::Transfer {
        erc20::Transfer {
            from: Address::with_last_byte(1),
            to: Address::with_last_byte(2),
            value: U256::from(5),
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::fixed(2, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn installs_one_handle_per_address() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let mut source = LogFilterSource::new(mock.clone(), vec![WELL, SILO], vec![B256::ZERO]);

        source.poll_new_entries().await?;

        let handles = source.handles().unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].address, Some(WELL));
        assert_eq!(handles[1].address, Some(SILO));
        assert_eq!(mock.created_filters(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn no_addresses_means_one_open_handle() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let mut source = LogFilterSource::new(mock.clone(), vec![], vec![B256::ZERO]);

        source.poll_new_entries().await?;

        let handles = source.handles().unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].address, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_creation_failures_are_retried() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        mock.fail_next_creates(2);
        let mut source = LogFilterSource::new(mock.clone(), vec![WELL], vec![B256::ZERO])
            .with_retry_policy(quick_retry());

        source.poll_new_entries().await?;

        assert_eq!(mock.create_attempts(), 3);
        assert_eq!(mock.created_filters(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_creation_retries_fail_with_filter_creation() {
        let mock = Arc::new(MockLogSource::new());
        mock.fail_next_creates(10);
        let mut source = LogFilterSource::new(mock.clone(), vec![WELL], vec![B256::ZERO])
            .with_retry_policy(quick_retry());

        let err = source.poll_new_entries().await.unwrap_err();

        assert!(matches!(err, PipelineError::FilterCreation { attempts: 3, .. }));
        assert!(source.handles().is_none());
    }

    #[tokio::test]
    async fn reset_replaces_every_handle() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let mut source = LogFilterSource::new(mock.clone(), vec![WELL, SILO], vec![B256::ZERO]);
        source.poll_new_entries().await?;
        let before: Vec<FilterId> = source.handles().unwrap().iter().map(|h| h.id).collect();

        source.reset().await?;

        let after: Vec<FilterId> = source.handles().unwrap().iter().map(|h| h.id).collect();
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|id| !before.contains(id)));
        assert_eq!(mock.removed_filters(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn poll_all_entries_cleans_up_temporary_handles() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let source = LogFilterSource::new(mock.clone(), vec![WELL], vec![B256::ZERO]);

        source.poll_all_entries(BlockNumberOrTag::Number(10), BlockNumberOrTag::Number(20)).await?;

        assert_eq!(mock.created_filters(), 1);
        assert_eq!(mock.removed_filters(), 1);
        assert!(source.handles().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn logs_of_healthy_filters_survive_a_failed_poll() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        mock.start_new_filters_at_head();
        let mut source = LogFilterSource::new(mock.clone(), vec![WELL, SILO], vec![]);
        source.poll_new_entries().await?;
        mock.push_log(raw_log(&transfer(), WELL, B256::with_last_byte(1), 10, 0));
        mock.fail_next_poll_for(SILO);

        assert!(source.poll_new_entries().await.is_err());
        source.reset().await?;
        let entries = source.poll_new_entries().await?;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address(), WELL);
        assert!(source.poll_new_entries().await?.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_creation_retries() {
        let mock = Arc::new(MockLogSource::new());
        mock.fail_next_creates(usize::MAX);
        let cancel = CancellationToken::new();
        let mut source = LogFilterSource::new(mock.clone(), vec![WELL], vec![B256::ZERO])
            .with_cancellation_token(cancel.clone());
        cancel.cancel();

        let err = source.poll_new_entries().await.unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(mock.create_attempts(), 0);
    }
}
