//! The polling loop of one watched event set.
//!
//! ```text
//! Idle -> WaitingInterval -> Polling -> Processing -> WaitingInterval -> ...
//!                                 \-> (poll error: recreate filters) -> WaitingInterval
//! ```
//!
//! Any state moves to `Stopped` once the cancellation token fires or the context stream is dropped.
//! The first poll happens right after start; later polls are spaced `poll_interval` apart, measured
//! from the start of the previous poll.

use std::{collections::HashSet, sync::Arc, time::Duration};

use alloy::{eips::BlockNumberOrTag, primitives::B256};
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, sleep_until},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::LogDecoder,
    dedup::TxnDeduper,
    error::PipelineError,
    filter_source::LogFilterSource,
    log_source::LogSource,
    registry::EventRegistry,
    splitter,
    types::{ExecutionContext, PollerState, RawLog, TryStream},
};

mod builder;
mod handle;

pub use builder::{DEFAULT_POLL_INTERVAL, DEFAULT_STREAM_BUFFER_CAPACITY, EventPollerBuilder};
pub use handle::{PollerControl, PollerHandle, PollerStatus};

/// Polls the log filters of one event set and turns new transactions into ordered
/// [`ExecutionContext`]s.
///
/// Built with [`EventPollerBuilder`]. [`poll_once`](Self::poll_once) and
/// [`backfill`](Self::backfill) run a single cycle in the caller's task;
/// [`start`](Self::start) moves the poller into its own task.
#[derive(Debug)]
pub struct EventPoller<S: LogSource> {
    pub(crate) filters: LogFilterSource<S>,
    pub(crate) decoder: LogDecoder,
    pub(crate) dedup: TxnDeduper,
    pub(crate) poll_interval: Duration,
    pub(crate) buffer_capacity: usize,
    pub(crate) cancel: CancellationToken,
}

impl<S: LogSource> EventPoller<S> {
    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        self.decoder.registry()
    }

    #[must_use]
    pub fn deduper(&self) -> &TxnDeduper {
        &self.dedup
    }

    #[must_use]
    pub fn filters(&self) -> &LogFilterSource<S> {
        &self.filters
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Polls every filter once and processes the new transactions.
    ///
    /// Transactions already seen by the dedup cache are skipped. A transaction whose receipt
    /// cannot be fetched, or whose markers do not pair up, is logged and skipped. Once the
    /// cancellation token fires no further receipts are fetched.
    ///
    /// # Errors
    ///
    /// Returns the filter installation or polling error; the filters should then be recreated
    /// with [`reset_filters`](Self::reset_filters).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn poll_once(&mut self) -> Result<Vec<ExecutionContext>, PipelineError> {
        let entries = self.filters.poll_new_entries().await?;
        Ok(self.process(entries, true).await)
    }

    /// Processes every matching log in `[from, to]` without consulting or updating the dedup
    /// cache. Intended for bounded catch-up and dry runs.
    ///
    /// # Errors
    ///
    /// Returns the filter installation or polling error.
    pub async fn backfill(
        &self,
        from: impl Into<BlockNumberOrTag>,
        to: impl Into<BlockNumberOrTag>,
    ) -> Result<Vec<ExecutionContext>, PipelineError> {
        let entries = self.filters.poll_all_entries(from.into(), to.into()).await?;
        Ok(self.process(entries, false).await)
    }

    /// Every log of `event_name` over the whole chain whose indexed arguments equal
    /// `indexed_topics`, in order. An event the registry does not know yields no logs.
    ///
    /// # Errors
    ///
    /// Returns the filter installation or polling error.
    pub async fn logs_with_topics(
        &self,
        event_name: &str,
        indexed_topics: &[B256],
    ) -> Result<Vec<RawLog>, PipelineError> {
        let Some(topic0) = self.registry().hash_of(event_name) else {
            warn!(event = event_name, "Event is not part of this poller's registry");
            return Ok(Vec::new());
        };
        self.filters.logs_with_topics(topic0, indexed_topics).await
    }

    /// Drops the current filters and installs new ones.
    ///
    /// # Errors
    ///
    /// Returns the installation error; the next poll installs filters again.
    pub async fn reset_filters(&mut self) -> Result<(), PipelineError> {
        self.filters.reset().await
    }

    async fn process(&self, entries: Vec<RawLog>, dedup: bool) -> Vec<ExecutionContext> {
        let registry = self.decoder.registry();

        let mut cycle = HashSet::new();
        let mut txns = Vec::new();
        for entry in &entries {
            if !entry.topic0().is_some_and(|topic| registry.contains(topic)) {
                warn!(
                    topic0 = ?entry.topic0(),
                    txn_hash = ?entry.transaction_hash,
                    "Log does not match the watched events, skipping"
                );
                continue;
            }
            let Some(txn) = entry.transaction_hash else {
                debug!(log_index = ?entry.log_index, "Skipping log without transaction hash");
                continue;
            };
            if cycle.insert(txn) {
                txns.push(txn);
            }
        }

        let mut decoded = Vec::new();
        for txn in txns {
            if self.cancel.is_cancelled() {
                debug!("Cancelled while fetching receipts");
                break;
            }
            if dedup && !self.dedup.should_process(txn) {
                trace!(txn_hash = %txn, "Transaction already processed, skipping");
                continue;
            }
            match self.filters.receipt(txn).await {
                Ok(receipt) => decoded.extend(self.decoder.decode_receipt(&Arc::new(receipt))),
                Err(err) => {
                    error!(txn_hash = %txn, error = %err, "Failed to fetch receipt, skipping transaction");
                }
            }
        }

        let mut contexts = Vec::new();
        for batch in LogDecoder::group_by_transaction(decoded) {
            let txn_hash = batch.transaction_hash;
            match splitter::split(batch) {
                Ok(split) => contexts.extend(split),
                Err(err) => {
                    error!(txn_hash = %txn_hash, error = %err, "Failed to split transaction, skipping");
                }
            }
        }

        debug!(entries = entries.len(), contexts = contexts.len(), "Processed poll results");

        contexts
    }

    /// Moves the poller into its own task.
    ///
    /// The returned handle carries the context stream and the poller's controls. The poller stops
    /// when its cancellation token fires or when the stream is dropped.
    #[must_use]
    pub fn start(self) -> PollerHandle {
        let (sender, receiver) = mpsc::channel(self.buffer_capacity);
        let (status_tx, status_rx) = watch::channel(PollerStatus::default());
        let cancel = self.cancel.clone();

        let join = tokio::spawn(self.run(sender, status_tx));

        PollerHandle::new(
            ReceiverStream::new(receiver),
            PollerControl { status: status_rx, cancel, join },
        )
    }

    async fn run(
        mut self,
        sender: mpsc::Sender<ExecutionContext>,
        status: watch::Sender<PollerStatus>,
    ) {
        let cancel = self.cancel.clone();
        let set_state = |state: PollerState| {
            status.send_if_modified(|current| {
                let changed = current.state != state;
                current.state = state;
                changed
            });
        };

        info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            events = self.registry().len(),
            "Event poller started"
        );

        let mut next_poll = Instant::now();
        'cycles: loop {
            set_state(PollerState::WaitingInterval);
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep_until(next_poll) => {}
            }
            if sender.is_closed() {
                debug!("Context stream dropped");
                break;
            }

            next_poll = Instant::now() + self.poll_interval;
            set_state(PollerState::Polling);
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                polled = self.filters.poll_new_entries() => polled,
            };
            let entries = match polled {
                Ok(entries) => entries,
                Err(PipelineError::Cancelled) => break,
                Err(err) => {
                    error!(error = %err, "Polling failed, recreating log filters");
                    let reset = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        reset = self.filters.reset() => reset,
                    };
                    if let Err(err) = reset {
                        error!(error = %err, "Could not recreate log filters, will retry next cycle");
                    }
                    continue;
                }
            };
            status.send_modify(|current| {
                current.last_poll = Some(Instant::now());
                current.cycles += 1;
            });

            set_state(PollerState::Processing);
            let contexts = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                contexts = self.process(entries, true) => contexts,
            };
            for context in contexts {
                trace!(
                    txn_hash = %context.transaction_hash,
                    kind = ?context.kind,
                    logs = context.logs.len(),
                    "Emitting execution context"
                );
                let delivered = tokio::select! {
                    biased;
                    () = cancel.cancelled() => false,
                    delivered = sender.try_stream(context) => delivered,
                };
                if !delivered {
                    break 'cycles;
                }
            }
        }

        set_state(PollerState::Stopped);
        info!("Event poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EventPollerBuilder,
        events::{EventGroup, beanstalk},
        test_utils::{MockLogSource, raw_log},
    };
    use alloy::primitives::{Address, U256, address};

    const DIAMOND: Address = address!("0x00000000000000000000000000000000000000be");

    fn sow(n: u64) -> beanstalk::Sow {
        beanstalk::Sow {
            account: Address::with_last_byte(1),
            fieldId: U256::ZERO,
            index: U256::from(n),
            beans: U256::from(n),
            pods: U256::from(n),
        }
    }

    fn poller(mock: &Arc<MockLogSource>) -> EventPoller<MockLogSource> {
        EventPollerBuilder::new()
            .group(EventGroup::Beanstalk)
            .contract_address(DIAMOND)
            .connect_shared(mock.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn transaction_is_processed_once_across_cycles() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let mut poller = poller(&mock);
        let txn = B256::with_last_byte(0xaa);
        mock.push_log(raw_log(&sow(1), DIAMOND, txn, 10, 0));

        let first = poller.poll_once().await?;
        // the node resurfaces the same entry
        mock.resurface_all();
        let second = poller.poll_once().await?;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(mock.receipt_requests(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn several_logs_of_one_transaction_fetch_one_receipt() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let mut poller = poller(&mock);
        let txn = B256::with_last_byte(0xaa);
        mock.push_log(raw_log(&sow(1), DIAMOND, txn, 10, 0));
        mock.push_log(raw_log(&sow(2), DIAMOND, txn, 10, 1));

        let contexts = poller.poll_once().await?;

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].log_indices(), vec![0, 1]);
        assert_eq!(mock.receipt_requests(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn receipt_failure_skips_only_that_transaction() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let mut poller = poller(&mock);
        let broken = B256::with_last_byte(0x01);
        let fine = B256::with_last_byte(0x02);
        mock.push_log(raw_log(&sow(1), DIAMOND, broken, 10, 0));
        mock.push_log(raw_log(&sow(2), DIAMOND, fine, 10, 1));
        mock.fail_receipt(broken);

        let contexts = poller.poll_once().await?;

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].transaction_hash, fine);
        Ok(())
    }

    #[tokio::test]
    async fn backfill_ignores_the_dedup_cache() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let mut poller = poller(&mock);
        let txn = B256::with_last_byte(0xaa);
        mock.push_log(raw_log(&sow(1), DIAMOND, txn, 10, 0));
        poller.poll_once().await?;

        let contexts = poller.backfill(0u64, 20u64).await?;
        let outside = poller.backfill(11u64, 20u64).await?;

        assert_eq!(contexts.len(), 1);
        assert!(outside.is_empty());
        assert_eq!(poller.deduper().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn logs_with_topics_resolves_event_names() -> anyhow::Result<()> {
        let mock = Arc::new(MockLogSource::new());
        let poller = poller(&mock);
        let account = Address::with_last_byte(1);
        mock.push_log(raw_log(&sow(1), DIAMOND, B256::with_last_byte(1), 10, 0));
        mock.push_log(raw_log(&sow(2), DIAMOND, B256::with_last_byte(2), 11, 0));

        let sows = poller.logs_with_topics("Sow", &[account.into_word()]).await?;
        let others = poller.logs_with_topics("Sow", &[Address::ZERO.into_word()]).await?;
        let unknown = poller.logs_with_topics("Swap", &[]).await?;

        assert_eq!(sows.len(), 2);
        assert!(others.is_empty());
        assert!(unknown.is_empty());
        Ok(())
    }
}
