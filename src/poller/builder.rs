use std::{sync::Arc, time::Duration};

use alloy::{eips::BlockNumberOrTag, network::Ethereum, primitives::Address};
use tokio_util::sync::CancellationToken;

use crate::{
    EventPoller,
    decoder::LogDecoder,
    dedup::{DEFAULT_DEDUP_CAPACITY, TxnDeduper},
    error::PipelineError,
    events::EventGroup,
    filter_source::{DEFAULT_FILTER_CREATION_DELAY, DEFAULT_FILTER_CREATION_RETRIES, LogFilterSource},
    log_source::LogSource,
    registry::EventRegistry,
    robust_provider::{IntoRobustProvider, RetryPolicy, RobustProvider},
};

/// Default time between two polls of the log filters.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default number of execution contexts buffered before the poller waits for its consumer.
pub const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 128;

/// Builder for [`EventPoller`].
///
/// A poller watches one event set: the events of the configured [`EventGroup`]s (or of a shared
/// [`EventRegistry`]) emitted by the configured contracts.
///
/// # Example
///
/// ```no_run
/// # use event_alerts::{EventGroup, EventPollerBuilder};
/// # use alloy::primitives::address;
/// # use std::time::Duration;
/// # async fn example() -> anyhow::Result<()> {
/// let poller = EventPollerBuilder::new()
///     .group(EventGroup::Beanstalk)
///     .contract_address(address!("0xD1A0D188E861ed9d15773a2F3574a2e94134bA8f"))
///     .poll_interval(Duration::from_secs(10))
///     .connect_provider("http://localhost:8545")
///     .await?;
///
/// let mut handle = poller.start();
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct EventPollerBuilder {
    groups: Vec<EventGroup>,
    registry: Option<Arc<EventRegistry>>,
    addresses: Vec<Address>,
    poll_interval: Duration,
    dedup_capacity: usize,
    deduper: Option<TxnDeduper>,
    from_block: BlockNumberOrTag,
    to_block: BlockNumberOrTag,
    buffer_capacity: usize,
    filter_retry: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl Default for EventPollerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPollerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            registry: None,
            addresses: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            deduper: None,
            from_block: BlockNumberOrTag::Latest,
            to_block: BlockNumberOrTag::Latest,
            buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
            filter_retry: RetryPolicy::fixed(
                DEFAULT_FILTER_CREATION_RETRIES,
                DEFAULT_FILTER_CREATION_DELAY,
            ),
            cancel: None,
        }
    }

    /// Adds the events of `group` to the watched set.
    #[must_use]
    pub fn group(mut self, group: EventGroup) -> Self {
        self.groups.push(group);
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: impl IntoIterator<Item = EventGroup>) -> Self {
        self.groups.extend(groups);
        self
    }

    /// Uses an existing registry instead of building one from the configured groups, so that
    /// several pollers share it. Takes precedence over [`group`](Self::group).
    #[must_use]
    pub fn registry(mut self, registry: Arc<EventRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Watches logs emitted by `address`. Without any address, logs from every contract match.
    #[must_use]
    pub fn contract_address(mut self, address: Address) -> Self {
        self.addresses.push(address);
        self
    }

    #[must_use]
    pub fn contract_addresses(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.addresses.extend(addresses);
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of transactions remembered to avoid processing one twice.
    ///
    /// Ignored when a shared [`deduper`](Self::deduper) is set.
    #[must_use]
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Shares a dedup cache with other pollers.
    #[must_use]
    pub fn deduper(mut self, deduper: TxnDeduper) -> Self {
        self.deduper = Some(deduper);
        self
    }

    /// Block range of the long-lived filters. Defaults to `latest`..`latest`, i.e. new blocks
    /// only.
    #[must_use]
    pub fn block_range(
        mut self,
        from: impl Into<BlockNumberOrTag>,
        to: impl Into<BlockNumberOrTag>,
    ) -> Self {
        self.from_block = from.into();
        self.to_block = to.into();
        self
    }

    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Retry policy for installing filters. Only transient errors are retried.
    #[must_use]
    pub fn filter_retry(mut self, policy: RetryPolicy) -> Self {
        self.filter_retry = policy;
        self
    }

    /// Token that stops the poller. Defaults to a fresh token owned by the poller.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Builds a poller over `source`.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::NoEventGroups`] if neither groups nor a non-empty registry were given.
    /// * [`PipelineError::Registry`] if the groups define conflicting events.
    /// * [`PipelineError::InvalidPollInterval`], [`PipelineError::InvalidBufferCapacity`] or
    ///   [`PipelineError::InvalidDedupCapacity`] for zero settings.
    pub fn connect<S: LogSource>(self, source: S) -> Result<EventPoller<S>, PipelineError> {
        self.connect_shared(Arc::new(source))
    }

    /// Same as [`connect`](Self::connect) for a source shared with other pollers.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub fn connect_shared<S: LogSource>(
        self,
        source: Arc<S>,
    ) -> Result<EventPoller<S>, PipelineError> {
        if self.poll_interval.is_zero() {
            return Err(PipelineError::InvalidPollInterval);
        }
        if self.buffer_capacity == 0 {
            return Err(PipelineError::InvalidBufferCapacity);
        }

        let registry = match self.registry {
            Some(registry) => registry,
            None if self.groups.is_empty() => return Err(PipelineError::NoEventGroups),
            None => EventRegistry::for_groups(&self.groups)?,
        };
        if registry.is_empty() {
            return Err(PipelineError::NoEventGroups);
        }

        let dedup = match self.deduper {
            Some(deduper) => deduper,
            None => TxnDeduper::new(self.dedup_capacity)?,
        };

        let cancel = self.cancel.unwrap_or_default();
        let filters = LogFilterSource::new(source, self.addresses, registry.topics().to_vec())
            .with_block_range(self.from_block, self.to_block)
            .with_retry_policy(self.filter_retry)
            .with_cancellation_token(cancel.clone());

        info!(
            groups = ?registry.groups(),
            events = registry.len(),
            poll_interval_ms = self.poll_interval.as_millis(),
            "Event poller configured"
        );

        Ok(EventPoller {
            filters,
            decoder: LogDecoder::new(registry),
            dedup,
            poll_interval: self.poll_interval,
            buffer_capacity: self.buffer_capacity,
            cancel,
        })
    }

    /// Connects to a node through a [`RobustProvider`] built with default settings. Pass a
    /// configured [`RobustProvider`] to [`connect`](Self::connect) instead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Provider`] if the provider cannot be built, otherwise see
    /// [`connect`](Self::connect).
    pub async fn connect_provider(
        self,
        provider: impl IntoRobustProvider<Ethereum>,
    ) -> Result<EventPoller<RobustProvider<Ethereum>>, PipelineError> {
        let provider = provider.into_robust_provider().await?;
        self.connect(provider)
    }
}
