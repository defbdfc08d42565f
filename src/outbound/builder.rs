use std::{collections::HashMap, time::Duration};

use crate::{
    error::PipelineError,
    outbound::{ChannelConfig, ChannelId, OutboundQueue},
};

/// Default time between two dispatcher ticks.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(400);
/// Default payload limit, kept below the 2000 characters Discord accepts.
pub const DEFAULT_MAX_PAYLOAD: usize = 1950;

/// Builder for [`OutboundQueue`].
#[derive(Clone, Debug)]
pub struct OutboundQueueBuilder {
    dispatch_interval: Duration,
    default_channel: ChannelConfig,
    channels: HashMap<ChannelId, ChannelConfig>,
}

impl Default for OutboundQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundQueueBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            default_channel: ChannelConfig::default(),
            channels: HashMap::new(),
        }
    }

    /// Time between two passes of the dispatcher over the queues.
    #[must_use]
    pub fn dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Limits applied to every channel without its own configuration.
    #[must_use]
    pub fn default_channel(mut self, config: ChannelConfig) -> Self {
        self.default_channel = config;
        self
    }

    /// Limits for one channel.
    #[must_use]
    pub fn channel(mut self, channel: impl Into<ChannelId>, config: ChannelConfig) -> Self {
        self.channels.insert(channel.into(), config);
        self
    }

    /// # Errors
    ///
    /// * [`PipelineError::InvalidDispatchInterval`] if the dispatch interval is zero.
    /// * [`PipelineError::InvalidPayloadLimit`] if any channel has a zero payload limit.
    pub fn build(self) -> Result<OutboundQueue, PipelineError> {
        if self.dispatch_interval.is_zero() {
            return Err(PipelineError::InvalidDispatchInterval);
        }
        if self.default_channel.max_payload == 0
            || self.channels.values().any(|config| config.max_payload == 0)
        {
            return Err(PipelineError::InvalidPayloadLimit);
        }
        Ok(OutboundQueue::new(self.dispatch_interval, self.default_channel, self.channels))
    }
}
