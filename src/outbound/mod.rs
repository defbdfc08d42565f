//! Per-channel delivery of alert messages.
//!
//! [`OutboundQueue`] keeps one FIFO queue per destination channel. A dispatcher task drains them on
//! a short fixed interval, batching consecutive messages up to the channel's payload limit and
//! handing them to a [`ChannelSink`]. Messages leave the queue only once the sink confirms them; a
//! message that keeps failing is moved behind everything queued after it, so it can never block
//! its channel.

use std::{fmt, time::Duration};

mod builder;
mod queue;
mod sink;

pub use builder::{DEFAULT_DISPATCH_INTERVAL, DEFAULT_MAX_PAYLOAD, OutboundQueueBuilder};
pub use queue::{DispatchReport, OutboundQueue};
pub use sink::{ChannelSink, SendError};

/// Name of a destination channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ChannelId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A message produced by an [`AlertFormatter`](crate::AlertFormatter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: ChannelId,
    pub body: String,
    /// Free-form key used in diagnostics, usually the transaction hash the alert is about.
    pub correlation: Option<String>,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(channel: impl Into<ChannelId>, body: impl Into<String>) -> Self {
        Self { channel: channel.into(), body: body.into(), correlation: None }
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = Some(correlation.into());
        self
    }
}

/// Which part of an oversized message survives truncation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Truncation {
    /// Keep the first `max_payload` characters.
    #[default]
    KeepHead,
    /// Keep the last `max_payload` characters.
    KeepTail,
}

impl Truncation {
    /// Cuts `body` to at most `max_chars` characters, never splitting a character.
    #[must_use]
    pub fn apply(self, body: &str, max_chars: usize) -> &str {
        let len = body.chars().count();
        if len <= max_chars {
            return body;
        }
        match self {
            Truncation::KeepHead => body
                .char_indices()
                .nth(max_chars)
                .map_or(body, |(at, _)| &body[..at]),
            Truncation::KeepTail => body
                .char_indices()
                .nth(len - max_chars)
                .map_or("", |(at, _)| &body[at..]),
        }
    }
}

/// Delivery limits of one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Largest payload sent in one call, in characters. Also the truncation limit.
    pub max_payload: usize,
    pub truncation: Truncation,
    /// Minimum time between two sends to the channel.
    pub min_interval: Duration,
    /// Channel that receives a copy of every message enqueued here.
    pub mirror_to: Option<ChannelId>,
    /// Number of failed sends after which a message is dropped. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            truncation: Truncation::default(),
            min_interval: Duration::ZERO,
            mirror_to: None,
            max_attempts: None,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    #[must_use]
    pub fn truncation(mut self, truncation: Truncation) -> Self {
        self.truncation = truncation;
        self
    }

    #[must_use]
    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    #[must_use]
    pub fn mirror_to(mut self, channel: impl Into<ChannelId>) -> Self {
        self.mirror_to = Some(channel.into());
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_bodies_are_untouched() {
        assert_eq!(Truncation::KeepHead.apply("sow", 3), "sow");
        assert_eq!(Truncation::KeepTail.apply("", 3), "");
    }

    #[test]
    fn head_and_tail_truncation() {
        assert_eq!(Truncation::KeepHead.apply("abcdef", 4), "abcd");
        assert_eq!(Truncation::KeepTail.apply("abcdef", 4), "cdef");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let body = "🌱🌱🌱 sown";

        let head = Truncation::KeepHead.apply(body, 2);
        let tail = Truncation::KeepTail.apply(body, 4);

        assert_eq!(head, "🌱🌱");
        assert_eq!(tail, "sown");
        assert!(Truncation::KeepHead.apply(body, 0).is_empty());
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        assert_eq!(Truncation::KeepHead.apply("abc", 0), "");
        assert_eq!(Truncation::KeepTail.apply("abc", 0), "");
        assert_eq!(Truncation::KeepTail.apply("", 0), "");
    }
}
