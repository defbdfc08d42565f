use parking_lot::Mutex;

use crate::outbound::{ChannelId, ChannelSink, SendError};

#[derive(Debug)]
struct FailRule {
    needle: String,
    remaining: usize,
    error: SendError,
}

/// A chat platform that records every payload it accepts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(ChannelId, String)>>,
    rules: Mutex<Vec<FailRule>>,
    max_len: Option<usize>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` payloads containing `needle` with `error`.
    #[must_use]
    pub fn fail_matching(self, needle: &str, times: usize, error: SendError) -> Self {
        self.rules.lock().push(FailRule { needle: needle.to_string(), remaining: times, error });
        self
    }

    /// Rejects payloads longer than `max_len` characters as too large.
    #[must_use]
    pub fn reject_longer_than(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Accepted payloads, in send order, across channels.
    #[must_use]
    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, body)| body.clone()).collect()
    }

    #[must_use]
    pub fn sent_to(&self, channel: &ChannelId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| to == channel)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

impl ChannelSink for RecordingSink {
    async fn send(&self, channel: &ChannelId, body: &str) -> Result<(), SendError> {
        let size = body.chars().count();
        if self.max_len.is_some_and(|max| size > max) {
            return Err(SendError::PayloadTooLarge { size });
        }
        if let Some(rule) =
            self.rules.lock().iter_mut().find(|rule| rule.remaining > 0 && body.contains(&rule.needle))
        {
            rule.remaining -= 1;
            return Err(rule.error.clone());
        }
        self.sent.lock().push((channel.clone(), body.to_string()));
        Ok(())
    }
}
