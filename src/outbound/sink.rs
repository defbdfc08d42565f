use std::sync::Arc;

use thiserror::Error;

use crate::outbound::ChannelId;

/// Why a chat platform refused a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The platform rejected the payload size, even though it fit the configured limit.
    #[error("Payload of {size} characters is too large for the channel")]
    PayloadTooLarge { size: usize },
    /// Network or rate-limit failure; the same payload may succeed later.
    #[error("Transient send failure: {0}")]
    Transient(String),
}

/// The chat-platform send primitive the outbound queue delivers through.
///
/// Implementations wrap a Discord or Telegram client. Errors are never fatal: the queue requeues
/// the message and tries again on a later tick.
pub trait ChannelSink: Send + Sync + 'static {
    fn send(
        &self,
        channel: &ChannelId,
        body: &str,
    ) -> impl Future<Output = Result<(), SendError>> + Send;
}

impl<T: ChannelSink> ChannelSink for Arc<T> {
    fn send(
        &self,
        channel: &ChannelId,
        body: &str,
    ) -> impl Future<Output = Result<(), SendError>> + Send {
        (**self).send(channel, body)
    }
}
