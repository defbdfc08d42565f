//! Glue between a poller's context stream and the outbound queue.

use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    outbound::{OutboundMessage, OutboundQueue},
    types::ExecutionContext,
};

/// Turns one execution context into the alerts it deserves, possibly none.
///
/// Formatters only read the context; they may look at sibling logs through
/// [`ExecutionContext::receipt`].
pub trait AlertFormatter: Send + Sync + 'static {
    fn format(&self, context: &ExecutionContext) -> Vec<OutboundMessage>;
}

impl<F> AlertFormatter for F
where
    F: Fn(&ExecutionContext) -> Vec<OutboundMessage> + Send + Sync + 'static,
{
    fn format(&self, context: &ExecutionContext) -> Vec<OutboundMessage> {
        self(context)
    }
}

/// Formats every context of `contexts` and enqueues the resulting messages, in stream order.
///
/// The task ends when the stream ends or `cancel` fires, and returns the number of messages it
/// enqueued. Messages without a correlation get the transaction hash of their context.
pub fn spawn_alert_task<St, F>(
    mut contexts: St,
    formatter: F,
    queue: OutboundQueue,
    cancel: CancellationToken,
) -> JoinHandle<usize>
where
    St: Stream<Item = ExecutionContext> + Send + Unpin + 'static,
    F: AlertFormatter,
{
    tokio::spawn(async move {
        let mut enqueued = 0;
        loop {
            let context = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = contexts.next() => match next {
                    Some(context) => context,
                    None => break,
                },
            };

            let messages = formatter.format(&context);
            trace!(
                txn_hash = %context.transaction_hash,
                outer = context.is_outer(),
                messages = messages.len(),
                "Formatted execution context"
            );
            for mut message in messages {
                if message.correlation.is_none() {
                    message.correlation = Some(context.transaction_hash.to_string());
                }
                queue.enqueue(message);
                enqueued += 1;
            }
        }

        debug!(enqueued, "Alert task stopped");
        enqueued
    })
}
