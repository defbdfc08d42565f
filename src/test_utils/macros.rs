use std::time::Duration;

use tokio_stream::{Stream, StreamExt};

use crate::types::ExecutionContext;

/// Waits for the next item of a stream and returns it.
///
/// # Panics
///
/// * **Timeout**: nothing arrives within the timeout (default 5 seconds, configurable via
///   `timeout = N`).
/// * **Stream closed**: the stream ends instead.
#[macro_export]
macro_rules! assert_next {
    ($stream: expr) => {
        $crate::assert_next!($stream, timeout = 5)
    };
    ($stream: expr, timeout = $secs: expr) => {{
        let item = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        match item {
            std::option::Option::Some(item) => item,
            std::option::Option::None => panic!("Expected an item, but the stream was closed"),
        }
    }};
}

#[macro_export]
macro_rules! assert_closed {
    ($stream: expr) => {
        $crate::assert_closed!($stream, timeout = 5)
    };
    ($stream: expr, timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        assert!(message.is_none(), "Expected the stream to be closed, got {message:?}")
    };
}

#[macro_export]
macro_rules! assert_empty {
    ($stream: expr) => {{
        let inner = $stream.into_inner();
        assert!(inner.is_empty(), "Stream should have no pending messages");
        tokio_stream::wrappers::ReceiverStream::new(inner)
    }};
}

/// Asserts that the stream emits execution contexts covering exactly the given log index sets,
/// in order.
///
/// ```no_run
/// # async fn example(mut stream: tokio_stream::wrappers::ReceiverStream<event_alerts::ExecutionContext>) {
/// // one marked execution, then the rest of the transaction
/// event_alerts::assert_context_sequence!(stream, [[2, 3, 4, 5], [0, 1, 6]]);
/// # }
/// ```
#[macro_export]
macro_rules! assert_context_sequence {
    ($stream: expr, [$([$($index:expr),* $(,)?]),+ $(,)?]) => {
        $crate::assert_context_sequence!($stream, [$([$($index),*]),+], timeout = 5)
    };
    ($stream: expr, [$([$($index:expr),* $(,)?]),+ $(,)?], timeout = $secs: expr) => {
        let expected: &[&[u64]] = &[$(&[$($index),*]),+];
        $crate::test_utils::macros::assert_context_sequence(&mut $stream, expected, $secs).await
    };
}

#[allow(clippy::missing_panics_doc)]
pub async fn assert_context_sequence<S: Stream<Item = ExecutionContext> + Unpin>(
    stream: &mut S,
    expected: &[&[u64]],
    timeout_secs: u64,
) {
    for (position, indices) in expected.iter().enumerate() {
        let next = tokio::time::timeout(Duration::from_secs(timeout_secs), stream.next())
            .await
            .unwrap_or_else(|_| {
                panic!("timed out waiting for context {position}, expected logs {indices:?}")
            });
        let Some(context) = next else {
            panic!("stream closed before context {position}, expected logs {indices:?}");
        };
        assert_eq!(
            context.log_indices(),
            indices.to_vec(),
            "context {position} of {} covers the wrong logs",
            context.transaction_hash
        );
    }
}
