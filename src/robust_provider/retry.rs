use std::{fmt::Display, time::Duration};

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};
use tokio_util::sync::CancellationToken;

/// Shape of the delay between two attempts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Wait `min_delay` between every attempt.
    Fixed,
    /// Start at `min_delay` and double on every attempt.
    Exponential,
}

/// Retry policy applied at an I/O boundary.
///
/// `max_retries` counts retries, not attempts: a policy with `max_retries = 2` runs an operation
/// at most three times.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub min_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub const fn fixed(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, min_delay: delay, backoff: Backoff::Fixed }
    }

    #[must_use]
    pub const fn exponential(max_retries: usize, min_delay: Duration) -> Self {
        Self { max_retries, min_delay, backoff: Backoff::Exponential }
    }

    /// A policy that runs the operation exactly once.
    #[must_use]
    pub const fn none() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// Total number of attempts this policy allows.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Runs `operation` until it succeeds, the error is rejected by `when`, or the retries are
    /// exhausted. The last error is returned in the two failure cases.
    pub async fn retry<T, E, F, Fut, W>(&self, operation: F, when: W) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        W: FnMut(&E) -> bool,
        E: Display,
    {
        let notify = |err: &E, dur: Duration| {
            debug!(error = %err, delay_ms = dur.as_millis(), "Retrying after error");
        };

        match self.backoff {
            Backoff::Fixed => {
                let strategy = ConstantBuilder::default()
                    .with_delay(self.min_delay)
                    .with_max_times(self.max_retries);
                operation.retry(strategy).when(when).notify(notify).sleep(tokio::time::sleep).await
            }
            Backoff::Exponential => {
                let strategy = ExponentialBuilder::default()
                    .with_min_delay(self.min_delay)
                    .with_max_times(self.max_retries);
                operation.retry(strategy).when(when).notify(notify).sleep(tokio::time::sleep).await
            }
        }
    }

    /// Like [`retry`](Self::retry), but gives up as soon as `cancel` fires, including while
    /// waiting between two attempts. Returns `None` when cancelled.
    pub async fn retry_until_cancelled<T, E, F, Fut, W>(
        &self,
        operation: F,
        when: W,
        cancel: &CancellationToken,
    ) -> Option<Result<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        W: FnMut(&E) -> bool,
        E: Display,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.retry(operation, when) => Some(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fixed_policy_stops_after_max_retries() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let result: Result<(), String> = policy
            .retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_string())
                },
                |_| true,
            )
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), policy.max_attempts());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_errors_are_not_retried() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let result: Result<(), String> = policy
            .retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                },
                |err: &String| err != "fatal",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_the_operation_recovers() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let result = policy
            .retry(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
                },
                |_| true,
            )
            .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff() {
        let policy = RetryPolicy::fixed(14, Duration::from_secs(2));
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                cancel.cancel();
            })
        };
        let result: Option<Result<(), String>> = policy
            .retry_until_cancelled(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_string())
                },
                |_| true,
                &cancel,
            )
            .await;
        canceller.await.unwrap();

        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
