use std::{fmt::Debug, time::Duration};

use alloy::{
    network::{Ethereum, Network},
    primitives::{TxHash, U256},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use tokio::time::timeout;

pub use crate::robust_provider::error::Error;
use crate::robust_provider::RetryPolicy;

/// Provider wrapper with built-in retry and timeout mechanisms.
///
/// Every call is retried according to the configured [`RetryPolicy`] and bounded by
/// `call_timeout`. When the primary provider keeps failing, the configured fallback providers are
/// tried in order.
///
/// Filter ids are node-local: a filter created on one provider cannot be polled on another. A
/// failover in the middle of a filter's life therefore surfaces as a poll error, which the
/// [`EventPoller`](crate::EventPoller) answers by recreating its filters.
#[derive(Clone, Debug)]
pub struct RobustProvider<N: Network = Ethereum> {
    pub(crate) primary_provider: RootProvider<N>,
    pub(crate) fallback_providers: Vec<RootProvider<N>>,
    pub(crate) call_timeout: Duration,
    pub(crate) retry_policy: RetryPolicy,
}

impl<N: Network> RobustProvider<N> {
    /// Get a reference to the primary provider
    #[must_use]
    pub fn primary(&self) -> &RootProvider<N> {
        &self.primary_provider
    }

    /// Installs a log filter on the node (`eth_newFilter`).
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn new_filter(&self, filter: &Filter) -> Result<U256, Error> {
        trace!("eth_newFilter called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.new_filter(filter).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_newFilter failed");
        }
        result
    }

    /// Fetches the logs that matched `id` since the last call (`eth_getFilterChanges`).
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_filter_changes(&self, id: U256) -> Result<Vec<Log>, Error> {
        trace!("eth_getFilterChanges called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.get_filter_changes::<Log>(id).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, filter_id = %id, "eth_getFilterChanges failed");
        }
        result
    }

    /// Fetches every log matching `id` over its whole block range (`eth_getFilterLogs`).
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_filter_logs(&self, id: U256) -> Result<Vec<Log>, Error> {
        trace!("eth_getFilterLogs called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.get_filter_logs(id).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, filter_id = %id, "eth_getFilterLogs failed");
        }
        result
    }

    /// Removes a filter from the node (`eth_uninstallFilter`).
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn uninstall_filter(&self, id: U256) -> Result<bool, Error> {
        trace!("eth_uninstallFilter called");
        self.try_operation_with_failover(move |provider| async move {
            provider.uninstall_filter(id).await
        })
        .await
    }

    /// Fetches logs for the given [`Filter`] (`eth_getLogs`).
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        trace!("eth_getLogs called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.get_logs(filter).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getLogs failed");
        }
        result
    }

    /// Fetches the receipt of a mined transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReceiptNotFound`] when the node has no receipt for `hash`, otherwise see
    /// [retry errors](#retry-errors).
    pub async fn get_transaction_receipt(&self, hash: TxHash) -> Result<N::ReceiptResponse, Error> {
        trace!("eth_getTransactionReceipt called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.get_transaction_receipt(hash).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, txn_hash = %hash, "eth_getTransactionReceipt failed");
        }

        result?.ok_or(Error::ReceiptNotFound(hash))
    }

    /// Execute `operation` with retries and a total timeout, failing over to the fallback
    /// providers in order.
    ///
    /// # Errors
    /// <a name="retry-errors"></a>
    ///
    /// * [`Error::Timeout`] if the last provider tried did not answer within `call_timeout`.
    /// * [`Error::RpcError`] with the last provider's error once every provider has failed.
    pub(crate) async fn try_operation_with_failover<T: Debug, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let mut last_error = match self.try_provider_with_timeout(self.primary(), &operation).await
        {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        let num_fallbacks = self.fallback_providers.len();
        if num_fallbacks > 0 {
            info!("Primary provider failed, trying fallback provider(s)");
        }

        for (fallback_idx, provider) in self.fallback_providers.iter().enumerate() {
            info!(provider_num = fallback_idx + 1, total = num_fallbacks, "Attempting fallback provider");

            match self.try_provider_with_timeout(provider, &operation).await {
                Ok(value) => {
                    info!(provider_num = fallback_idx + 1, "Fallback provider succeeded");
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    error!(provider_num = fallback_idx + 1, err = %e, "Fallback provider failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Try executing an operation with a specific provider with retry and timeout.
    ///
    /// Only transport failures are retried; an error answer from the node is returned at once.
    async fn try_provider_with_timeout<T, F, Fut>(
        &self,
        provider: &RootProvider<N>,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retryable = |err: &RpcError<TransportErrorKind>| matches!(err, RpcError::Transport(_));
        timeout(self.call_timeout, self.retry_policy.retry(|| operation(provider.clone()), retryable))
            .await
            .map_err(Error::from)?
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robust_provider::Backoff;
    use alloy::{
        primitives::b256,
        providers::mock::Asserter,
        rpc::{client::RpcClient, types::TransactionReceipt},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn test_provider(timeout: u64, max_retries: usize, min_delay: u64) -> RobustProvider {
        RobustProvider {
            primary_provider: RootProvider::new_http("http://localhost:8545".parse().unwrap()),
            fallback_providers: vec![],
            call_timeout: Duration::from_millis(timeout),
            retry_policy: RetryPolicy {
                max_retries,
                min_delay: Duration::from_millis(min_delay),
                backoff: Backoff::Exponential,
            },
        }
    }

    fn mocked_provider(asserter: &Asserter) -> RobustProvider {
        RobustProvider {
            primary_provider: RootProvider::new(RpcClient::mocked(asserter.clone())),
            fallback_providers: vec![],
            call_timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy::none(),
        }
    }

    #[tokio::test]
    async fn test_retry_with_timeout_succeeds_on_first_attempt() {
        let provider = test_provider(100, 3, 10);

        let call_count = AtomicUsize::new(0);

        let result = provider
            .try_operation_with_failover(|_| async {
                call_count.fetch_add(1, Ordering::SeqCst);
                let count = call_count.load(Ordering::SeqCst);
                Ok(count)
            })
            .await;

        assert!(matches!(result, Ok(1)));
    }

    #[tokio::test]
    async fn test_retry_with_timeout_retries_on_error() {
        let provider = test_provider(100, 3, 10);

        let call_count = AtomicUsize::new(0);

        let result = provider
            .try_operation_with_failover(|_| async {
                call_count.fetch_add(1, Ordering::SeqCst);
                let count = call_count.load(Ordering::SeqCst);
                match count {
                    3 => Ok(count),
                    _ => Err(TransportErrorKind::BackendGone.into()),
                }
            })
            .await;

        assert!(matches!(result, Ok(3)));
    }

    #[tokio::test]
    async fn test_retry_with_timeout_fails_after_max_retries() {
        let provider = test_provider(100, 2, 10);

        let call_count = AtomicUsize::new(0);

        let result: Result<(), Error> = provider
            .try_operation_with_failover(|_| async {
                call_count.fetch_add(1, Ordering::SeqCst);
                Err(TransportErrorKind::BackendGone.into())
            })
            .await;

        assert!(matches!(result, Err(Error::RpcError(_))));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_timeout_respects_call_timeout() {
        let call_timeout = 50;
        let provider = test_provider(call_timeout, 10, 1);

        let result = provider
            .try_operation_with_failover(move |_provider| async move {
                sleep(Duration::from_millis(call_timeout + 10)).await;
                Ok(42)
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn new_filter_returns_node_filter_id() -> anyhow::Result<()> {
        let asserter = Asserter::new();
        let provider = mocked_provider(&asserter);
        asserter.push_success(&U256::from(7));

        let id = provider.new_filter(&Filter::new()).await?;

        assert_eq!(id, U256::from(7));
        Ok(())
    }

    #[tokio::test]
    async fn filter_changes_are_returned_as_logs() -> anyhow::Result<()> {
        let asserter = Asserter::new();
        let provider = mocked_provider(&asserter);
        let log = Log {
            transaction_hash: Some(b256!(
                "0x00000000000000000000000000000000000000000000000000000000000000aa"
            )),
            block_number: Some(12),
            log_index: Some(3),
            ..Default::default()
        };
        asserter.push_success(&vec![log.clone()]);

        let logs = provider.get_filter_changes(U256::from(1)).await?;

        assert_eq!(logs, vec![log]);
        Ok(())
    }

    #[tokio::test]
    async fn error_response_is_not_transient() {
        let asserter = Asserter::new();
        let provider = mocked_provider(&asserter);
        asserter.push_failure_msg("filter not found");

        let err = provider.get_filter_changes(U256::from(1)).await.unwrap_err();

        assert!(!err.is_transient(), "unexpected transient error: {err:?}");
    }

    #[tokio::test]
    async fn error_response_is_not_retried() {
        let asserter = Asserter::new();
        let fallback = Asserter::new();
        let mut provider = mocked_provider(&asserter);
        provider.retry_policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        provider.fallback_providers = vec![RootProvider::new(RpcClient::mocked(fallback.clone()))];
        asserter.push_failure_msg("filter not found");
        asserter.push_success(&Vec::<Log>::new());
        fallback.push_success(&Vec::<Log>::new());

        let result = provider.get_filter_changes(U256::from(1)).await;

        assert!(result.is_err(), "error answer was retried: {result:?}");
        assert!(!fallback.read_q().is_empty());
    }

    #[tokio::test]
    async fn missing_receipt_is_reported() {
        let asserter = Asserter::new();
        let provider = mocked_provider(&asserter);
        asserter.push_success(&Option::<TransactionReceipt>::None);

        let err = provider.get_transaction_receipt(TxHash::ZERO).await.unwrap_err();

        assert!(matches!(err, Error::ReceiptNotFound(hash) if hash == TxHash::ZERO));
    }
}
