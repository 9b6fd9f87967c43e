use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use derive_new::new;
use ethers_providers::Middleware;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::CoordinatorError,
    settings::CoordinatorConf,
    transaction::{Receipt, TransactionHandle},
};

/// What a receipt source currently knows about a handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptPoll {
    /// Not included yet, or not known to the source yet
    Pending,
    /// Included in a block, `depth` blocks deep counting the including block
    Included { receipt: Receipt, depth: u64 },
    /// The source itself considers the transaction final
    Final(Receipt),
}

/// Chain-client capability: look up the inclusion status of a handle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn poll_receipt(&self, handle: &TransactionHandle)
        -> Result<ReceiptPoll, CoordinatorError>;
}

/// Waits until a handle reaches a terminal status.
#[async_trait]
pub trait ConfirmationWaiter: Send + Sync + Debug {
    /// Resolves with the receipt once it is `confirmations` deep, or as soon as a
    /// failed receipt is observed. Fails with `ConfirmationTimedOut` after
    /// `max_wait`, or with the source's error when the source cannot be reached.
    /// Errors are never retried here.
    async fn wait_for(
        &self,
        handle: &TransactionHandle,
        confirmations: u64,
        max_wait: Duration,
    ) -> Result<Receipt, CoordinatorError>;
}

#[derive(new)]
pub struct PollingConfirmationWaiter<S> {
    source: S,
    poll_interval: Duration,
}

impl<S> Debug for PollingConfirmationWaiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingConfirmationWaiter")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<S> PollingConfirmationWaiter<S> {
    /// Polls at the configured `poll_interval_ms`.
    pub fn from_conf(source: S, conf: &CoordinatorConf) -> Self {
        Self::new(source, conf.poll_interval())
    }
}

impl<S: ReceiptSource> PollingConfirmationWaiter<S> {
    async fn poll_until_terminal(
        &self,
        handle: &TransactionHandle,
        confirmations: u64,
    ) -> Result<Receipt, CoordinatorError> {
        // a depth of zero would mean "before inclusion", which has no receipt
        let confirmations = confirmations.max(1);
        loop {
            match self.source.poll_receipt(handle).await? {
                ReceiptPoll::Final(receipt) => return Ok(receipt),
                ReceiptPoll::Included { receipt, .. } if !receipt.is_success() => {
                    return Ok(receipt)
                }
                ReceiptPoll::Included { receipt, depth } if depth >= confirmations => {
                    return Ok(receipt)
                }
                ReceiptPoll::Included { depth, .. } => {
                    debug!(?handle, depth, confirmations, "Transaction included, waiting for depth");
                }
                ReceiptPoll::Pending => {
                    debug!(?handle, "Transaction not included yet");
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl<S: ReceiptSource> ConfirmationWaiter for PollingConfirmationWaiter<S> {
    #[instrument(skip(self), fields(poll_interval = ?self.poll_interval))]
    async fn wait_for(
        &self,
        handle: &TransactionHandle,
        confirmations: u64,
        max_wait: Duration,
    ) -> Result<Receipt, CoordinatorError> {
        match timeout(max_wait, self.poll_until_terminal(handle, confirmations)).await {
            Ok(Ok(receipt)) => {
                info!(?handle, status = ?receipt.status, "Transaction reached a terminal status");
                Ok(receipt)
            }
            Ok(Err(err)) => {
                warn!(?handle, ?err, "Error while waiting for receipt");
                Err(err)
            }
            Err(_) => {
                warn!(?handle, ?max_wait, "Waiting for receipt timed out");
                Err(CoordinatorError::ConfirmationTimedOut)
            }
        }
    }
}

/// Sends each handle to the source that understands it: transaction hashes to
/// the chain client, relay task ids to the gasless relay.
#[derive(Clone, Default)]
pub struct RoutedReceiptSource {
    chain: Option<Arc<dyn ReceiptSource>>,
    relay: Option<Arc<dyn ReceiptSource>>,
}

impl RoutedReceiptSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, source: Arc<dyn ReceiptSource>) -> Self {
        self.chain = Some(source);
        self
    }

    pub fn with_relay(mut self, source: Arc<dyn ReceiptSource>) -> Self {
        self.relay = Some(source);
        self
    }
}

impl Debug for RoutedReceiptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedReceiptSource")
            .field("chain", &self.chain.is_some())
            .field("relay", &self.relay.is_some())
            .finish()
    }
}

#[async_trait]
impl ReceiptSource for RoutedReceiptSource {
    async fn poll_receipt(
        &self,
        handle: &TransactionHandle,
    ) -> Result<ReceiptPoll, CoordinatorError> {
        let source = match handle {
            TransactionHandle::Hash(_) => self.chain.as_ref(),
            TransactionHandle::RelayTask(_) => self.relay.as_ref(),
        };
        match source {
            Some(source) => source.poll_receipt(handle).await,
            None => Err(CoordinatorError::UnsupportedHandle(handle.to_string())),
        }
    }
}

/// Receipt source backed by any ethers provider.
#[derive(new)]
pub struct EvmReceiptSource<M> {
    provider: Arc<M>,
}

#[async_trait]
impl<M> ReceiptSource for EvmReceiptSource<M>
where
    M: Middleware + 'static,
{
    async fn poll_receipt(
        &self,
        handle: &TransactionHandle,
    ) -> Result<ReceiptPoll, CoordinatorError> {
        let TransactionHandle::Hash(hash) = handle else {
            return Err(CoordinatorError::UnsupportedHandle(handle.to_string()));
        };
        let receipt = self
            .provider
            .get_transaction_receipt(*hash)
            .await
            .map_err(|err| CoordinatorError::NetworkError(err.to_string()))?;
        let Some(receipt) = receipt else {
            return Ok(ReceiptPoll::Pending);
        };
        let Some(included_at) = receipt.block_number else {
            return Ok(ReceiptPoll::Pending);
        };
        let latest = self
            .provider
            .get_block_number()
            .await
            .map_err(|err| CoordinatorError::NetworkError(err.to_string()))?;
        let depth = latest
            .as_u64()
            .saturating_sub(included_at.as_u64())
            .saturating_add(1);
        Ok(ReceiptPoll::Included {
            receipt: receipt.into(),
            depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use ethers_core::types::{TransactionReceipt, H256, U64};
    use ethers_providers::{MockProvider, Provider};

    use super::*;
    use crate::transaction::ReceiptStatus;

    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    fn receipt(status: ReceiptStatus) -> Receipt {
        Receipt {
            status,
            transaction_hash: Some(H256::from_low_u64_be(9)),
            block_number: Some(100),
            logs: vec![],
            failure_reason: None,
        }
    }

    fn handle() -> TransactionHandle {
        TransactionHandle::Hash(H256::from_low_u64_be(9))
    }

    #[tokio::test]
    async fn test_waits_for_requested_depth() {
        let polls = Arc::new(AtomicU64::new(0));
        let polls_clone = polls.clone();
        let mut source = MockReceiptSource::new();
        source.expect_poll_receipt().returning(move |_| {
            let poll = polls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(match poll {
                0 => ReceiptPoll::Pending,
                depth => ReceiptPoll::Included {
                    receipt: receipt(ReceiptStatus::Success),
                    depth,
                },
            })
        });

        let waiter = PollingConfirmationWaiter::new(source, POLL_INTERVAL);
        let result = waiter
            .wait_for(&handle(), 3, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(result.is_success());
        // pending, then depths 1, 2 and 3
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_terminal_before_depth() {
        let mut source = MockReceiptSource::new();
        source.expect_poll_receipt().times(1).returning(|_| {
            Ok(ReceiptPoll::Included {
                receipt: receipt(ReceiptStatus::Failure),
                depth: 1,
            })
        });

        let waiter = PollingConfirmationWaiter::new(source, POLL_INTERVAL);
        let result = waiter
            .wait_for(&handle(), 12, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, ReceiptStatus::Failure);
    }

    #[tokio::test]
    async fn test_final_receipt_skips_depth_check() {
        let mut source = MockReceiptSource::new();
        source
            .expect_poll_receipt()
            .times(1)
            .returning(|_| Ok(ReceiptPoll::Final(receipt(ReceiptStatus::Success))));

        let waiter = PollingConfirmationWaiter::new(source, POLL_INTERVAL);
        let result = waiter.wait_for(&handle(), 64, Duration::from_secs(5)).await;
        assert!(result.unwrap().is_success());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_times_out_when_never_included() {
        let mut source = MockReceiptSource::new();
        source
            .expect_poll_receipt()
            .returning(|_| Ok(ReceiptPoll::Pending));

        let waiter = PollingConfirmationWaiter::new(source, POLL_INTERVAL);
        let result = waiter
            .wait_for(&handle(), 1, Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(CoordinatorError::ConfirmationTimedOut));
        assert!(logs_contain("Waiting for receipt timed out"));
    }

    #[tokio::test]
    async fn test_network_errors_are_not_retried() {
        let mut source = MockReceiptSource::new();
        source
            .expect_poll_receipt()
            .times(1)
            .returning(|_| Err(CoordinatorError::NetworkError("connection refused".into())));

        let waiter = PollingConfirmationWaiter::new(source, POLL_INTERVAL);
        let result = waiter.wait_for(&handle(), 1, Duration::from_secs(5)).await;
        assert_eq!(
            result,
            Err(CoordinatorError::NetworkError("connection refused".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_from_conf_polls_at_configured_interval() {
        let polls = Arc::new(AtomicU64::new(0));
        let polls_clone = polls.clone();
        let mut source = MockReceiptSource::new();
        source.expect_poll_receipt().returning(move |_| {
            polls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(ReceiptPoll::Pending)
        });

        // 2 s between polls, 300 s budget
        let conf = CoordinatorConf::default();
        let waiter = PollingConfirmationWaiter::from_conf(source, &conf);
        let result = waiter
            .wait_for(&handle(), conf.confirmations, conf.confirmation_timeout())
            .await;

        assert_eq!(result, Err(CoordinatorError::ConfirmationTimedOut));
        let polls = polls.load(Ordering::SeqCst);
        assert!((150..=151).contains(&polls), "polled {polls} times");
    }

    fn mock_route(expected: TransactionHandle) -> Arc<dyn ReceiptSource> {
        let mut source = MockReceiptSource::new();
        source
            .expect_poll_receipt()
            .withf(move |handle| *handle == expected)
            .times(1)
            .returning(|_| Ok(ReceiptPoll::Final(receipt(ReceiptStatus::Success))));
        Arc::new(source)
    }

    #[tokio::test]
    async fn test_routed_source_dispatches_on_handle_kind() {
        let relay_task = TransactionHandle::RelayTask("0xabc".into());
        let source = RoutedReceiptSource::new()
            .with_chain(mock_route(handle()))
            .with_relay(mock_route(relay_task.clone()));

        assert!(matches!(
            source.poll_receipt(&handle()).await,
            Ok(ReceiptPoll::Final(_))
        ));
        assert!(matches!(
            source.poll_receipt(&relay_task).await,
            Ok(ReceiptPoll::Final(_))
        ));
    }

    #[tokio::test]
    async fn test_routed_source_without_relay_rejects_relay_tasks() {
        let source = RoutedReceiptSource::new().with_chain(Arc::new(MockReceiptSource::new()));
        let result = source
            .poll_receipt(&TransactionHandle::RelayTask("0xabc".into()))
            .await;
        assert_eq!(
            result,
            Err(CoordinatorError::UnsupportedHandle("RelayTask(0xabc)".into()))
        );
    }

    fn evm_source() -> (EvmReceiptSource<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        (EvmReceiptSource::new(Arc::new(provider)), mock)
    }

    fn evm_receipt(block: Option<u64>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::from_low_u64_be(9),
            block_number: block.map(U64::from),
            status: Some(U64::from(1)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_evm_source_pending_without_receipt() {
        let (source, mock) = evm_source();
        mock.push::<Option<TransactionReceipt>, _>(None).unwrap();

        let poll = source.poll_receipt(&handle()).await.unwrap();
        assert_eq!(poll, ReceiptPoll::Pending);
    }

    #[tokio::test]
    async fn test_evm_source_pending_without_block_number() {
        let (source, mock) = evm_source();
        mock.push::<TransactionReceipt, _>(evm_receipt(None)).unwrap();

        let poll = source.poll_receipt(&handle()).await.unwrap();
        assert_eq!(poll, ReceiptPoll::Pending);
    }

    #[tokio::test]
    async fn test_evm_source_counts_the_including_block() {
        let (source, mock) = evm_source();
        // The MockProvider responses are processed in LIFO order:
        // eth_blockNumber is the second call, eth_getTransactionReceipt the first
        mock.push::<U64, _>(U64::from(100)).unwrap();
        mock.push::<TransactionReceipt, _>(evm_receipt(Some(100))).unwrap();
        let poll = source.poll_receipt(&handle()).await.unwrap();
        assert_eq!(
            poll,
            ReceiptPoll::Included {
                receipt: evm_receipt(Some(100)).into(),
                depth: 1,
            }
        );

        mock.push::<U64, _>(U64::from(102)).unwrap();
        mock.push::<TransactionReceipt, _>(evm_receipt(Some(100))).unwrap();
        let poll = source.poll_receipt(&handle()).await.unwrap();
        assert!(matches!(poll, ReceiptPoll::Included { depth: 3, .. }));
    }

    #[tokio::test]
    async fn test_evm_source_maps_rpc_errors_to_network_errors() {
        // no queued response, so the provider call fails
        let (source, _mock) = evm_source();
        let result = source.poll_receipt(&handle()).await;
        assert!(matches!(result, Err(CoordinatorError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_evm_source_rejects_relay_tasks() {
        let (source, _mock) = evm_source();
        let result = source
            .poll_receipt(&TransactionHandle::RelayTask("0xabc".into()))
            .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::UnsupportedHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_waiter_over_evm_source_waits_for_depth() {
        let (source, mock) = evm_source();
        // second poll: head 101, receipt at 100 (depth 2)
        mock.push::<U64, _>(U64::from(101)).unwrap();
        mock.push::<TransactionReceipt, _>(evm_receipt(Some(100))).unwrap();
        // first poll: head 100, receipt at 100 (depth 1)
        mock.push::<U64, _>(U64::from(100)).unwrap();
        mock.push::<TransactionReceipt, _>(evm_receipt(Some(100))).unwrap();

        let waiter = PollingConfirmationWaiter::new(source, POLL_INTERVAL);
        let result = waiter
            .wait_for(&handle(), 2, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.transaction_hash, Some(H256::from_low_u64_be(9)));
    }
}
