use async_trait::async_trait;
use tracing::{info, warn};

use crate::{error::CoordinatorError, request::Mutation, transaction::TransactionHandle};

/// Runs a request's mutation: wallet signature plus broadcast.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionExecutor: Send + Sync {
    async fn submit(
        &self,
        label: &str,
        mutation: Mutation,
    ) -> Result<TransactionHandle, CoordinatorError>;
}

/// Invokes the mutation as-is. Any failure, including a declined wallet prompt,
/// is reported as `SubmissionFailed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalletExecutor;

#[async_trait]
impl SubmissionExecutor for WalletExecutor {
    async fn submit(
        &self,
        label: &str,
        mutation: Mutation,
    ) -> Result<TransactionHandle, CoordinatorError> {
        info!(label, "Dispatching transaction");
        match mutation.call().await {
            Ok(handle) => {
                info!(label, ?handle, "Dispatched transaction");
                Ok(handle)
            }
            Err(err) => {
                warn!(label, ?err, "Transaction submission failed");
                Err(match err {
                    CoordinatorError::SubmissionFailed(_) => err,
                    other => CoordinatorError::SubmissionFailed(other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ethers_core::types::H256;

    use super::*;

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_wallet_executor_returns_handle() {
        let hash = H256::from_low_u64_be(1);
        let handle = WalletExecutor
            .submit("release", Mutation::new(move || async move { Ok(hash.into()) }))
            .await
            .unwrap();
        assert_eq!(handle, TransactionHandle::Hash(hash));
        assert!(logs_contain("Dispatched transaction"));
    }

    #[tokio::test]
    async fn test_wallet_executor_wraps_errors() {
        let err = WalletExecutor
            .submit(
                "release",
                Mutation::new(|| async {
                    Err(CoordinatorError::NetworkError("rpc unreachable".into()))
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::SubmissionFailed("Network error: rpc unreachable".into())
        );
    }
}
