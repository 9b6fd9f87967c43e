use std::fmt::{Debug, Display};

use ethers_core::types::{Log, TransactionReceipt, H256, U64};

use crate::error::CoordinatorError;

/// Opaque reference to a broadcast transaction, produced by a mutation.
#[derive(Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub enum TransactionHandle {
    /// Hash of a transaction broadcast directly by the user's wallet
    Hash(H256),
    /// Task id of a call sponsored by the gasless relay
    RelayTask(String),
}

impl Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionHandle::Hash(hash) => write!(f, "Hash({hash:?})"),
            TransactionHandle::RelayTask(task_id) => write!(f, "RelayTask({task_id})"),
        }
    }
}

impl Display for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<H256> for TransactionHandle {
    fn from(hash: H256) -> Self {
        TransactionHandle::Hash(hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// What the chain (or the relay) reports about an included transaction.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub logs: Vec<Log>,
    /// Populated by sources that explain failures, e.g. the relay's last check message
    pub failure_reason: Option<String>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }

    pub fn revert_reason(&self) -> String {
        match (&self.failure_reason, self.transaction_hash, self.block_number) {
            (Some(reason), _, _) => reason.clone(),
            (None, Some(hash), Some(block)) => {
                format!("transaction {hash:?} reverted in block {block}")
            }
            (None, Some(hash), None) => format!("transaction {hash:?} reverted"),
            (None, None, _) => "transaction reverted".to_string(),
        }
    }
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        // pre-byzantium receipts carry no status field; they are only excluded by a revert
        let status = match receipt.status {
            Some(status) if status == U64::zero() => ReceiptStatus::Failure,
            _ => ReceiptStatus::Success,
        };
        Self {
            status,
            transaction_hash: Some(receipt.transaction_hash),
            block_number: receipt.block_number.map(|number| number.as_u64()),
            logs: receipt.logs,
            failure_reason: None,
        }
    }
}

/// Terminal result of one coordinated transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Confirmed(Receipt),
    Reverted(String),
    SubmissionFailed(CoordinatorError),
    /// The transaction may still confirm later; treat as unknown, not failed
    ConfirmationTimedOut,
    /// The receipt source could not be reached during the wait; also unknown
    ConfirmationUnavailable(CoordinatorError),
    /// The handle cannot be tracked at all, e.g. no receipt source serves it
    TrackingFailed(CoordinatorError),
}

impl TransactionOutcome {
    /// Whether the optimistic values of the request were rolled back
    pub fn is_rolled_back(&self) -> bool {
        matches!(
            self,
            TransactionOutcome::Reverted(_)
                | TransactionOutcome::SubmissionFailed(_)
                | TransactionOutcome::TrackingFailed(_)
        )
    }

    /// Outcomes for which the final state of the transaction is not known
    pub fn is_unknown(&self) -> bool {
        matches!(
            self,
            TransactionOutcome::ConfirmationTimedOut
                | TransactionOutcome::ConfirmationUnavailable(_)
        )
    }

    pub fn to_metrics_label(&self) -> &'static str {
        match self {
            TransactionOutcome::Confirmed(_) => "confirmed",
            TransactionOutcome::Reverted(_) => "reverted",
            TransactionOutcome::SubmissionFailed(_) => "submission_failed",
            TransactionOutcome::ConfirmationTimedOut => "confirmation_timed_out",
            TransactionOutcome::ConfirmationUnavailable(_) => "confirmation_unavailable",
            TransactionOutcome::TrackingFailed(_) => "tracking_failed",
        }
    }
}
