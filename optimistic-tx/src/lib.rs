//! Optimistic transaction coordinator.
//!
//! Lets a client show the assumed result of a state-changing blockchain call
//! immediately, then tracks the real transaction and either keeps the assumed
//! result (confirmed) or rolls it back (failed or reverted).

#![deny(clippy::unwrap_used, clippy::panic)]

pub use coordinator::Coordinator;
pub use error::{CoordinatorError, IsRetryable};
pub use executor::{SubmissionExecutor, WalletExecutor};
pub use metrics::CoordinatorMetrics;
pub use notify::{Notification, NotificationKind, NotificationSink, ToastBoard, TracingNotifier};
pub use pending::{PendingFlag, PendingGuard};
pub use relay::{RelayClient, SponsoredCallArgs, TaskState, TaskStatus, TaskStatusReply};
pub use request::{Mutation, MutationFuture, RequestUuid, TransactionRequest};
pub use settings::{CoordinatorConf, Level, RelayConf, Settings, Style, TracingConfig};
pub use state::{OptimisticPatch, OptimisticState, Snapshot};
pub use transaction::{Receipt, ReceiptStatus, TransactionHandle, TransactionOutcome};
pub use waiter::{
    ConfirmationWaiter, EvmReceiptSource, PollingConfirmationWaiter, ReceiptPoll, ReceiptSource,
    RoutedReceiptSource,
};

mod coordinator;
mod error;
mod executor;
mod metrics;
mod notify;
mod pending;
mod relay;
mod request;
mod settings;
mod state;
mod transaction;
mod waiter;
