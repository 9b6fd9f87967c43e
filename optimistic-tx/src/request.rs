use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use crate::{
    error::CoordinatorError,
    state::OptimisticPatch,
    transaction::{Receipt, TransactionHandle},
};

/// Identifies one coordinated request. Also the identity of its notifications.
#[derive(Clone, PartialEq, Eq, Hash, Default, serde::Deserialize, serde::Serialize)]
pub struct RequestUuid(Uuid);

impl RequestUuid {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Debug for RequestUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for RequestUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type MutationFuture = BoxFuture<'static, Result<TransactionHandle, CoordinatorError>>;

/// Signs and broadcasts the state-changing call, yielding a handle or failing.
/// A wallet prompt the user declines shows up here as an `Err`.
pub struct Mutation(Box<dyn FnOnce() -> MutationFuture + Send>);

impl Mutation {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<TransactionHandle, CoordinatorError>> + Send + 'static,
    {
        Self(Box::new(move || f().boxed()))
    }

    pub fn call(self) -> MutationFuture {
        (self.0)()
    }
}

impl Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Mutation")
    }
}

pub type OnSubmitted = Box<dyn FnOnce(&TransactionHandle) -> eyre::Result<()> + Send>;
pub type OnConfirmed = Box<dyn FnOnce(&Receipt) -> eyre::Result<()> + Send>;
pub type OnFailed = Box<dyn FnOnce(&CoordinatorError) -> eyre::Result<()> + Send>;

/// Everything the coordinator needs for one optimistic transaction.
/// Built by the caller, then handed over to `Coordinator::execute` which consumes it.
pub struct TransactionRequest {
    pub(crate) uuid: RequestUuid,
    pub(crate) label: String,
    pub(crate) mutation: Mutation,
    pub(crate) optimistic_patch: OptimisticPatch,
    pub(crate) on_submitted: Option<OnSubmitted>,
    pub(crate) on_confirmed: Option<OnConfirmed>,
    pub(crate) on_failed: Option<OnFailed>,
    pub(crate) confirmations: Option<u64>,
    pub(crate) confirmation_timeout: Option<Duration>,
}

impl Debug for TransactionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRequest")
            .field("uuid", &self.uuid)
            .field("label", &self.label)
            .field("optimistic_patch", &self.optimistic_patch)
            .field("confirmations", &self.confirmations)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish()
    }
}

impl TransactionRequest {
    pub fn new(label: impl Into<String>, mutation: Mutation) -> Self {
        Self {
            uuid: RequestUuid::random(),
            label: label.into(),
            mutation,
            optimistic_patch: OptimisticPatch::default(),
            on_submitted: None,
            on_confirmed: None,
            on_failed: None,
            confirmations: None,
            confirmation_timeout: None,
        }
    }

    pub fn with_patch(mut self, patch: OptimisticPatch) -> Self {
        self.optimistic_patch = patch;
        self
    }

    /// Hook run once the mutation yields a handle. The hooks never abort the
    /// lifecycle: an `Err` or a panic inside one is logged and counted, and the
    /// coordinator carries on.
    pub fn on_submitted(
        mut self,
        callback: impl FnOnce(&TransactionHandle) -> eyre::Result<()> + Send + 'static,
    ) -> Self {
        self.on_submitted = Some(Box::new(callback));
        self
    }

    /// Hook run after a successful receipt, once the optimistic values are removed.
    pub fn on_confirmed(
        mut self,
        callback: impl FnOnce(&Receipt) -> eyre::Result<()> + Send + 'static,
    ) -> Self {
        self.on_confirmed = Some(Box::new(callback));
        self
    }

    /// Hook run on rollback with the error that caused it.
    pub fn on_failed(
        mut self,
        callback: impl FnOnce(&CoordinatorError) -> eyre::Result<()> + Send + 'static,
    ) -> Self {
        self.on_failed = Some(Box::new(callback));
        self
    }

    /// Overrides the coordinator's default confirmation depth. Lower depths
    /// trade finality risk for perceived latency on fast chains.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = Some(timeout);
        self
    }

    pub fn uuid(&self) -> &RequestUuid {
        &self.uuid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn optimistic_patch(&self) -> &OptimisticPatch {
        &self.optimistic_patch
    }
}
