use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    error::{CoordinatorError, IsRetryable},
    executor::SubmissionExecutor,
    metrics::CoordinatorMetrics,
    notify::{NotificationKind, NotificationSink},
    pending::PendingFlag,
    request::{OnConfirmed, OnFailed, RequestUuid, TransactionRequest},
    settings::CoordinatorConf,
    state::{OptimisticPatch, OptimisticState},
    transaction::{TransactionHandle, TransactionOutcome},
    waiter::ConfirmationWaiter,
};

/// The part of a request that is still needed once it has been broadcast.
struct Lifecycle {
    uuid: RequestUuid,
    label: String,
    patch: OptimisticPatch,
    on_confirmed: Option<OnConfirmed>,
    on_failed: Option<OnFailed>,
    confirmations: u64,
    max_wait: Duration,
}

/// A broadcast transaction whose outcome is unknown because the confirmation
/// wait gave up. Its optimistic values stay in place until it is rechecked.
struct Unsettled {
    lifecycle: Lifecycle,
    handle: TransactionHandle,
}

/// Rolls back the overlay if the lifecycle future owning it is dropped before it
/// settles, e.g. an aborted task or a lost `select!` branch.
struct AbandonGuard<'a> {
    coordinator: &'a Coordinator,
    uuid: RequestUuid,
    label: String,
    patch: OptimisticPatch,
    armed: bool,
}

impl<'a> AbandonGuard<'a> {
    fn new(coordinator: &'a Coordinator, lifecycle: &Lifecycle) -> Self {
        Self {
            coordinator,
            uuid: lifecycle.uuid.clone(),
            label: lifecycle.label.clone(),
            patch: lifecycle.patch.clone(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self.coordinator.remove_patch(&self.patch);
        warn!(
            request_uuid = %self.uuid,
            ?removed,
            "Lifecycle dropped before settling, removed optimistic values"
        );
        self.coordinator.notifier.notify(
            &self.uuid,
            NotificationKind::Pending,
            &format!("{}: no longer tracked, refresh to see the result", self.label),
        );
        self.coordinator.metrics.update_outcome_metric("abandoned");
    }
}

/// Runs optimistic transactions: applies the assumed result immediately, then
/// submits, tracks confirmation, and keeps or rolls back the assumed result.
///
/// Owns the process-wide optimistic overlay and pending flag. Create one at
/// application start and call [`Coordinator::reset`] on logout.
pub struct Coordinator {
    state: Arc<OptimisticState>,
    pending: Arc<PendingFlag>,
    executor: Arc<dyn SubmissionExecutor>,
    waiter: Arc<dyn ConfirmationWaiter>,
    notifier: Arc<dyn NotificationSink>,
    conf: CoordinatorConf,
    metrics: CoordinatorMetrics,
    unsettled: Mutex<HashMap<RequestUuid, Unsettled>>,
}

impl Coordinator {
    pub fn new(
        conf: CoordinatorConf,
        executor: Arc<dyn SubmissionExecutor>,
        waiter: Arc<dyn ConfirmationWaiter>,
        notifier: Arc<dyn NotificationSink>,
        metrics: CoordinatorMetrics,
    ) -> Self {
        Self {
            state: Arc::new(OptimisticState::new()),
            pending: Arc::new(PendingFlag::new()),
            executor,
            waiter,
            notifier,
            conf,
            metrics,
            unsettled: Mutex::new(HashMap::new()),
        }
    }

    pub fn optimistic_state(&self) -> &Arc<OptimisticState> {
        &self.state
    }

    pub fn pending_flag(&self) -> &Arc<PendingFlag> {
        &self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_pending()
    }

    /// Requests that timed out or lost their receipt source and can be rechecked.
    pub fn unsettled(&self) -> Vec<(RequestUuid, TransactionHandle)> {
        self.unsettled
            .lock()
            .iter()
            .map(|(uuid, unsettled)| (uuid.clone(), unsettled.handle.clone()))
            .collect()
    }

    /// Drops all optimistic values and forgets unsettled requests.
    /// Requests still in flight finish normally.
    pub fn reset(&self) {
        self.unsettled.lock().clear();
        self.state.reset();
        self.metrics.set_optimistic_keys(0);
        info!("Reset optimistic state");
    }

    /// Runs one request to its terminal outcome. Never fails: every failure is
    /// encoded in the returned outcome.
    #[instrument(
        skip_all,
        name = "Coordinator::execute",
        fields(request_uuid = %request.uuid, label = %request.label)
    )]
    pub async fn execute(&self, request: TransactionRequest) -> TransactionOutcome {
        let TransactionRequest {
            uuid,
            label,
            mutation,
            optimistic_patch,
            on_submitted,
            on_confirmed,
            on_failed,
            confirmations,
            confirmation_timeout,
        } = request;

        let guard = self.pending.acquire();
        self.metrics
            .set_in_flight_requests(self.pending.in_flight_count());

        let lifecycle = Lifecycle {
            uuid,
            label,
            patch: optimistic_patch,
            on_confirmed,
            on_failed,
            confirmations: confirmations.unwrap_or(self.conf.confirmations),
            max_wait: confirmation_timeout.unwrap_or_else(|| self.conf.confirmation_timeout()),
        };

        let abandon_guard = AbandonGuard::new(self, &lifecycle);

        // the assumed result is visible before any network interaction
        if !lifecycle.patch.is_empty() {
            self.state.apply(&lifecycle.patch);
            self.metrics.set_optimistic_keys(self.state.len());
            self.notify_submitted(&lifecycle);
        }

        let outcome = match self.executor.submit(&lifecycle.label, mutation).await {
            Ok(handle) => {
                if lifecycle.patch.is_empty() {
                    self.notify_submitted(&lifecycle);
                }
                self.run_callback("on_submitted", on_submitted, &handle);
                self.await_confirmation(lifecycle, handle).await
            }
            Err(err) => {
                let err = match err {
                    CoordinatorError::SubmissionFailed(_) => err,
                    other => CoordinatorError::SubmissionFailed(other.to_string()),
                };
                self.roll_back(lifecycle, &err);
                TransactionOutcome::SubmissionFailed(err)
            }
        };

        abandon_guard.disarm();
        drop(guard);
        self.finish(outcome)
    }

    /// Waits again for a request whose previous wait ended without a verdict.
    /// Returns `None` if `uuid` is not unsettled.
    #[instrument(skip(self), name = "Coordinator::recheck")]
    pub async fn recheck(&self, uuid: &RequestUuid) -> Option<TransactionOutcome> {
        let Unsettled { lifecycle, handle } = self.unsettled.lock().remove(uuid)?;
        let guard = self.pending.acquire();
        self.metrics
            .set_in_flight_requests(self.pending.in_flight_count());
        let abandon_guard = AbandonGuard::new(self, &lifecycle);

        let outcome = self.await_confirmation(lifecycle, handle).await;

        abandon_guard.disarm();
        drop(guard);
        Some(self.finish(outcome))
    }

    async fn await_confirmation(
        &self,
        lifecycle: Lifecycle,
        handle: TransactionHandle,
    ) -> TransactionOutcome {
        let submitted_at = Instant::now();
        let result = self
            .waiter
            .wait_for(&handle, lifecycle.confirmations, lifecycle.max_wait)
            .await;
        self.metrics.set_confirmation_latency(submitted_at.elapsed());

        match result {
            Ok(receipt) if receipt.is_success() => {
                let Lifecycle {
                    uuid,
                    label,
                    patch,
                    on_confirmed,
                    ..
                } = lifecycle;
                // durable state now owns the value
                self.remove_patch(&patch);
                self.run_callback("on_confirmed", on_confirmed, &receipt);
                self.notifier.notify(
                    &uuid,
                    NotificationKind::Confirmed,
                    &format!("{label}: confirmed"),
                );
                info!(?handle, "Transaction confirmed");
                TransactionOutcome::Confirmed(receipt)
            }
            Ok(receipt) => {
                let reason = receipt.revert_reason();
                warn!(?handle, reason, "Transaction reverted");
                self.roll_back(lifecycle, &CoordinatorError::Reverted(reason.clone()));
                TransactionOutcome::Reverted(reason)
            }
            Err(err) if !err.is_retryable() => {
                warn!(?handle, ?err, "Transaction cannot be tracked, rolling back");
                self.roll_back(lifecycle, &err);
                TransactionOutcome::TrackingFailed(err)
            }
            Err(err) => {
                warn!(?handle, ?err, "Transaction outcome unknown, keeping optimistic values");
                self.notifier.notify(
                    &lifecycle.uuid,
                    NotificationKind::Pending,
                    &format!("{}: still pending, check again later", lifecycle.label),
                );
                let uuid = lifecycle.uuid.clone();
                self.unsettled
                    .lock()
                    .insert(uuid, Unsettled { lifecycle, handle });
                match err {
                    CoordinatorError::ConfirmationTimedOut => {
                        TransactionOutcome::ConfirmationTimedOut
                    }
                    other => TransactionOutcome::ConfirmationUnavailable(other),
                }
            }
        }
    }

    fn roll_back(&self, lifecycle: Lifecycle, err: &CoordinatorError) {
        let Lifecycle {
            uuid,
            label,
            patch,
            on_failed,
            ..
        } = lifecycle;
        let removed = self.remove_patch(&patch);
        info!(?removed, "Rolled back optimistic values");
        self.run_callback("on_failed", on_failed, err);
        self.notifier.notify(
            &uuid,
            NotificationKind::Failed,
            &format!("{label}: failed: {err}"),
        );
    }

    fn remove_patch(&self, patch: &OptimisticPatch) -> Vec<String> {
        let removed = self.state.remove(patch);
        self.metrics.set_optimistic_keys(self.state.len());
        removed
    }

    fn notify_submitted(&self, lifecycle: &Lifecycle) {
        self.notifier.notify(
            &lifecycle.uuid,
            NotificationKind::Submitted,
            &format!("{}: transaction submitted", lifecycle.label),
        );
    }

    /// Runs a caller hook. Errors and panics are logged and counted; neither
    /// interrupts the lifecycle.
    fn run_callback<T: ?Sized>(
        &self,
        callback: &str,
        hook: Option<Box<dyn FnOnce(&T) -> eyre::Result<()> + Send>>,
        arg: &T,
    ) {
        let Some(hook) = hook else {
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| hook(arg)))
            .unwrap_or_else(|_| Err(eyre::eyre!("callback panicked")));
        if let Err(err) = result {
            warn!(callback, ?err, "Callback failed, continuing");
            self.metrics.update_callback_failure_metric(callback);
        }
    }

    fn finish(&self, outcome: TransactionOutcome) -> TransactionOutcome {
        self.metrics
            .set_in_flight_requests(self.pending.in_flight_count());
        self.metrics.update_outcome_metric(outcome.to_metrics_label());
        info!(outcome = outcome.to_metrics_label(), "Request finished");
        outcome
    }
}
