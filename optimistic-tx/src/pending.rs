use std::sync::Arc;

use tokio::sync::watch;

/// Process-wide "a transaction is in flight" flag, reference counted across
/// overlapping requests. UI affordances such as a disabled submit button follow it.
#[derive(Debug)]
pub struct PendingFlag {
    in_flight: watch::Sender<usize>,
}

impl Default for PendingFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingFlag {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self { in_flight }
    }

    /// Marks one more request as in flight until the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> PendingGuard {
        self.in_flight
            .send_modify(|count| *count = count.saturating_add(1));
        PendingGuard {
            flag: Arc::clone(self),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight_count() > 0
    }

    pub fn in_flight_count(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Receiver of the number of in-flight requests.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    fn release(&self) {
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Releases its share of the [`PendingFlag`] on drop, including when the
/// lifecycle future owning it is dropped early.
#[derive(Debug)]
#[must_use = "the flag is released as soon as the guard is dropped"]
pub struct PendingGuard {
    flag: Arc<PendingFlag>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.flag.release();
    }
}
