use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::request::RequestUuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Submitted,
    Confirmed,
    Failed,
    /// Neutral "still pending, check later" status, used when the outcome is unknown
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: RequestUuid,
    pub kind: NotificationKind,
    pub message: String,
}

/// Surfaces lifecycle events to the user. Notifications with the same `id`
/// replace each other, so one request shows a single evolving status line.
pub trait NotificationSink: Send + Sync + Debug {
    fn notify(&self, id: &RequestUuid, kind: NotificationKind, message: &str);
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, id: &RequestUuid, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Failed => {
                warn!(%id, ?kind, text = message, "Transaction notification")
            }
            _ => info!(%id, ?kind, text = message, "Transaction notification"),
        }
    }
}

/// In-memory toast area: keeps the current notification per id and everything
/// ever shown, in order.
#[derive(Debug, Default)]
pub struct ToastBoard {
    inner: Mutex<ToastBoardInner>,
}

#[derive(Debug, Default)]
struct ToastBoardInner {
    current: HashMap<RequestUuid, Notification>,
    history: Vec<Notification>,
}

impl ToastBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The toast currently displayed for `id`, if any
    pub fn current(&self, id: &RequestUuid) -> Option<Notification> {
        self.inner.lock().current.get(id).cloned()
    }

    /// Number of toasts on screen; replaced toasts are not counted
    pub fn visible(&self) -> usize {
        self.inner.lock().current.len()
    }

    pub fn history(&self) -> Vec<Notification> {
        self.inner.lock().history.clone()
    }

    pub fn history_for(&self, id: &RequestUuid) -> Vec<Notification> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|notification| &notification.id == id)
            .cloned()
            .collect()
    }

    pub fn dismiss(&self, id: &RequestUuid) {
        self.inner.lock().current.remove(id);
    }
}

impl NotificationSink for ToastBoard {
    fn notify(&self, id: &RequestUuid, kind: NotificationKind, message: &str) {
        let notification = Notification {
            id: id.clone(),
            kind,
            message: message.to_string(),
        };
        let mut inner = self.inner.lock();
        inner.current.insert(id.clone(), notification.clone());
        inner.history.push(notification);
    }
}
