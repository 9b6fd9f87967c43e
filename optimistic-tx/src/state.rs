use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

/// Tentative values a request expects to see once it confirms, keyed by UI field.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct OptimisticPatch(BTreeMap<String, Value>);

impl OptimisticPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for OptimisticPatch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, Value>> for OptimisticPatch {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self(values)
    }
}

/// Point-in-time copy of the overlay. `version` increases on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub values: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Process-wide overlay of assumed results for transactions that are still in flight.
///
/// This is not a cache: durable state lives on-chain or on a server, and an entry
/// only exists while the request that wrote it is waiting for its outcome.
#[derive(Debug)]
pub struct OptimisticState {
    inner: Mutex<Snapshot>,
    sender: watch::Sender<Snapshot>,
}

impl Default for OptimisticState {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticState {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Snapshot::default());
        Self {
            inner: Mutex::new(Snapshot::default()),
            sender,
        }
    }

    /// Merges `patch` into the overlay, last writer wins per key.
    pub fn apply(&self, patch: &OptimisticPatch) {
        if patch.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for (key, value) in patch.iter() {
            inner.values.insert(key.clone(), value.clone());
        }
        inner.version = inner.version.saturating_add(1);
        debug!(keys = ?patch.keys().collect::<Vec<_>>(), version = inner.version, "Applied optimistic patch");
        self.sender.send_replace(inner.clone());
    }

    /// Removes each key of `patch` whose current value is still the one `patch` wrote.
    /// Keys overwritten by a newer request are left alone. Returns the removed keys.
    pub fn remove(&self, patch: &OptimisticPatch) -> Vec<String> {
        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        for (key, expected) in patch.iter() {
            if inner.values.get(key) == Some(expected) {
                inner.values.remove(key);
                removed.push(key.clone());
            }
        }
        if !removed.is_empty() {
            inner.version = inner.version.saturating_add(1);
            self.sender.send_replace(inner.clone());
        }
        debug!(?removed, version = inner.version, "Removed optimistic values");
        removed
    }

    pub fn read(&self) -> Snapshot {
        self.inner.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }

    /// Drops every optimistic value, e.g. on logout or navigation teardown.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.values.is_empty() {
            return;
        }
        inner.values.clear();
        inner.version = inner.version.saturating_add(1);
        self.sender.send_replace(inner.clone());
    }

    /// Receiver that observes a new snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.sender.subscribe()
    }
}
