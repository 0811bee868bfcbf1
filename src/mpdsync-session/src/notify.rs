//! Subscription registry for snapshot, connection and error notifications.

use mpdsync_core::{ChangeSet, ChangedField, StatusSnapshot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::lock;

pub type FieldCallback = Arc<dyn Fn(&StatusSnapshot) + Send + Sync>;
pub type ConnectionCallback = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

#[derive(Default)]
struct Registry {
    fields: BTreeMap<SubscriptionId, (ChangedField, FieldCallback)>,
    connection: BTreeMap<SubscriptionId, ConnectionCallback>,
    errors: BTreeMap<SubscriptionId, ErrorCallback>,
}

/// Callbacks are invoked without the registry lock held, so a callback may
/// subscribe or unsubscribe.
#[derive(Default)]
pub struct Notifier {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("Notifier")
            .field("field_subscribers", &registry.fields.len())
            .field("connection_subscribers", &registry.connection.len())
            .field("error_subscribers", &registry.errors.len())
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe<F>(&self, field: ChangedField, callback: F) -> SubscriptionId
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        let id = self.allocate();
        lock(&self.registry)
            .fields
            .insert(id, (field, Arc::new(callback)));
        id
    }

    pub fn on_connection<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.allocate();
        lock(&self.registry).connection.insert(id, Arc::new(callback));
        id
    }

    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.allocate();
        lock(&self.registry).errors.insert(id, Arc::new(callback));
        id
    }

    /// Returns `false` when `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = lock(&self.registry);
        registry.fields.remove(&id).is_some()
            || registry.connection.remove(&id).is_some()
            || registry.errors.remove(&id).is_some()
    }

    /// One round of callbacks per changed field, in `ChangedField` order.
    /// Subscribers of a field run in subscription order.
    pub fn dispatch(&self, changed: &ChangeSet, snapshot: &StatusSnapshot) {
        if changed.is_empty() {
            return;
        }
        let subscribers: Vec<(ChangedField, FieldCallback)> = lock(&self.registry)
            .fields
            .values()
            .filter(|(field, _)| changed.contains(field))
            .map(|(field, callback)| (*field, Arc::clone(callback)))
            .collect();

        for field in changed {
            for (_, callback) in subscribers.iter().filter(|(f, _)| f == field) {
                callback(snapshot);
            }
        }
    }

    pub fn connection(&self, event: ConnectionEvent) {
        let subscribers: Vec<ConnectionCallback> =
            lock(&self.registry).connection.values().cloned().collect();
        for callback in subscribers {
            callback(event);
        }
    }

    pub fn error(&self, message: &str) {
        let subscribers: Vec<ErrorCallback> =
            lock(&self.registry).errors.values().cloned().collect();
        for callback in subscribers {
            callback(message);
        }
    }
}
