//! Push-delivery subscriptions.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::warn;

use crate::models::result::ExecutionResult;

/// Callback invoked with every pushed snapshot.
pub type Callback = Arc<dyn Fn(&ExecutionResult) + Send + Sync>;

/// Registered callbacks, keyed by subscription id.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
}

impl Subscribers {
    pub(crate) fn add(registry: &Arc<Mutex<Self>>, callback: Callback) -> Subscription {
        let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
        guard.next_id += 1;
        let id = guard.next_id;
        guard.callbacks.insert(id, callback);
        Subscription {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub(crate) fn clear(registry: &Mutex<Self>) {
        registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .clear();
    }

    /// Invoke every callback outside the lock. A panicking callback is
    /// logged and does not affect the others.
    pub(crate) fn notify(registry: &Mutex<Self>, snapshot: &ExecutionResult) {
        let callbacks: Vec<(u64, Callback)> = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                warn!(subscription = id, "subscriber callback panicked");
            }
        }
    }

    fn remove(&mut self, id: u64) {
        self.callbacks.remove(&id);
    }
}

/// Handle to a registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Subscribers>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Stop receiving pushes.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn detach(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
