//! Guid-keyed registry of live remote objects.
//!
//! Uses [`DashMap`] with a per-guid [`Notify`] so [`ObjectStore::wait_for`]
//! only wakes waiters for the guid that actually arrived, and registers the
//! waiter before checking to prevent lost wakeups. A guid is present iff the
//! object is live; removal is total.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::object::RemoteObject;

/// Registry of protocol objects by guid.
pub struct ObjectStore {
    objects: DashMap<Arc<str>, Arc<dyn RemoteObject>>,
    waiters: DashMap<Arc<str>, Arc<Notify>>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    /// Inserts an object and wakes any waiters for this guid.
    pub fn insert(&self, guid: Arc<str>, object: Arc<dyn RemoteObject>) {
        self.objects.insert(guid.clone(), object);
        if let Some((_, notify)) = self.waiters.remove(&guid) {
            notify.notify_waiters();
        }
    }

    pub fn remove(&self, guid: &str) {
        self.objects.remove(guid);
    }

    /// Synchronous lookup.
    pub fn try_get(&self, guid: &str) -> Option<Arc<dyn RemoteObject>> {
        self.objects.get(guid).map(|entry| entry.value().clone())
    }

    /// Evicts every object (connection close).
    pub fn clear(&self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Waits for an object to be registered, with timeout.
    ///
    /// A response may reference a guid whose `__create__` has not been
    /// dispatched yet; the waiter is registered before checking so the
    /// wakeup cannot be lost. The per-guid entry is released on every exit
    /// path, so guids that never arrive do not accumulate entries.
    pub async fn wait_for(&self, guid: &str, timeout: Duration) -> Result<Arc<dyn RemoteObject>> {
        let guid: Arc<str> = Arc::from(guid);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notify = self
                .waiters
                .entry(guid.clone())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone();
            let notified = notify.notified();

            if let Some(entry) = self.objects.get(&guid) {
                let object = entry.value().clone();
                drop(entry);
                drop(notified);
                self.release_waiter(&guid, &notify);
                return Ok(object);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                drop(notified);
                self.release_waiter(&guid, &notify);
                return Err(Error::Timeout(format!("timeout waiting for object: {guid}")));
            }

            // On timer fire the loop re-checks the registry once more before
            // giving up, which also covers a wakeup lost to another waiter
            // releasing the entry.
            tokio::select! {
                biased;
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }

    /// Drops the per-guid notify entry, but only while no other waiter holds
    /// a clone of it: a live waiter always owns one, and removing the entry
    /// under it would disconnect it from `insert`'s wakeup.
    fn release_waiter(&self, guid: &Arc<str>, notify: &Arc<Notify>) {
        self.waiters
            .remove_if(guid, |_, entry| {
                Arc::ptr_eq(entry, notify) && Arc::strong_count(entry) <= 2
            });
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}
