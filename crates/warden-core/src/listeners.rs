//! Weak observer registrations shared by the table and location services.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<(SubscriptionId, Weak<L>)>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, listener: Weak<L>) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Live listeners; dropped ones are pruned.
    pub(crate) fn live(&self) -> Vec<Arc<L>> {
        let mut listeners = self.lock();
        let mut live = Vec::with_capacity(listeners.len());
        listeners.retain(|(_, weak)| match weak.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        live
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Weak<L>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L: ?Sized> fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("registered", &self.len())
            .finish()
    }
}
