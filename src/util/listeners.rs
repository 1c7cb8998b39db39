//! Ordered subscriber lists with per-listener panic isolation.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::lock::mutex_lock;

/// Handle returned by [`ListenerList::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ids are unique across every list so a component owning several lists can
/// route `unsubscribe` without knowing which list an id came from.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Listeners are invoked in subscription order. A panicking listener is
/// logged and skipped; the remaining listeners still receive the event.
pub struct ListenerList<E> {
    source: &'static str,
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

impl<E> ListenerList<E> {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        mutex_lock(&self.listeners, self.source, "subscribe").push((id, Arc::new(listener)));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = mutex_lock(&self.listeners, self.source, "unsubscribe");
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: &E) {
        // Snapshot so listeners may (un)subscribe while being notified.
        let listeners: Vec<_> = mutex_lock(&self.listeners, self.source, "emit")
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(
                    target_module = self.source,
                    subscription = %id,
                    "Listener panicked; continuing with remaining listeners"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.listeners, self.source, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
