use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

/// Handle returned by `subscribe`, used to detach a single listener.
pub type SubscriptionId = Uuid;

/// Callback registered on a store or channel.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry of push-notification callbacks.
///
/// Delivery is isolated per listener: one that panics is logged and the rest still run.
pub struct ListenerSet<T> {
    listeners: DashMap<SubscriptionId, Listener<T>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }
}

impl<T> ListenerSet<T> {
    pub fn add(&self, listener: Listener<T>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.listeners.insert(id, listener);
        id
    }

    /// Detach one listener; unknown ids are ignored.
    pub fn remove(&self, id: &SubscriptionId) -> bool {
        self.listeners.remove(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    /// Deliver `payload` to every listener registered at call time.
    pub fn dispatch(&self, payload: &T) {
        // Snapshot first so a listener may (un)subscribe without deadlocking the map.
        let listeners = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect::<Vec<_>>();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!(subscription = %id, "listener panicked; continuing delivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn faulty_listener_does_not_block_others() {
        let set = ListenerSet::<u32>::default();
        let hits = Arc::new(AtomicUsize::new(0));

        set.add(Arc::new(|_| panic!("boom")));
        let counter = hits.clone();
        set.add(Arc::new(move |value| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
        }));

        set.dispatch(&3);
        set.dispatch(&4);
        assert_eq!(hits.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let set = ListenerSet::<u32>::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = set.add(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        set.dispatch(&1);
        assert!(set.remove(&id));
        assert!(!set.remove(&id));
        set.dispatch(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }
}
