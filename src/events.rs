//! Synchronous publish/subscribe used for store, state and controller
//! notifications.
//!
//! Subscribers are invoked in subscription order on the emitting thread.
//! The subscriber list is cloned before dispatch, so a callback may
//! subscribe or unsubscribe without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A list of callbacks interested in events of type `E`.
pub struct Subscribers<E> {
    next_id: AtomicU64,
    slots: Mutex<Vec<(u64, Callback<E>)>>,
}

impl<E: 'static> Subscribers<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(Vec::new()),
        })
    }

    /// Register `callback`. It stays connected until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().push((id, Arc::new(callback)));
        Subscription {
            id,
            owner: Arc::downgrade(self),
        }
    }

    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> =
            self.slots.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn remove(&self, id: u64) {
        self.slots.lock().retain(|(slot, _)| *slot != id);
    }
}

/// RAII handle for a registered callback.
pub struct Subscription<E: 'static> {
    id: u64,
    owner: Weak<Subscribers<E>>,
}

impl<E: 'static> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove(self.id);
        }
    }
}

impl<E: 'static> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_subscribers_in_order() {
        let subscribers = Subscribers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let _a = subscribers.subscribe(move |v| first.lock().push(("a", *v)));
        let second = seen.clone();
        let _b = subscribers.subscribe(move |v| second.lock().push(("b", *v)));

        subscribers.emit(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let subscribers = Subscribers::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let sub = subscribers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscribers.emit(&1);
        drop(sub);
        subscribers.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let subscribers = Subscribers::<u32>::new();
        let nested = Arc::new(Mutex::new(Vec::new()));

        let inner = subscribers.clone();
        let keep = nested.clone();
        let _sub = subscribers.subscribe(move |_| {
            keep.lock().push(inner.subscribe(|_| {}));
        });

        subscribers.emit(&1);
        assert_eq!(subscribers.len(), 2);
    }
}
