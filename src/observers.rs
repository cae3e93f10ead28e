//! Weak observer registry with iteration-safe broadcast.
//!
//! Components that publish events (the dispatcher's capacity signal, the
//! push channel's open/closed signal) own an [`ObserverRegistry`]. Callers
//! subscribe with a closure and keep the returned [`Subscription`] alive for
//! as long as they want to be notified.
//!
//! # Architecture
//!
//! ```text
//!   Subscription ──(strong Arc)──► callback ◄──(Weak)── ObserverRegistry
//! ```
//!
//! The registry only holds weak references, so a dropped subscriber can
//! never be called. Dropping the [`Subscription`] also removes the entry
//! eagerly; entries whose callback died some other way are pruned on the
//! next broadcast.
//!
//! [`ObserverRegistry::broadcast`] snapshots the live callbacks under the
//! lock and invokes them after releasing it, so callbacks may subscribe or
//! unsubscribe (including themselves) without deadlocking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Callback<E> = dyn Fn(&E) + Send + Sync;

struct Registration<E: 'static> {
    id: u64,
    callback: Weak<Callback<E>>,
}

/// Registry of weakly held event callbacks.
pub struct ObserverRegistry<E: 'static> {
    entries: Mutex<Vec<Registration<E>>>,
    next_id: AtomicU64,
}

impl<E: 'static> fmt::Debug for ObserverRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E: 'static> ObserverRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register `callback`; it stays registered while the returned
    /// [`Subscription`] is alive.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let callback: Arc<Callback<E>> = Arc::new(callback);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Registration {
            id,
            callback: Arc::downgrade(&callback),
        });
        Subscription {
            id,
            registry: Arc::downgrade(self),
            _callback: callback,
        }
    }

    /// Deliver `event` to every live observer, returning how many were called.
    pub fn broadcast(&self, event: &E) -> usize {
        let live: Vec<Arc<Callback<E>>> = {
            let mut entries = self.lock();
            entries.retain(|entry| entry.callback.strong_count() > 0);
            entries.iter().filter_map(|entry| entry.callback.upgrade()).collect()
        };

        for callback in &live {
            callback(event);
        }
        live.len()
    }

    /// Number of registered observers whose callback is still alive.
    pub fn len(&self) -> usize {
        self.lock()
            .iter()
            .filter(|entry| entry.callback.strong_count() > 0)
            .count()
    }

    /// Returns `true` when no live observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|entry| entry.id != id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration<E>>> {
        // A panicking observer never runs under this lock, so poisoning
        // only means a panic elsewhere; the list itself is still consistent.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Keeps an observer registered; dropping it unregisters the callback.
#[must_use = "dropping a Subscription immediately unregisters the observer"]
pub struct Subscription<E: 'static> {
    id: u64,
    registry: Weak<ObserverRegistry<E>>,
    _callback: Arc<Callback<E>>,
}

impl<E: 'static> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<E: 'static> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_broadcast_reaches_live_subscribers() {
        let registry = ObserverRegistry::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_a = Arc::clone(&seen);
        let _a = registry.subscribe(move |v| {
            seen_a.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let seen_b = Arc::clone(&seen);
        let _b = registry.subscribe(move |v| {
            seen_b.fetch_add(*v as usize, Ordering::SeqCst);
        });

        assert_eq!(registry.broadcast(&5), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_dropped_subscription_is_not_called() {
        let registry = ObserverRegistry::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let sub = registry.subscribe(move |()| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.len(), 1);

        drop(sub);
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast(&()), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_subscribe_during_broadcast() {
        let registry = ObserverRegistry::<()>::new();
        let late: Arc<Mutex<Vec<Subscription<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let registry_clone = Arc::clone(&registry);
        let late_clone = Arc::clone(&late);
        let _sub = registry.subscribe(move |()| {
            let sub = registry_clone.subscribe(|()| {});
            late_clone.lock().unwrap().push(sub);
        });

        assert_eq!(registry.broadcast(&()), 1);
        // The observer added mid-broadcast is seen by the next one.
        assert_eq!(registry.broadcast(&()), 2);
    }

    #[test]
    fn test_subscription_outliving_registry_drops_cleanly() {
        let registry = ObserverRegistry::<()>::new();
        let sub = registry.subscribe(|()| {});
        drop(registry);
        drop(sub);
    }
}
