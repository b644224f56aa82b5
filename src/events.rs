//! Process-wide publish/subscribe.
//!
//! Delivery is synchronous: [`EventBus::publish`] calls every listener that is
//! registered at the moment of publishing, in registration order, before it
//! returns. Listeners are invoked outside the registry lock so they may
//! subscribe or unsubscribe from inside a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registry<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

pub struct EventBus<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.registry.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Returns false if the subscription was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.registry.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _)| *existing != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    /// Delivers `event` to the current listeners and returns how many were called.
    pub fn publish(&self, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = match self.registry.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return 0,
        };
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Drops every listener.
    pub fn reset(&self) {
        if let Ok(mut listeners) = self.registry.listeners.lock() {
            listeners.clear();
        }
    }
}
