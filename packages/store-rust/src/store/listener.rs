//! Per-key save/error notifications.
//!
//! Defines [`StoreEvent`] and [`ListenerRegistry`], which fans events out
//! to every callback registered for a logical key. A panicking callback is
//! caught and logged so one misbehaving subscriber can never abort a save
//! or starve the other listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// Outcome delivered to listeners after a store operation touches a key.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The key's payload reached storage.
    Saved {
        /// The payload that was persisted.
        payload: Value,
    },
    /// A save for the key failed (validation rejection or exhausted
    /// retries); the key stays pending.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

/// Handle returned by [`ListenerRegistry::add`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Callback invoked with the logical key and the event.
pub type StoreListener = Arc<dyn Fn(&str, &StoreEvent) + Send + Sync>;

/// Registry of per-key listeners.
///
/// Callbacks run on the calling task, outside any registry lock, so a
/// listener may re-enter the registry (including removing itself).
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<String, Vec<(ListenerId, StoreListener)>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for a logical key and returns its handle.
    pub fn add<F>(&self, key: &str, listener: F) -> ListenerId
    where
        F: Fn(&str, &StoreEvent) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Unregisters a callback. Returns `true` if the handle was found.
    pub fn remove(&self, key: &str, id: ListenerId) -> bool {
        let Some(mut entry) = self.listeners.get_mut(key) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(listener_id, _)| *listener_id != id);
        let removed = entry.len() != before;
        let now_empty = entry.is_empty();
        drop(entry);
        if now_empty {
            self.listeners
                .remove_if(key, |_, callbacks| callbacks.is_empty());
        }
        removed
    }

    /// Number of listeners currently registered for a key.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.listeners.get(key).map_or(0, |entry| entry.len())
    }

    /// Delivers an event to every listener registered for `key`.
    ///
    /// Panics inside a callback are caught and logged; remaining listeners
    /// still run.
    pub fn notify(&self, key: &str, event: &StoreEvent) {
        let callbacks: Vec<(ListenerId, StoreListener)> = match self.listeners.get(key) {
            Some(entry) => entry.clone(),
            None => return,
        };
        for (id, callback) in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(key, event)));
            if outcome.is_err() {
                tracing::error!(key, listener = %id, "listener panicked during notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn saved(payload: Value) -> StoreEvent {
        StoreEvent::Saved { payload }
    }

    #[test]
    fn listener_receives_events_for_its_key() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        registry.add("customers", move |key, event| {
            assert_eq!(key, "customers");
            assert_eq!(event, &saved(json!({"id": 1})));
            counter.fetch_add(1, Ordering::Relaxed);
        });

        registry.notify("customers", &saved(json!({"id": 1})));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn listener_does_not_receive_other_keys() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        registry.add("customers", move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        registry.notify("route-plan", &saved(json!(null)));
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn all_listeners_for_a_key_are_notified() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&count);
            registry.add("customers", move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        registry.notify("customers", &saved(json!(1)));
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let id = registry.add("customers", move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        registry.notify("customers", &saved(json!(1)));
        assert!(registry.remove("customers", id));
        registry.notify("customers", &saved(json!(2)));

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(registry.count("customers"), 0);
    }

    #[test]
    fn remove_unknown_handle_returns_false() {
        let registry = ListenerRegistry::new();
        let id = registry.add("customers", |_, _| {});

        assert!(!registry.remove("route-plan", id));
        assert!(registry.remove("customers", id));
        assert!(!registry.remove("customers", id));
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        registry.add("customers", |_, _| {
            panic!("listener bug");
        });
        let counter = Arc::clone(&count);
        registry.add("customers", move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        registry.notify("customers", &saved(json!(1)));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn error_events_carry_the_message() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        registry.add("customers", move |_, event| {
            if let StoreEvent::Error { message } = event {
                sink.lock().push(message.clone());
            }
        });

        registry.notify(
            "customers",
            &StoreEvent::Error {
                message: "save failed after 3 attempts".to_string(),
            },
        );
        assert_eq!(seen.lock().as_slice(), ["save failed after 3 attempts"]);
    }
}
