//! Handler registry for indications and requests.
//!
//! The broker keeps one process-wide list of indication callbacks and one of
//! request callbacks. Every indication or request received on any accepted
//! connection is handed to all callbacks of the matching list, in
//! registration order. Registering the same `Arc` twice is a no-op.

use std::sync::{Arc, Mutex, MutexGuard};

use super::Responder;
use crate::protocol::Payload;

/// Callback invoked with `(name, payload)` for every received indication.
pub type IndicationCallback = Arc<dyn Fn(&str, Option<&Payload>) + Send + Sync>;

/// Callback invoked with `(name, payload, responder)` for every received request.
pub type RequestCallback = Arc<dyn Fn(&str, Option<&Payload>, Responder) + Send + Sync>;

/// Registry of process-wide indication and request callbacks.
#[derive(Default)]
pub struct HandlerRegistry {
    indications: Mutex<Vec<IndicationCallback>>,
    requests: Mutex<Vec<RequestCallback>>,
}

/// Lock a mutex, recovering the data if a callback panicked while it was held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an indication callback. Returns `false` if it was already registered.
    pub fn add_indication(&self, callback: IndicationCallback) -> bool {
        let mut list = lock(&self.indications);
        if list.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            return false;
        }
        list.push(callback);
        true
    }

    /// Register a request callback. Returns `false` if it was already registered.
    pub fn add_request(&self, callback: RequestCallback) -> bool {
        let mut list = lock(&self.requests);
        if list.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            return false;
        }
        list.push(callback);
        true
    }

    /// Number of registered indication callbacks.
    pub fn indication_count(&self) -> usize {
        lock(&self.indications).len()
    }

    /// Number of registered request callbacks.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Invoke every indication callback.
    pub fn dispatch_indication(&self, name: &str, payload: Option<&Payload>) {
        // Snapshot so callbacks may register further callbacks.
        let callbacks = lock(&self.indications).clone();
        for callback in callbacks {
            callback(name, payload);
        }
    }

    /// Invoke every request callback, each with its own responder.
    pub fn dispatch_request(&self, name: &str, payload: Option<&Payload>, responder: Responder) {
        let callbacks = lock(&self.requests).clone();
        if callbacks.is_empty() {
            tracing::debug!("No request handler for '{}'", name);
            return;
        }
        for callback in callbacks {
            callback(name, payload, responder.fork());
        }
    }

    /// Remove every callback.
    pub fn clear(&self) {
        lock(&self.indications).clear();
        lock(&self.requests).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_add_is_idempotent_per_arc() {
        let registry = HandlerRegistry::new();
        let callback: IndicationCallback = Arc::new(|_name: &str, _payload: Option<&Payload>| {});

        assert!(registry.add_indication(callback.clone()));
        assert!(!registry.add_indication(callback.clone()));
        assert_eq!(registry.indication_count(), 1);

        let other: IndicationCallback = Arc::new(|_name: &str, _payload: Option<&Payload>| {});
        assert!(registry.add_indication(other));
        assert_eq!(registry.indication_count(), 2);
    }

    #[test]
    fn test_dispatch_indication_reaches_all() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            let callback: IndicationCallback =
                Arc::new(move |name: &str, payload: Option<&Payload>| {
                    assert_eq!(name, "door");
                    assert_eq!(payload, Some(&json!("open")));
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            registry.add_indication(callback);
        }

        registry.dispatch_indication("door", Some(&json!("open")));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dispatch_request_forks_responder() {
        let registry = HandlerRegistry::new();
        let sessions = Arc::new(Mutex::new(Vec::new()));

        let seen = sessions.clone();
        let callback: RequestCallback = Arc::new(
            move |name: &str, payload: Option<&Payload>, responder: Responder| {
                assert_eq!(name, "add");
                assert_eq!(payload, None);
                seen.lock().unwrap().push(responder.session());
            },
        );
        assert!(registry.add_request(callback.clone()));
        assert!(!registry.add_request(callback));

        registry.dispatch_request("add", None, Responder::detached("add", 4));
        assert_eq!(*sessions.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_clear() {
        let registry = HandlerRegistry::new();
        registry.add_indication(Arc::new(|_name: &str, _payload: Option<&Payload>| {}));
        registry.add_request(Arc::new(
            |_name: &str, _payload: Option<&Payload>, _responder: Responder| {},
        ));

        registry.clear();
        assert_eq!(registry.indication_count(), 0);
        assert_eq!(registry.request_count(), 0);
    }
}
