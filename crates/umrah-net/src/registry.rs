//! Keyed publish/subscribe registry for event handlers.
//!
//! Handlers for one key are invoked in registration order. Registering the
//! same handler (same `Arc`) twice for a key bumps a reference count instead
//! of adding a second entry; each registration hands back a [`Subscription`]
//! and the entry is removed once every subscription for it is dropped.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A shared event handler.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<T, F>(f: F) -> Handler<T>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Entry<T> {
    id: u64,
    handler: Handler<T>,
    refs: usize,
}

struct Inner<K, T> {
    next_id: u64,
    entries: HashMap<K, Vec<Entry<T>>>,
}

/// Registry of handlers grouped by key.
pub struct HandlerRegistry<K, T> {
    inner: Arc<Mutex<Inner<K, T>>>,
}

impl<K, T> HandlerRegistry<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Register `handler` under `key`.
    pub fn register(&self, key: K, handler: Handler<T>) -> Subscription {
        let id = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let existing = inner
                .entries
                .get_mut(&key)
                .and_then(|list| {
                    list.iter_mut()
                        .find(|entry| Arc::ptr_eq(&entry.handler, &handler))
                })
                .map(|entry| {
                    entry.refs += 1;
                    entry.id
                });
            match existing {
                Some(id) => id,
                None => {
                    inner.next_id += 1;
                    let id = inner.next_id;
                    inner.entries.entry(key.clone()).or_default().push(Entry {
                        id,
                        handler,
                        refs: 1,
                    });
                    id
                }
            }
        };

        let weak: Weak<Mutex<Inner<K, T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                release(&mut inner, &key, id);
            }
        })
    }

    /// Invoke every handler registered under `key`, in order.
    ///
    /// The handler list is snapshotted first so handlers may register or
    /// drop subscriptions without deadlocking.
    pub fn emit(&self, key: &K, value: &T) -> usize {
        let handlers: Vec<Handler<T>> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            match inner.entries.get(key) {
                Some(list) => list.iter().map(|e| e.handler.clone()).collect(),
                None => return 0,
            }
        };
        for h in &handlers {
            h(value);
        }
        handlers.len()
    }

    /// Number of distinct handlers under `key`.
    pub fn handler_count(&self, key: &K) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(key).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.is_empty()
    }
}

fn release<K: Eq + Hash, T>(inner: &mut Inner<K, T>, key: &K, id: u64) {
    let Some(list) = inner.entries.get_mut(key) else {
        return;
    };
    if let Some(pos) = list.iter().position(|e| e.id == id) {
        list[pos].refs -= 1;
        if list[pos].refs == 0 {
            list.remove(pos);
        }
    }
    if list.is_empty() {
        inner.entries.remove(key);
    }
}

impl<K, T> Default for HandlerRegistry<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Clone for HandlerRegistry<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Disposer for one handler registration. Dropping it deregisters.
#[must_use = "dropping a Subscription deregisters its handler"]
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Deregister now.
    pub fn dispose(mut self) {
        if let Some(d) = self.disposer.take() {
            d();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(d) = self.disposer.take() {
            d();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.disposer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_run_in_registration_order() {
        let registry: HandlerRegistry<u64, String> = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let _a = registry.register(1, handler(move |v: &String| s1.lock().unwrap().push(format!("a:{v}"))));
        let s2 = seen.clone();
        let _b = registry.register(1, handler(move |v: &String| s2.lock().unwrap().push(format!("b:{v}"))));

        assert_eq!(registry.emit(&1, &"x".to_string()), 2);
        assert_eq!(registry.emit(&2, &"y".to_string()), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["a:x", "b:x"]);
    }

    #[test]
    fn test_same_handler_is_reference_counted() {
        let registry: HandlerRegistry<u64, ()> = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let h: Handler<()> = handler(move |_: &()| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let first = registry.register(7, h.clone());
        let second = registry.register(7, h.clone());
        assert_eq!(registry.handler_count(&7), 1);

        registry.emit(&7, &());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        first.dispose();
        assert_eq!(registry.handler_count(&7), 1);
        drop(second);
        assert_eq!(registry.handler_count(&7), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removing_one_consumer_keeps_others() {
        let registry: HandlerRegistry<u64, ()> = HandlerRegistry::new();
        let a = registry.register(3, handler(|_: &()| {}));
        let _b = registry.register(3, handler(|_: &()| {}));
        drop(a);
        assert_eq!(registry.handler_count(&3), 1);
    }

    #[test]
    fn test_subscription_released_from_another_thread() {
        let registry: HandlerRegistry<String, ()> = HandlerRegistry::new();
        let sub = registry.register("private-chat.9".to_string(), handler(|_: &()| {}));
        assert_eq!(registry.handler_count(&"private-chat.9".to_string()), 1);

        std::thread::spawn(move || drop(sub)).join().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subscription_outliving_registry_is_harmless() {
        let registry: HandlerRegistry<u64, ()> = HandlerRegistry::new();
        let sub = registry.register(1, handler(|_: &()| {}));
        drop(registry);
        drop(sub);
    }
}
