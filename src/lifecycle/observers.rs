//! Handle-keyed store of helper-stop callbacks.
//!
//! The launcher never sees a callback. It is given an integer handle and tags
//! each stop event with it; the event pump resolves the handle here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type ObserverId = u64;

/// Callback invoked with `(app_id, instance_id, helper_kind)`.
pub type Observer = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

struct Registration {
    observer: Observer,
    helper_kind: String,
}

#[derive(Default)]
struct Inner {
    observers: HashMap<ObserverId, Registration>,
    last_id: ObserverId,
}

/// Owned by the service and shared with every purchase in flight.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: RwLock<Inner>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `observer` for events of `helper_kind`. Ids are never reused.
    pub fn add(&self, helper_kind: impl Into<String>, observer: Observer) -> ObserverId {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.last_id += 1;
        let id = inner.last_id;
        inner.observers.insert(
            id,
            Registration {
                observer,
                helper_kind: helper_kind.into(),
            },
        );
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.observers.remove(&id).is_some()
    }

    /// Returns the callback and its helper kind.
    pub fn lookup(&self, id: ObserverId) -> Option<(Observer, String)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .observers
            .get(&id)
            .map(|r| (Arc::clone(&r.observer), r.helper_kind.clone()))
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .observers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
