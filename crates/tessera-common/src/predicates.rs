//! Dispatch filtering for watch events
//!
//! A reconcile that binds a freshly created remote identifier writes it back
//! to the object, which produces a watch event of its own. Reconciling that
//! event again would only re-read the same state, so it is dropped here.

use dashmap::DashMap;

use crate::crd::ManagedResource;
use crate::store::ObjectKey;

#[derive(Clone, Debug, PartialEq)]
struct Observed {
    remote_id: Option<i64>,
    spec: serde_json::Value,
    deleting: bool,
}

impl Observed {
    fn of<K: ManagedResource>(obj: &K) -> Self {
        Self {
            remote_id: obj.remote_id(),
            spec: obj.spec_without_identifiers(),
            deleting: obj.meta().deletion_timestamp.is_some(),
        }
    }
}

/// Suppresses updates whose only change is a newly bound identifier
///
/// Remembers the last delivered revision per object. The first event for an
/// object always passes.
#[derive(Default)]
pub struct IdentifierBindFilter {
    seen: DashMap<ObjectKey, Observed>,
}

impl IdentifierBindFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `obj` and decide whether it should be dispatched
    ///
    /// A terminating object without finalizers is about to be erased, so its
    /// history is dropped.
    pub fn should_dispatch<K: ManagedResource>(&self, obj: &K) -> bool {
        let meta = obj.meta();
        let finalizing = meta.deletion_timestamp.is_some()
            && meta.finalizers.as_ref().map_or(true, |f| f.is_empty());
        if finalizing {
            self.forget(obj);
            return true;
        }
        let current = Observed::of(obj);
        let previous = self.seen.insert(ObjectKey::of(obj), current.clone());
        match previous {
            Some(previous) => !is_identifier_bind(&previous, &current),
            None => true,
        }
    }

    /// Forget an object
    pub fn forget<K: ManagedResource>(&self, obj: &K) {
        self.seen.remove(&ObjectKey::of(obj));
    }
}

fn is_identifier_bind(previous: &Observed, current: &Observed) -> bool {
    previous.remote_id.is_none()
        && current.remote_id.is_some()
        && previous.spec == current.spec
        && previous.deleting == current.deleting
}
