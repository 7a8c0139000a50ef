//! Desired-state store accessor
//!
//! [`ObjectStore`] reads a managed object and writes back the changes one
//! reconcile made to it. Writes carry the resource version the object was
//! read at, so a concurrent external edit turns into a 409 instead of being
//! overwritten.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::crd::ManagedResource;
use crate::Error;

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "tessera-controller";

/// Namespace and name of a managed object
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Build a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn of<K: ManagedResource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read and write access to managed objects
#[async_trait]
pub trait ObjectStore<K: ManagedResource>: Send + Sync {
    /// Fetch the latest revision; `None` when the object no longer exists
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, Error>;

    /// Persist the difference between `original` and `updated`
    ///
    /// Returns the object as stored afterwards. Fails with a conflict when the
    /// stored object moved past the revision `original` was read at, and with
    /// not-found when it is gone.
    async fn patch(&self, original: &K, updated: &K) -> Result<K, Error>;
}

/// Compute a JSON merge patch turning `old` into `new`
///
/// Returns `None` when they are equal. Removed keys become `null`; arrays
/// are replaced whole, matching RFC 7386.
pub fn merge_diff(old: &Value, new: &Value) -> Option<Value> {
    if old == new {
        return None;
    }
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) => {
                        if let Some(diff) = merge_diff(old_value, new_value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(new.clone()),
    }
}

fn to_value<K: ManagedResource>(obj: &K) -> Result<Value, Error> {
    serde_json::to_value(obj)
        .map_err(|e| Error::internal_with_context("store", format!("serialize object: {e}")))
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeObjectStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeObjectStore<K> {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: ManagedResource> ObjectStore<K> for KubeObjectStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn patch(&self, original: &K, updated: &K) -> Result<K, Error> {
        let key = ObjectKey::of(updated);
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let params = PatchParams::apply(FIELD_MANAGER);

        let old = to_value(original)?;
        let new = to_value(updated)?;
        let mut resource_version = original.resource_version();
        let mut stored = None;

        if let Some(status) = merge_diff(&old["status"], &new["status"]) {
            trace!(object = %key, "patching status");
            let patch = json!({
                "metadata": { "resourceVersion": resource_version },
                "status": status,
            });
            let patched = api
                .patch_status(&key.name, &params, &Patch::Merge(&patch))
                .await?;
            resource_version = patched.resource_version();
            stored = Some(patched);
        }

        let spec = merge_diff(&old["spec"], &new["spec"]);
        let finalizers_changed = original.finalizers() != updated.finalizers();
        if spec.is_some() || finalizers_changed {
            trace!(object = %key, finalizers_changed, "patching object");
            let mut metadata = json!({ "resourceVersion": resource_version });
            if finalizers_changed {
                metadata["finalizers"] = json!(updated.finalizers());
            }
            let mut patch = json!({ "metadata": metadata });
            if let Some(spec) = spec {
                patch["spec"] = spec;
            }
            stored = Some(api.patch(&key.name, &params, &Patch::Merge(&patch)).await?);
        }

        debug!(object = %key, "persisted reconcile changes");
        Ok(stored.unwrap_or_else(|| updated.clone()))
    }
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube {
        source: kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            code,
        }),
    }
}

/// In-memory [`ObjectStore`] for tests
///
/// Enforces resource versions like the API server and erases an object once
/// it is terminating and has no finalizers left.
pub struct MemoryObjectStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    patches: Mutex<usize>,
}

impl<K: ManagedResource> Default for MemoryObjectStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            patches: Mutex::new(0),
        }
    }
}

impl<K: ManagedResource> MemoryObjectStore<K> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `obj`, assigning resource version "1" when it has none
    pub fn insert(&self, mut obj: K) -> Result<(), Error> {
        if obj.meta().resource_version.is_none() {
            obj.meta_mut().resource_version = Some("1".to_string());
        }
        self.lock()?.insert(ObjectKey::of(&obj), obj);
        Ok(())
    }

    /// Current revision of an object
    pub fn object(&self, key: &ObjectKey) -> Option<K> {
        self.lock().ok().and_then(|m| m.get(key).cloned())
    }

    /// Number of successful patches
    pub fn patch_count(&self) -> usize {
        self.patches.lock().map(|p| *p).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ObjectKey, K>>, Error> {
        self.objects
            .lock()
            .map_err(|_| Error::internal_with_context("memory-store", "lock poisoned"))
    }
}

#[async_trait]
impl<K: ManagedResource> ObjectStore<K> for MemoryObjectStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, Error> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn patch(&self, original: &K, updated: &K) -> Result<K, Error> {
        let key = ObjectKey::of(updated);
        let mut objects = self.lock()?;
        let Some(stored) = objects.get(&key) else {
            return Err(api_error(404, "NotFound", format!("{key} not found")));
        };
        if stored.resource_version() != original.resource_version() {
            return Err(api_error(
                409,
                "Conflict",
                format!("{key} was modified concurrently"),
            ));
        }

        let next = stored
            .resource_version()
            .and_then(|rv| rv.parse::<u64>().ok())
            .unwrap_or_default()
            + 1;
        let mut obj = updated.clone();
        obj.meta_mut().resource_version = Some(next.to_string());

        if obj.meta().deletion_timestamp.is_some() && obj.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, obj.clone());
        }
        drop(objects);

        if let Ok(mut patches) = self.patches.lock() {
            *patches += 1;
        }
        Ok(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PlacementGroup, PlacementGroupSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn pg(name: &str) -> PlacementGroup {
        let mut pg = PlacementGroup::new(
            name,
            PlacementGroupSpec {
                pg_id: None,
                region: "us-ord".to_string(),
                placement_group_type: Default::default(),
                placement_group_policy: Default::default(),
                retain: false,
                credentials_ref: None,
            },
        );
        pg.metadata.namespace = Some("default".to_string());
        pg
    }

    #[test]
    fn diff_nulls_removed_keys_and_recurses() {
        let old = json!({"ready": true, "failureReason": "CreateError", "nested": {"a": 1, "b": 2}});
        let new = json!({"ready": false, "nested": {"a": 1, "b": 3}});
        assert_eq!(
            merge_diff(&old, &new),
            Some(json!({"ready": false, "failureReason": null, "nested": {"b": 3}}))
        );
    }

    #[test]
    fn diff_of_equal_values_is_none() {
        let v = json!({"conditions": [{"type": "Ready"}]});
        assert!(merge_diff(&v, &v).is_none());
    }

    #[test]
    fn diff_from_null_is_whole_value() {
        let new = json!({"ready": true});
        assert_eq!(merge_diff(&Value::Null, &new), Some(new));
    }

    #[tokio::test]
    async fn memory_store_rejects_stale_revisions() {
        let store = MemoryObjectStore::new();
        store.insert(pg("a")).unwrap();
        let key = ObjectKey::new("default", "a");

        let read = store.get(&key).await.unwrap().unwrap();
        let mut first = read.clone();
        first.spec.pg_id = Some(1);
        let written = store.patch(&read, &first).await.unwrap();
        assert_eq!(written.resource_version().as_deref(), Some("2"));

        let mut second = read.clone();
        second.spec.pg_id = Some(2);
        let err = store.patch(&read, &second).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.object(&key).unwrap().spec.pg_id, Some(1));
    }

    #[tokio::test]
    async fn memory_store_erases_terminating_object_without_finalizers() {
        let store = MemoryObjectStore::new();
        let mut obj = pg("gone");
        obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        obj.metadata.finalizers = Some(vec!["x".to_string()]);
        store.insert(obj).unwrap();
        let key = ObjectKey::new("default", "gone");

        let read = store.get(&key).await.unwrap().unwrap();
        let mut updated = read.clone();
        updated.metadata.finalizers = Some(vec![]);
        store.patch(&read, &updated).await.unwrap();

        assert!(store.get(&key).await.unwrap().is_none());
        let err = store.patch(&read, &updated).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
