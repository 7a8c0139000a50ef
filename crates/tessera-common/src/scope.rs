//! Per-reconcile resource scope
//!
//! A [`ResourceScope`] holds the object as last written, and the working copy
//! every step mutates. Changes are persisted when the scope is closed,
//! whatever the outcome of the reconcile; a step that must be durable before
//! a remote call can persist early with [`ResourceScope::persist`].

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::debug;

use crate::crd::ManagedResource;
use crate::store::{ObjectKey, ObjectStore};
use crate::Error;

/// Working state of one reconcile
pub struct ResourceScope<K: ManagedResource> {
    /// Working copy, persisted on close
    pub object: K,
    original: K,
    store: Arc<dyn ObjectStore<K>>,
    closed: bool,
}

impl<K: ManagedResource> ResourceScope<K> {
    /// Open a scope over `object` as just read from `store`
    pub fn new(object: K, store: Arc<dyn ObjectStore<K>>) -> Self {
        Self {
            original: object.clone(),
            object,
            store,
            closed: false,
        }
    }

    /// Key of the scoped object
    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(&self.object)
    }

    /// Whether the working copy differs from the object as last written
    pub fn is_dirty(&self) -> bool {
        serde_json::to_value(&self.object).ok() != serde_json::to_value(&self.original).ok()
    }

    /// Write the working copy now and continue from the stored revision
    pub async fn persist(&mut self) -> Result<(), Error> {
        if !self.is_dirty() {
            return Ok(());
        }
        debug!(object = %self.key(), "persisting scope");
        let stored = self.store.patch(&self.original, &self.object).await?;
        self.original = stored.clone();
        self.object = stored;
        Ok(())
    }

    /// Persist the working copy; only the first call writes
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.persist().await
    }

    /// Close the scope within `limit` and combine its outcome with the
    /// reconcile result
    ///
    /// A close that fails because the object is gone is not an error.
    pub async fn finish(
        mut self,
        result: Result<Action, Error>,
        limit: Duration,
    ) -> Result<Action, Error> {
        let closed = match tokio::time::timeout(limit, self.close()).await {
            Ok(closed) => closed,
            Err(_) => Err(Error::timeout(format!("persist {}", self.key()), limit)),
        };
        match (result, closed) {
            (result, Ok(())) => result,
            (result, Err(e)) if e.is_not_found() => {
                debug!(object = %self.key(), "object removed before scope closed");
                result
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(reconcile), Err(close)) => Err(reconcile.join(close)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PlacementGroup, PlacementGroupSpec};
    use crate::store::MemoryObjectStore;
    use kube::ResourceExt;

    fn pg() -> PlacementGroup {
        let mut pg = PlacementGroup::new(
            "workers",
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

    const LIMIT: Duration = Duration::from_secs(5);

    fn open(store: &Arc<MemoryObjectStore<PlacementGroup>>) -> ResourceScope<PlacementGroup> {
        let key = ObjectKey::new("default", "workers");
        let obj = store.object(&key).unwrap();
        ResourceScope::new(obj, store.clone())
    }

    #[tokio::test]
    async fn close_writes_once() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(pg()).unwrap();
        let mut scope = open(&store);
        scope.object.spec.pg_id = Some(7);

        scope.close().await.unwrap();
        scope.close().await.unwrap();

        assert_eq!(store.patch_count(), 1);
        let key = ObjectKey::new("default", "workers");
        assert_eq!(store.object(&key).unwrap().spec.pg_id, Some(7));
    }

    #[tokio::test]
    async fn unchanged_scope_does_not_write() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(pg()).unwrap();
        let scope = open(&store);

        let action = scope.finish(Ok(Action::await_change()), LIMIT).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_error_is_joined_with_conflict() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(pg()).unwrap();
        let mut scope = open(&store);

        // A concurrent writer moves the stored revision on.
        let mut stale = open(&store);
        stale.object.spec.retain = true;
        stale.close().await.unwrap();

        scope.object.spec.pg_id = Some(1);
        let err = scope
            .finish(Err(Error::internal("boom")), LIMIT)
            .await
            .unwrap_err();
        match err {
            Error::Joined(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[1].is_conflict());
            }
            other => panic!("expected joined error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn persist_rebases_onto_stored_revision() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(pg()).unwrap();
        let mut scope = open(&store);

        scope.object.metadata.finalizers = Some(vec!["example.dev/finalizer".to_string()]);
        scope.persist().await.unwrap();
        assert!(!scope.is_dirty());
        assert_eq!(scope.object.metadata.resource_version.as_deref(), Some("2"));

        // Later changes patch against the revision written above.
        scope.object.spec.pg_id = Some(3);
        scope.close().await.unwrap();

        assert_eq!(store.patch_count(), 2);
        let stored = store.object(&ObjectKey::new("default", "workers")).unwrap();
        assert_eq!(stored.spec.pg_id, Some(3));
        assert_eq!(stored.finalizers(), &["example.dev/finalizer".to_string()]);
    }

    #[tokio::test]
    async fn missing_object_on_close_keeps_result() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut scope: ResourceScope<PlacementGroup> = ResourceScope::new(pg(), store.clone());
        scope.object.spec.pg_id = Some(1);

        let action = scope
            .finish(Ok(Action::requeue(Duration::from_secs(5))), LIMIT)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }
}
