//! Reconcile suspension
//!
//! An object is paused when it carries the paused annotation itself, or when
//! the CAPI Cluster it is labelled with has `spec.paused` set. A paused
//! object is left untouched until the pause is lifted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::core::ObjectMeta;
use kube::Client;
use tracing::trace;

use crate::Error;

/// Annotation that pauses reconciliation of a single object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label naming the CAPI Cluster that owns an object
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Decides whether an object is currently paused
#[async_trait]
pub trait PauseResolver: Send + Sync {
    /// Whether reconciliation of the object described by `meta` is paused
    async fn is_paused(&self, meta: &ObjectMeta) -> Result<bool, Error>;
}

/// Whether the paused annotation is present, whatever its value
pub fn has_paused_annotation(annotations: &BTreeMap<String, String>) -> bool {
    annotations.contains_key(PAUSED_ANNOTATION)
}

/// Pause resolver that reads annotations and the owning CAPI Cluster
pub struct KubePauseResolver {
    client: Client,
    cluster_resource: ApiResource,
}

impl KubePauseResolver {
    /// Create a resolver using `client`
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("cluster.x-k8s.io", "v1beta1", "Cluster");
        Self {
            client,
            cluster_resource: ApiResource::from_gvk(&gvk),
        }
    }
}

#[async_trait]
impl PauseResolver for KubePauseResolver {
    async fn is_paused(&self, meta: &ObjectMeta) -> Result<bool, Error> {
        if meta.annotations.as_ref().is_some_and(has_paused_annotation) {
            return Ok(true);
        }
        let Some(cluster) = meta.labels.as_ref().and_then(|l| l.get(CLUSTER_NAME_LABEL)) else {
            return Ok(false);
        };
        let namespace = meta.namespace.as_deref().unwrap_or("default");
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.cluster_resource);
        let Some(cluster) = api.get_opt(cluster).await? else {
            trace!(cluster = %cluster, "owning cluster not found");
            return Ok(false);
        };
        Ok(cluster_is_paused(&cluster))
    }
}

/// Whether a CAPI Cluster object has `spec.paused: true`
pub fn cluster_is_paused(cluster: &DynamicObject) -> bool {
    cluster.data.pointer("/spec/paused").and_then(|v| v.as_bool()) == Some(true)
        || cluster
            .metadata
            .annotations
            .as_ref()
            .is_some_and(has_paused_annotation)
}

/// Resolver that never pauses, for tests and clusters without CAPI
pub struct NeverPaused;

#[async_trait]
impl PauseResolver for NeverPaused {
    async fn is_paused(&self, _meta: &ObjectMeta) -> Result<bool, Error> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(data: serde_json::Value) -> DynamicObject {
        let gvk = GroupVersionKind::gvk("cluster.x-k8s.io", "v1beta1", "Cluster");
        DynamicObject::new("mgmt", &ApiResource::from_gvk(&gvk)).data(data)
    }

    #[test]
    fn annotation_value_is_ignored() {
        let annotations = BTreeMap::from([(PAUSED_ANNOTATION.to_string(), String::new())]);
        assert!(has_paused_annotation(&annotations));
        assert!(!has_paused_annotation(&BTreeMap::new()));
    }

    #[test]
    fn cluster_pause_reads_spec() {
        assert!(cluster_is_paused(&cluster(
            serde_json::json!({"spec": {"paused": true}})
        )));
        assert!(!cluster_is_paused(&cluster(
            serde_json::json!({"spec": {"paused": false}})
        )));
        assert!(!cluster_is_paused(&cluster(serde_json::json!({}))));
    }

    #[tokio::test]
    async fn never_paused_ignores_annotations() {
        let meta = ObjectMeta {
            annotations: Some(BTreeMap::from([(
                PAUSED_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        };
        assert!(!NeverPaused.is_paused(&meta).await.unwrap());
    }
}
