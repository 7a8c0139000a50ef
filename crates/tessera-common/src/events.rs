//! Kubernetes Event recording for Tessera controllers
//!
//! Events are fire-and-forget: a failed publish is logged and never changes
//! the outcome of a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events on managed objects
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown under REASON in `kubectl get events`
pub mod reasons {
    /// Remote resource exists and is bound
    pub const PROVISIONED: &str = "Provisioned";
    /// Creation failed past its retry window
    pub const CREATE_ERROR: &str = "CreateError";
    /// Deletion failed past its retry window
    pub const DELETE_ERROR: &str = "DeleteError";
    /// Deletion is blocked by dependents that never detached
    pub const NOT_DELETING: &str = "NotDeleting";
    /// Remote resource is gone or released
    pub const DELETED: &str = "Deleted";
}

/// Event actions, shown under ACTION in `kubectl get events`
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Creating or adopting the remote resource
    pub const CREATE: &str = "Create";
    /// Deleting the remote resource
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reasons_match_condition_reasons() {
        assert_eq!(reasons::CREATE_ERROR, crate::crd::FailureReason::CreateError.as_str());
        assert_eq!(reasons::DELETE_ERROR, crate::crd::FailureReason::DeleteError.as_str());
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::NOT_DELETING,
                actions::DELETE,
                Some("test".to_string()),
            )
            .await;
    }
}
