//! Custom Resource Definitions for Tessera
//!
//! Both kinds share [`ResourceStatus`] and implement [`ManagedResource`],
//! which is what the generic reconcile plumbing in this crate works on.

mod placement_group;
mod types;
mod vpc;

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use placement_group::{
    PlacementGroup, PlacementGroupPolicy, PlacementGroupSpec, PlacementGroupType,
};
pub use types::{
    Condition, ConditionStatus, FailureReason, ResourceStatus, SecretRef, READY_CONDITION,
};
pub use vpc::{SubnetSpec, Vpc, VpcSpec};

/// A declarative object whose spec is reconciled against one remote resource
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Human-readable name of the remote resource kind, used in logs and errors
    const RESOURCE: &'static str;

    /// Remote identifier, `None` until created or adopted
    fn remote_id(&self) -> Option<i64>;

    /// Forget the remote identifier after the remote resource is released
    fn clear_remote_id(&mut self);

    /// Secret holding the API token for this object
    fn credentials_ref(&self) -> Option<&SecretRef>;

    /// Observed status, if any was written yet
    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// Observed status, created empty when absent
    fn resource_status_mut(&mut self) -> &mut ResourceStatus;

    /// Spec with every remote identifier cleared
    ///
    /// Two revisions with equal values differ at most in identifiers.
    fn spec_without_identifiers(&self) -> serde_json::Value;

    /// Finalizer this object places on its credentials Secret
    fn credentials_finalizer(&self) -> String {
        format!(
            "{}.{}.{}",
            Self::kind(&()).to_lowercase(),
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}

impl ManagedResource for PlacementGroup {
    const RESOURCE: &'static str = "placement group";

    fn remote_id(&self) -> Option<i64> {
        self.spec.pg_id
    }

    fn clear_remote_id(&mut self) {
        self.spec.pg_id = None;
    }

    fn credentials_ref(&self) -> Option<&SecretRef> {
        self.spec.credentials_ref.as_ref()
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    fn resource_status_mut(&mut self) -> &mut ResourceStatus {
        self.status.get_or_insert_with(ResourceStatus::default)
    }

    fn spec_without_identifiers(&self) -> serde_json::Value {
        let mut spec = self.spec.clone();
        spec.pg_id = None;
        serde_json::to_value(spec).unwrap_or_default()
    }
}

impl ManagedResource for Vpc {
    const RESOURCE: &'static str = "vpc";

    fn remote_id(&self) -> Option<i64> {
        self.spec.vpc_id
    }

    fn clear_remote_id(&mut self) {
        self.spec.vpc_id = None;
    }

    fn credentials_ref(&self) -> Option<&SecretRef> {
        self.spec.credentials_ref.as_ref()
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    fn resource_status_mut(&mut self) -> &mut ResourceStatus {
        self.status.get_or_insert_with(ResourceStatus::default)
    }

    fn spec_without_identifiers(&self) -> serde_json::Value {
        let mut spec = self.spec.clone();
        spec.vpc_id = None;
        for subnet in &mut spec.subnets {
            subnet.subnet_id = None;
        }
        serde_json::to_value(spec).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn vpc(vpc_id: Option<i64>, subnet_id: Option<i64>) -> Vpc {
        let mut vpc = Vpc::new(
            "net",
            VpcSpec {
                vpc_id,
                region: "us-ord".to_string(),
                description: None,
                subnets: vec![SubnetSpec {
                    label: "nodes".to_string(),
                    ipv4: None,
                    subnet_id,
                    retain: false,
                }],
                retain: false,
                credentials_ref: None,
            },
        );
        vpc.metadata = ObjectMeta {
            name: Some("net".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        };
        vpc
    }

    #[test]
    fn identifiers_are_stripped_for_comparison() {
        assert_eq!(
            vpc(None, None).spec_without_identifiers(),
            vpc(Some(5), Some(9)).spec_without_identifiers()
        );
    }

    #[test]
    fn credentials_finalizer_is_kind_namespace_name() {
        assert_eq!(vpc(None, None).credentials_finalizer(), "vpc.default.net");
    }

    #[test]
    fn status_is_created_on_demand() {
        let mut obj = vpc(None, None);
        assert!(obj.resource_status().is_none());
        obj.resource_status_mut().ready = true;
        assert!(obj.resource_status().is_some_and(|s| s.ready));
    }
}
