//! PlacementGroup CRD
//!
//! A PlacementGroup declares an anti-affinity group that compute nodes can
//! join. Dependents are the group's members.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ResourceStatus, SecretRef};

/// PlacementGroup is the desired state of one remote placement group.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.tessera.dev/v1alpha1
/// kind: PlacementGroup
/// metadata:
///   name: workers
/// spec:
///   region: us-ord
///   placementGroupPolicy: strict
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.tessera.dev",
    version = "v1alpha1",
    kind = "PlacementGroup",
    namespaced,
    status = "ResourceStatus",
    shortname = "pg",
    printcolumn = r#"{"name":"ID","type":"integer","jsonPath":".spec.pgId"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlacementGroupSpec {
    /// Remote identifier, set once the group is created or adopted.
    /// Always serialized so clearing it reaches the API server.
    #[serde(default)]
    pub pg_id: Option<i64>,

    /// Region to create the group in (immutable)
    pub region: String,

    /// Placement type (immutable)
    #[serde(default)]
    pub placement_group_type: PlacementGroupType,

    /// Enforcement policy (immutable)
    #[serde(default)]
    pub placement_group_policy: PlacementGroupPolicy,

    /// Leave the remote group in place when this object is deleted
    #[serde(default)]
    pub retain: bool,

    /// Secret holding the API token; the operator default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<SecretRef>,
}

/// Placement type
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PlacementGroupType {
    /// Spread members across hosts
    #[default]
    #[serde(rename = "anti_affinity:local")]
    AntiAffinityLocal,
}

/// Enforcement policy
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlacementGroupPolicy {
    /// Refuse members that would break the policy
    #[default]
    Strict,
    /// Accept members, report non-compliance
    Flexible,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_from_minimal_yaml() {
        let spec: PlacementGroupSpec =
            serde_json::from_value(serde_json::json!({"region": "us-ord"})).unwrap();
        assert_eq!(spec.pg_id, None);
        assert_eq!(spec.placement_group_type, PlacementGroupType::AntiAffinityLocal);
        assert_eq!(spec.placement_group_policy, PlacementGroupPolicy::Strict);
        assert!(!spec.retain);
    }

    #[test]
    fn cleared_identifier_is_serialized_as_null() {
        let spec = PlacementGroupSpec {
            pg_id: None,
            region: "us-ord".to_string(),
            placement_group_type: PlacementGroupType::default(),
            placement_group_policy: PlacementGroupPolicy::Flexible,
            retain: false,
            credentials_ref: None,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("pgId").is_some_and(|v| v.is_null()));
        assert_eq!(value["placementGroupPolicy"], "flexible");
        assert_eq!(value["placementGroupType"], "anti_affinity:local");
    }
}
