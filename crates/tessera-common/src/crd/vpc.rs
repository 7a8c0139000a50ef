//! Vpc CRD
//!
//! A Vpc is a composite resource: the VPC itself plus its subnets. Each
//! subnet can be retained independently of the parent.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ResourceStatus, SecretRef};

/// Vpc is the desired state of one remote VPC and its subnets.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.tessera.dev/v1alpha1
/// kind: Vpc
/// metadata:
///   name: cluster-net
/// spec:
///   region: us-ord
///   subnets:
///     - label: nodes
///       ipv4: 10.0.0.0/24
///     - label: shared
///       ipv4: 10.0.1.0/24
///       retain: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.tessera.dev",
    version = "v1alpha1",
    kind = "Vpc",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"ID","type":"integer","jsonPath":".spec.vpcId"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VpcSpec {
    /// Remote identifier, set once the VPC is created or adopted.
    /// Always serialized so clearing it reaches the API server.
    #[serde(default)]
    pub vpc_id: Option<i64>,

    /// Region to create the VPC in (immutable)
    pub region: String,

    /// Free-form description (immutable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Subnets created with the VPC
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,

    /// Leave the remote VPC and all subnets in place when this object is deleted
    #[serde(default)]
    pub retain: bool,

    /// Secret holding the API token; the operator default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<SecretRef>,
}

/// One subnet of a Vpc
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Label, unique within the VPC
    pub label: String,

    /// IPv4 range in CIDR notation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,

    /// Remote identifier, bound after create or adopt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<i64>,

    /// Leave this subnet in place when the Vpc is deleted
    #[serde(default)]
    pub retain: bool,
}

impl VpcSpec {
    /// Whether any subnet is marked retain
    pub fn has_retained_subnets(&self) -> bool {
        self.subnets.iter().any(|s| s.retain)
    }

    /// Whether the remote subnet with this id or label is retained
    ///
    /// Subnets without a descriptor are not retained.
    pub fn is_subnet_retained(&self, subnet_id: i64, label: &str) -> bool {
        self.subnets
            .iter()
            .find(|s| s.subnet_id == Some(subnet_id) || (s.subnet_id.is_none() && s.label == label))
            .is_some_and(|s| s.retain)
    }
}
