//! Wire types for the v4 REST API
//!
//! Field names follow the API's snake_case JSON. Unknown fields are ignored
//! so newer API revisions keep decoding.

use serde::{Deserialize, Serialize};

/// Placement type of a placement group
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum PlacementType {
    /// Members are spread across distinct hosts in one region
    #[default]
    #[serde(rename = "anti_affinity:local")]
    AntiAffinityLocal,
}

/// Enforcement policy of a placement group
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlacementPolicy {
    /// Reject members that would break compliance
    #[default]
    Strict,
    /// Accept members and report non-compliance
    Flexible,
}

/// A compute node assigned to a placement group
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlacementGroupMember {
    /// Compute node id
    pub linode_id: i64,
    /// Whether this member currently satisfies the group policy
    #[serde(default)]
    pub is_compliant: bool,
}

/// A placement group as reported by the API
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlacementGroup {
    /// Remote identifier
    pub id: i64,
    /// Unique label
    pub label: String,
    /// Region the group lives in
    pub region: String,
    /// Placement type
    pub placement_group_type: PlacementType,
    /// Enforcement policy
    pub placement_group_policy: PlacementPolicy,
    /// Whether all members satisfy the policy
    #[serde(default)]
    pub is_compliant: bool,
    /// Compute nodes assigned to the group
    #[serde(default)]
    pub members: Vec<PlacementGroupMember>,
}

/// Body of `POST /placement/groups`
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CreatePlacementGroupOptions {
    /// Unique label
    pub label: String,
    /// Region to create the group in
    pub region: String,
    /// Placement type
    pub placement_group_type: PlacementType,
    /// Enforcement policy
    pub placement_group_policy: PlacementPolicy,
}

/// A compute node attached to a subnet
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubnetLinode {
    /// Compute node id
    pub id: i64,
}

/// A subnet of a VPC as reported by the API
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct VpcSubnet {
    /// Remote identifier
    pub id: i64,
    /// Label, unique within the VPC
    pub label: String,
    /// IPv4 range in CIDR notation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    /// Compute nodes with an interface in this subnet
    #[serde(default)]
    pub linodes: Vec<SubnetLinode>,
}

/// A VPC as reported by the API
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Vpc {
    /// Remote identifier
    pub id: i64,
    /// Unique label
    pub label: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Region the VPC lives in
    pub region: String,
    /// Subnets of the VPC
    #[serde(default)]
    pub subnets: Vec<VpcSubnet>,
}

impl Vpc {
    /// Find a subnet by label
    pub fn subnet_by_label(&self, label: &str) -> Option<&VpcSubnet> {
        self.subnets.iter().find(|s| s.label == label)
    }
}

/// Subnet entry of `POST /vpcs`
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CreateSubnetOptions {
    /// Label, unique within the VPC
    pub label: String,
    /// IPv4 range in CIDR notation; the API assigns one when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
}

/// Body of `POST /vpcs`
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CreateVpcOptions {
    /// Unique label
    pub label: String,
    /// Region to create the VPC in
    pub region: String,
    /// Free-form description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Subnets created together with the VPC
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<CreateSubnetOptions>,
}

/// Paginated list envelope
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Page<T> {
    pub data: Vec<T>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page")]
    pub pages: u32,
}

fn first_page() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_group_decodes_api_payload() {
        let body = serde_json::json!({
            "id": 528,
            "label": "workers",
            "region": "us-ord",
            "placement_group_type": "anti_affinity:local",
            "placement_group_policy": "strict",
            "is_compliant": true,
            "members": [{"linode_id": 123, "is_compliant": true}],
            "migrations": null
        });
        let pg: PlacementGroup = serde_json::from_value(body).unwrap();
        assert_eq!(pg.id, 528);
        assert_eq!(pg.placement_group_type, PlacementType::AntiAffinityLocal);
        assert_eq!(pg.members.len(), 1);
    }

    #[test]
    fn vpc_create_body_omits_empty_fields() {
        let opts = CreateVpcOptions {
            label: "net".to_string(),
            region: "us-ord".to_string(),
            description: None,
            subnets: vec![],
        };
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(value, serde_json::json!({"label": "net", "region": "us-ord"}));
    }

    #[test]
    fn subnet_lookup_by_label() {
        let vpc = Vpc {
            id: 1,
            label: "net".to_string(),
            description: String::new(),
            region: "us-ord".to_string(),
            subnets: vec![VpcSubnet {
                id: 7,
                label: "primary".to_string(),
                ipv4: Some("10.0.0.0/24".to_string()),
                linodes: vec![],
            }],
        };
        assert_eq!(vpc.subnet_by_label("primary").map(|s| s.id), Some(7));
        assert!(vpc.subnet_by_label("missing").is_none());
    }
}
