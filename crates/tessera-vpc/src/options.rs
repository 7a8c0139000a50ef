//! Mapping between Vpc specs and remote requests

use kube::ResourceExt;

use tessera_cloud::{CreateSubnetOptions, CreateVpcOptions, Vpc as RemoteVpc};
use tessera_common::crd::{SubnetSpec, Vpc};

/// Create request for a Vpc; the object name becomes the label
pub fn create_options(vpc: &Vpc) -> CreateVpcOptions {
    CreateVpcOptions {
        label: vpc.name_any(),
        region: vpc.spec.region.clone(),
        description: vpc.spec.description.clone(),
        subnets: vpc.spec.subnets.iter().map(subnet_options).collect(),
    }
}

fn subnet_options(subnet: &SubnetSpec) -> CreateSubnetOptions {
    CreateSubnetOptions {
        label: subnet.label.clone(),
        ipv4: subnet.ipv4.clone(),
    }
}

/// Bind every unbound subnet descriptor to the remote subnet with its label
///
/// Returns how many descriptors were bound.
pub fn bind_subnet_ids(subnets: &mut [SubnetSpec], remote: &RemoteVpc) -> usize {
    let mut bound = 0;
    for subnet in subnets.iter_mut().filter(|s| s.subnet_id.is_none()) {
        if let Some(found) = remote.subnet_by_label(&subnet.label) {
            subnet.subnet_id = Some(found.id);
            bound += 1;
        }
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_cloud::VpcSubnet;
    use tessera_common::crd::VpcSpec;

    fn subnet(label: &str, subnet_id: Option<i64>) -> SubnetSpec {
        SubnetSpec {
            label: label.to_string(),
            ipv4: Some("10.0.0.0/24".to_string()),
            subnet_id,
            retain: false,
        }
    }

    fn remote_vpc(subnets: &[(i64, &str)]) -> RemoteVpc {
        RemoteVpc {
            id: 1,
            label: "net".to_string(),
            description: String::new(),
            region: "us-ord".to_string(),
            subnets: subnets
                .iter()
                .map(|(id, label)| VpcSubnet {
                    id: *id,
                    label: label.to_string(),
                    ipv4: None,
                    linodes: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn create_request_carries_subnets() {
        let vpc = Vpc::new(
            "net",
            VpcSpec {
                vpc_id: None,
                region: "us-ord".to_string(),
                description: Some("cluster network".to_string()),
                subnets: vec![subnet("nodes", None)],
                retain: false,
                credentials_ref: None,
            },
        );
        let opts = create_options(&vpc);
        assert_eq!(opts.label, "net");
        assert_eq!(opts.description.as_deref(), Some("cluster network"));
        assert_eq!(
            opts.subnets,
            vec![CreateSubnetOptions {
                label: "nodes".to_string(),
                ipv4: Some("10.0.0.0/24".to_string()),
            }]
        );
    }

    #[test]
    fn binds_only_unbound_subnets_by_label() {
        let mut subnets = vec![subnet("nodes", None), subnet("shared", Some(99)), subnet("missing", None)];
        let remote = remote_vpc(&[(10, "nodes"), (11, "shared")]);

        assert_eq!(bind_subnet_ids(&mut subnets, &remote), 1);
        assert_eq!(subnets[0].subnet_id, Some(10));
        assert_eq!(subnets[1].subnet_id, Some(99));
        assert_eq!(subnets[2].subnet_id, None);
    }
}
