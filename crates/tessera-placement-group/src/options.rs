use kube::ResourceExt;

use tessera_cloud::{CreatePlacementGroupOptions, PlacementPolicy, PlacementType};
use tessera_common::crd::{PlacementGroup, PlacementGroupPolicy, PlacementGroupType};

/// Create request for a PlacementGroup; the object name becomes the label
pub fn create_options(pg: &PlacementGroup) -> CreatePlacementGroupOptions {
    CreatePlacementGroupOptions {
        label: pg.name_any(),
        region: pg.spec.region.clone(),
        placement_group_type: placement_type(pg.spec.placement_group_type),
        placement_group_policy: placement_policy(pg.spec.placement_group_policy),
    }
}

fn placement_type(t: PlacementGroupType) -> PlacementType {
    match t {
        PlacementGroupType::AntiAffinityLocal => PlacementType::AntiAffinityLocal,
    }
}

fn placement_policy(p: PlacementGroupPolicy) -> PlacementPolicy {
    match p {
        PlacementGroupPolicy::Strict => PlacementPolicy::Strict,
        PlacementGroupPolicy::Flexible => PlacementPolicy::Flexible,
    }
}
