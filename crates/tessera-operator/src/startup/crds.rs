//! CRD installation
//!
//! The operator installs its own CRDs on startup using server-side apply, so
//! the installed schema always matches the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use tessera_common::crd::{PlacementGroup, Vpc};

const FIELD_MANAGER: &str = "tessera-operator";

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "placementgroups.infrastructure.tessera.dev",
            crd: PlacementGroup::crd(),
        },
        CrdDef {
            name: "vpcs.infrastructure.tessera.dev",
            crd: Vpc::crd(),
        },
    ]
}

/// All CRDs as one multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let docs = crds()
        .into_iter()
        .map(|def| serde_yaml::to_string(&def.crd))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
    Ok(docs.join("---\n"))
}

/// Install or update every CRD
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in crds() {
        tracing::info!("Installing {} CRD...", def.name);
        api.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    tracing::info!("All Tessera CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_match_generated_metadata() {
        for def in crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
        }
    }

    #[test]
    fn manifests_contain_both_kinds() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("kind: PlacementGroup"));
        assert!(yaml.contains("kind: Vpc"));
        assert_eq!(yaml.matches("---\n").count(), 1);
    }
}
