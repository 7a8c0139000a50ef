//! API token lookup and Secret protection
//!
//! A managed object that names a credentials Secret places a finalizer on
//! it, so the token outlives every object that still needs it for deletion.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::crd::SecretRef;
use crate::finalizers;
use crate::store::FIELD_MANAGER;
use crate::Error;

/// Secret key holding the API token
pub const API_TOKEN_KEY: &str = "apiToken";

/// Access to credentials Secrets
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the API token from `secret`
    ///
    /// `default_namespace` applies when the reference has no namespace.
    async fn api_token(&self, secret: &SecretRef, default_namespace: &str)
        -> Result<String, Error>;

    /// Add `finalizer` to the Secret; a no-op when already present
    async fn add_finalizer(
        &self,
        secret: &SecretRef,
        default_namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove `finalizer` from the Secret
    ///
    /// A missing Secret or finalizer counts as removed.
    async fn remove_finalizer(
        &self,
        secret: &SecretRef,
        default_namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// [`CredentialStore`] reading Secrets through the Kubernetes API
pub struct KubeCredentialStore {
    client: Client,
}

impl KubeCredentialStore {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, secret: &SecretRef, default_namespace: &str) -> Api<Secret> {
        let namespace = secret.namespace.as_deref().unwrap_or(default_namespace);
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(&self, api: &Api<Secret>, secret: &Secret) -> Result<(), Error> {
        let patch = json!({
            "metadata": {
                "resourceVersion": secret.resource_version(),
                "finalizers": secret.finalizers(),
            }
        });
        api.patch(
            &secret.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Extract the token from a Secret's data
pub fn token_from_secret(secret: &Secret) -> Result<String, Error> {
    let object = format!(
        "{}/{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any()
    );
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(API_TOKEN_KEY))
        .ok_or_else(|| Error::credentials_for(&object, format!("missing key {API_TOKEN_KEY}")))?;
    let token = std::str::from_utf8(&bytes.0)
        .map_err(|_| Error::credentials_for(&object, format!("{API_TOKEN_KEY} is not UTF-8")))?
        .trim();
    if token.is_empty() {
        return Err(Error::credentials_for(
            &object,
            format!("{API_TOKEN_KEY} is empty"),
        ));
    }
    Ok(token.to_string())
}

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn api_token(&self, secret: &SecretRef, default_namespace: &str) -> Result<String, Error> {
        let found = self.api(secret, default_namespace).get(&secret.name).await?;
        token_from_secret(&found)
    }

    async fn add_finalizer(
        &self,
        secret: &SecretRef,
        default_namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.api(secret, default_namespace);
        let mut found = api.get(&secret.name).await?;
        if !finalizers::add_finalizer(&mut found.metadata, finalizer) {
            return Ok(());
        }
        debug!(secret = %secret.name, finalizer, "adding credentials finalizer");
        self.patch_finalizers(&api, &found).await
    }

    async fn remove_finalizer(
        &self,
        secret: &SecretRef,
        default_namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.api(secret, default_namespace);
        let Some(mut found) = api.get_opt(&secret.name).await? else {
            return Ok(());
        };
        if !finalizers::remove_finalizer(&mut found.metadata, finalizer) {
            return Ok(());
        }
        debug!(secret = %secret.name, finalizer, "removing credentials finalizer");
        match self.patch_finalizers(&api, &found).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}
