//! Secrets stored as `Keyset` custom resources

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use keel_common::api::Cluster;
use keel_common::{Error, Result};
use keel_vfs::{AclOracle, VfsPath};

use crate::keyset::{Keyset, KeysetItem, KeysetType};
use crate::secret::{validate_secret_name, Secret, SecretStore};
use crate::vfs_store::mirror_secrets;

/// Prefix of keysets holding secrets
pub const SECRET_KEYSET_PREFIX: &str = "secret-";

/// Access to `Keyset` resources in one namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeysetApi: Send + Sync {
    /// Keyset called `name`, if present
    async fn get(&self, name: &str) -> Result<Option<Keyset>>;
    /// Create a keyset, failing with already-exists
    async fn create(&self, keyset: &Keyset) -> Result<()>;
    /// Replace an existing keyset
    async fn replace(&self, keyset: &Keyset) -> Result<()>;
    /// Every keyset
    async fn list(&self) -> Result<Vec<Keyset>>;
    /// Delete the keyset called `name`
    async fn delete(&self, name: &str) -> Result<()>;
}

/// [`KeysetApi`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeKeysetApi {
    api: Api<Keyset>,
}

impl KubeKeysetApi {
    /// Keysets in `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl KeysetApi for KubeKeysetApi {
    async fn get(&self, name: &str) -> Result<Option<Keyset>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, keyset: &Keyset) -> Result<()> {
        self.api.create(&PostParams::default(), keyset).await?;
        Ok(())
    }

    async fn replace(&self, keyset: &Keyset) -> Result<()> {
        self.api
            .replace(keyset.keyset_name(), &PostParams::default(), keyset)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Keyset>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Secret store over `Keyset` resources named `secret-<name>`
#[derive(Clone)]
pub struct KubernetesSecretStore {
    api: Arc<dyn KeysetApi>,
}

impl KubernetesSecretStore {
    /// Store using `api`
    pub fn new(api: Arc<dyn KeysetApi>) -> Self {
        Self { api }
    }

    fn keyset_name(name: &str) -> Result<String> {
        validate_secret_name(name)?;
        Ok(format!("{SECRET_KEYSET_PREFIX}{name}"))
    }

    fn to_keyset(keyset_name: &str, secret: &Secret) -> Keyset {
        let mut keyset = Keyset::empty(keyset_name, KeysetType::Secret);
        keyset.add_item(secret_item("1", secret), true);
        keyset
    }
}

fn secret_item(id: &str, secret: &Secret) -> KeysetItem {
    KeysetItem {
        id: id.to_string(),
        private_material: Some(base64::engine::general_purpose::STANDARD.encode(&secret.data)),
        ..Default::default()
    }
}

fn secret_from_keyset(keyset: &Keyset) -> Result<Secret> {
    let name = keyset.keyset_name();
    if keyset.spec.keyset_type != KeysetType::Secret {
        return Err(Error::invalid_input(format!("keyset {name} does not hold a secret")));
    }
    let material = keyset
        .primary()
        .and_then(|item| item.private_material.as_deref())
        .ok_or_else(|| Error::invalid_input(format!("keyset {name} has no primary secret")))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(material)
        .map_err(|e| Error::serialization_for("Keyset", format!("decoding {name}: {e}")))?;
    Ok(Secret::new(data))
}

fn next_item_id(keyset: &Keyset) -> String {
    let max = keyset
        .spec
        .keys
        .iter()
        .filter_map(|k| k.id.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    (max + 1).to_string()
}

#[async_trait]
impl SecretStore for KubernetesSecretStore {
    async fn find_secret(&self, name: &str) -> Result<Option<Secret>> {
        match self.api.get(&Self::keyset_name(name)?).await? {
            Some(keyset) => secret_from_keyset(&keyset).map(Some),
            None => Ok(None),
        }
    }

    async fn get_or_create_secret(&self, name: &str, candidate: &Secret) -> Result<(Secret, bool)> {
        let keyset_name = Self::keyset_name(name)?;
        for attempt in 0..2 {
            if let Some(existing) = self.api.get(&keyset_name).await? {
                return Ok((secret_from_keyset(&existing)?, false));
            }
            match self.api.create(&Self::to_keyset(&keyset_name, candidate)).await {
                Ok(()) => break,
                Err(e) if e.is_already_exists() && attempt == 0 => {
                    info!(secret = %name, "secret keyset created concurrently, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        let stored = self
            .api
            .get(&keyset_name)
            .await?
            .ok_or_else(|| Error::not_exist(keyset_name.clone()))?;
        Ok((secret_from_keyset(&stored)?, true))
    }

    async fn replace_secret(&self, name: &str, secret: &Secret) -> Result<Secret> {
        let keyset_name = Self::keyset_name(name)?;
        match self.api.get(&keyset_name).await? {
            Some(mut keyset) => {
                let id = next_item_id(&keyset);
                keyset.add_item(secret_item(&id, secret), true);
                self.api.replace(&keyset).await?;
            }
            None => self.api.create(&Self::to_keyset(&keyset_name, secret)).await?,
        }
        Ok(secret.clone())
    }

    async fn list_secrets(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .api
            .list()
            .await?
            .iter()
            .filter(|k| k.spec.keyset_type == KeysetType::Secret)
            .filter_map(|k| k.keyset_name().strip_prefix(SECRET_KEYSET_PREFIX).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.api.delete(&Self::keyset_name(name)?).await
    }

    async fn mirror_to(&self, base: &VfsPath, oracle: &dyn AclOracle, cluster: &Cluster) -> Result<()> {
        mirror_secrets(self, base, oracle, cluster).await
    }
}
