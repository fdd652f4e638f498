//! Secrets stored as JSON files under `<base>/<name>`

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use keel_common::api::Cluster;
use keel_common::{Error, Result};
use keel_vfs::{Acl, AclOracle, VfsPath};

use crate::secret::{validate_secret_name, Secret, SecretStore};

/// Secret store over a VFS directory
#[derive(Clone)]
pub struct VfsSecretStore {
    base: VfsPath,
    acls: Option<(Arc<dyn AclOracle>, Arc<Cluster>)>,
}

impl VfsSecretStore {
    /// Store rooted at `base` (usually `<state-store>/<cluster>/secrets`)
    pub fn new(base: VfsPath) -> Self {
        Self { base, acls: None }
    }

    /// Apply ACLs chosen by `oracle` to every write
    pub fn with_acls(mut self, oracle: Arc<dyn AclOracle>, cluster: Arc<Cluster>) -> Self {
        self.acls = Some((oracle, cluster));
        self
    }

    /// Directory holding the secrets
    pub fn base(&self) -> &VfsPath {
        &self.base
    }

    fn secret_path(&self, name: &str) -> Result<VfsPath> {
        validate_secret_name(name)?;
        Ok(self.base.join(&[name]))
    }

    fn acl_for(&self, path: &VfsPath) -> Result<Option<Acl>> {
        match &self.acls {
            Some((oracle, cluster)) => oracle.get_acl(path.as_ref(), cluster),
            None => Ok(None),
        }
    }

    async fn load(path: &VfsPath) -> Result<Option<Secret>> {
        match path.read_file().await {
            Ok(data) => Secret::from_json(&data).map(Some),
            Err(e) if e.is_not_exist() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SecretStore for VfsSecretStore {
    async fn find_secret(&self, name: &str) -> Result<Option<Secret>> {
        let path = self.secret_path(name)?;
        Self::load(&path).await
    }

    async fn get_or_create_secret(&self, name: &str, candidate: &Secret) -> Result<(Secret, bool)> {
        let path = self.secret_path(name)?;
        let data = candidate.to_json()?;
        let acl = self.acl_for(&path)?;

        for attempt in 0..2 {
            if let Some(existing) = Self::load(&path).await? {
                return Ok((existing, false));
            }
            match path.create_file(&data, acl.as_ref()).await {
                Ok(()) => break,
                Err(e) if e.is_already_exists() && attempt == 0 => {
                    info!(secret = %name, "secret created concurrently, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        // Read back what actually landed
        let stored = Self::load(&path)
            .await?
            .ok_or_else(|| Error::not_exist(path.path()))?;
        debug!(secret = %name, "created secret");
        Ok((stored, true))
    }

    async fn replace_secret(&self, name: &str, secret: &Secret) -> Result<Secret> {
        let path = self.secret_path(name)?;
        let acl = self.acl_for(&path)?;
        path.write_file(&secret.to_json()?, acl.as_ref()).await?;
        Self::load(&path)
            .await?
            .ok_or_else(|| Error::not_exist(path.path()))
    }

    async fn list_secrets(&self) -> Result<Vec<String>> {
        let entries = match self.base.read_dir().await {
            Ok(entries) => entries,
            Err(e) if e.is_not_exist() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names: Vec<String> = entries.iter().map(|p| p.base()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.secret_path(name)?.remove().await
    }

    async fn mirror_to(&self, base: &VfsPath, oracle: &dyn AclOracle, cluster: &Cluster) -> Result<()> {
        if base.path() == self.base.path() {
            return Ok(());
        }
        mirror_secrets(self, base, oracle, cluster).await
    }
}

/// Copy every secret of `store` into `<base>/<name>`, skipping identical files
pub(crate) async fn mirror_secrets(
    store: &dyn SecretStore,
    base: &VfsPath,
    oracle: &dyn AclOracle,
    cluster: &Cluster,
) -> Result<()> {
    for name in store.list_secrets().await? {
        let Some(secret) = store.find_secret(&name).await? else {
            continue;
        };
        let dest = base.join(&[&name]);
        let data = secret.to_json()?;
        match dest.read_file().await {
            Ok(existing) if existing == data => continue,
            Ok(_) => {}
            Err(e) if e.is_not_exist() => {}
            Err(e) => return Err(e),
        }
        let acl = oracle.get_acl(dest.as_ref(), cluster)?;
        dest.write_file(&data, acl.as_ref()).await?;
        debug!(secret = %name, dest = %dest.path(), "mirrored secret");
    }
    Ok(())
}
