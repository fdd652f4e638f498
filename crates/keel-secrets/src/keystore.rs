//! Keysets and SSH public keys stored under `pki/`
//!
//! ```text
//! pki/private/<name>/keyset.yaml   full keyset
//! pki/issued/<name>/keyset.yaml    certificates only
//! pki/ssh/public/<user>/<id>       SSH public keys
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use keel_common::api::Cluster;
use keel_common::{Error, Result};
use keel_vfs::{Acl, AclOracle, VfsPath};

use crate::keyset::Keyset;

const KEYSET_FILE: &str = "keyset.yaml";

/// Storage for keysets and SSH public keys
#[async_trait]
pub trait Keystore: Send + Sync {
    /// The keyset called `name`, if present
    async fn find_keyset(&self, name: &str) -> Result<Option<Keyset>>;

    /// Write `keyset` under its metadata name
    async fn store_keyset(&self, keyset: &Keyset) -> Result<()>;

    /// Names of all keysets, sorted
    async fn list_keysets(&self) -> Result<Vec<String>>;

    /// SSH public keys registered for `user`
    async fn find_ssh_public_keys(&self, user: &str) -> Result<Vec<String>>;

    /// Register an SSH public key for `user`
    async fn add_ssh_public_key(&self, user: &str, public_key: &str) -> Result<()>;
}

/// Keystore over a VFS directory
#[derive(Clone)]
pub struct VfsKeystore {
    base: VfsPath,
    acls: Option<(Arc<dyn AclOracle>, Arc<Cluster>)>,
}

impl VfsKeystore {
    /// Keystore rooted at `base` (usually `<state-store>/<cluster>/pki`)
    pub fn new(base: VfsPath) -> Self {
        Self { base, acls: None }
    }

    /// Apply ACLs chosen by `oracle` to every write
    pub fn with_acls(mut self, oracle: Arc<dyn AclOracle>, cluster: Arc<Cluster>) -> Self {
        self.acls = Some((oracle, cluster));
        self
    }

    fn private_path(&self, name: &str) -> VfsPath {
        self.base.join(&["private", name, KEYSET_FILE])
    }

    fn issued_path(&self, name: &str) -> VfsPath {
        self.base.join(&["issued", name, KEYSET_FILE])
    }

    fn acl_for(&self, path: &VfsPath) -> Result<Option<Acl>> {
        match &self.acls {
            Some((oracle, cluster)) => oracle.get_acl(path.as_ref(), cluster),
            None => Ok(None),
        }
    }

    async fn write(&self, path: &VfsPath, data: &[u8]) -> Result<()> {
        let acl = self.acl_for(path)?;
        path.write_file(data, acl.as_ref()).await
    }
}

/// Identifier of an SSH public key: sha256 of its trimmed text
pub fn ssh_key_id(public_key: &str) -> String {
    hex::encode(Sha256::digest(public_key.trim().as_bytes()))
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(Error::invalid_field(kind, format!("invalid name {name:?}")));
    }
    Ok(())
}

#[async_trait]
impl Keystore for VfsKeystore {
    async fn find_keyset(&self, name: &str) -> Result<Option<Keyset>> {
        validate_name("keyset name", name)?;
        match self.private_path(name).read_file().await {
            Ok(data) => {
                let keyset: Keyset = serde_yaml::from_slice(&data).map_err(|e| {
                    Error::serialization_for("Keyset", format!("parsing keyset {name}: {e}"))
                })?;
                Ok(Some(keyset))
            }
            Err(e) if e.is_not_exist() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn store_keyset(&self, keyset: &Keyset) -> Result<()> {
        let name = keyset.keyset_name();
        validate_name("keyset name", name)?;
        keyset.validate()?;

        // issued/ before private/
        let issued = serde_yaml::to_string(&keyset.public_only())?;
        self.write(&self.issued_path(name), issued.as_bytes()).await?;
        let private = serde_yaml::to_string(keyset)?;
        self.write(&self.private_path(name), private.as_bytes()).await?;
        debug!(keyset = %name, items = keyset.spec.keys.len(), "stored keyset");
        Ok(())
    }

    async fn list_keysets(&self) -> Result<Vec<String>> {
        let entries = match self.base.join(&["private"]).read_dir().await {
            Ok(entries) => entries,
            Err(e) if e.is_not_exist() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names: Vec<String> = entries.iter().map(|p| p.base()).collect();
        names.sort();
        Ok(names)
    }

    async fn find_ssh_public_keys(&self, user: &str) -> Result<Vec<String>> {
        validate_name("ssh user", user)?;
        let entries = match self.base.join(&["ssh", "public", user]).read_dir().await {
            Ok(entries) => entries,
            Err(e) if e.is_not_exist() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            let data = entry.read_file().await?;
            let text = String::from_utf8(data).map_err(|e| {
                Error::invalid_input(format!("ssh key {} is not utf-8: {e}", entry.path()))
            })?;
            keys.push(text.trim().to_string());
        }
        keys.sort();
        Ok(keys)
    }

    async fn add_ssh_public_key(&self, user: &str, public_key: &str) -> Result<()> {
        validate_name("ssh user", user)?;
        let key = public_key.trim();
        if key.is_empty() {
            return Err(Error::required_field("ssh public key"));
        }
        let path = self.base.join(&["ssh", "public", user, &ssh_key_id(key)]);
        self.write(&path, key.as_bytes()).await
    }
}
