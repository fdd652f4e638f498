//! Kubernetes Secrets as a file store (`k8s://<namespace>/<key>`)
//!
//! Each file is one Secret. Secret names are derived from a digest of the
//! key; the key itself is kept in an annotation so listings can be
//! reconstructed.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::Client;
use sha2::{Digest, Sha256};

use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, dir_prefix, join_key};

/// URL scheme of Kubernetes paths
pub const K8S_SCHEME: &str = "k8s://";

/// Label selecting secrets managed by this backend
pub const VFS_LABEL: &str = "keel.io/vfs";

/// Annotation carrying the file key
pub const VFS_KEY_ANNOTATION: &str = "keel.io/vfs-key";

const DATA_KEY: &str = "data";

/// Namespaced key/value storage
#[async_trait]
pub trait KubeObjectStore: Send + Sync {
    /// Contents of `key`, None if absent
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    /// Create or replace `key`
    async fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()>;
    /// Create `key`, failing with already-exists
    async fn create(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()>;
    /// Delete `key`
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;
    /// Every key in `namespace`
    async fn list(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Secret name holding `key`
pub fn secret_name_for_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("keel-vfs-{}", &hex::encode(digest)[..40])
}

/// [`KubeObjectStore`] backed by Secrets
#[derive(Clone)]
pub struct SecretObjectStore {
    client: Client,
}

impl SecretObjectStore {
    /// Store using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secret(key: &str, data: &[u8]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(secret_name_for_key(key)),
                labels: Some(BTreeMap::from([(VFS_LABEL.to_string(), "true".to_string())])),
                annotations: Some(BTreeMap::from([(
                    VFS_KEY_ANNOTATION.to_string(),
                    key.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                DATA_KEY.to_string(),
                ByteString(data.to_vec()),
            )])),
            ..Default::default()
        }
    }
}

#[async_trait]
impl KubeObjectStore for SecretObjectStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let secret = self.api(namespace).get_opt(&secret_name_for_key(key)).await?;
        Ok(secret
            .and_then(|s| s.data)
            .and_then(|mut d| d.remove(DATA_KEY))
            .map(|b| b.0))
    }

    async fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()> {
        let api = self.api(namespace);
        let name = secret_name_for_key(key);
        let mut secret = Self::secret(key, data);
        match api.get_opt(&name).await? {
            Some(existing) => {
                secret.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&name, &PostParams::default(), &secret).await?;
            }
            None => {
                api.create(&PostParams::default(), &secret).await?;
            }
        }
        Ok(())
    }

    async fn create(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()> {
        self.api(namespace)
            .create(&PostParams::default(), &Self::secret(key, data))
            .await
            .map_err(|e| match Error::from(e) {
                err if err.is_already_exists() => Error::already_exists(format!("{K8S_SCHEME}{namespace}/{key}")),
                err => err,
            })?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.api(namespace)
            .delete(&secret_name_for_key(key), &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let secrets = self
            .api(namespace)
            .list(&ListParams::default().labels(&format!("{VFS_LABEL}=true")))
            .await?;
        Ok(secrets
            .items
            .into_iter()
            .filter_map(|s| s.metadata.annotations?.remove(VFS_KEY_ANNOTATION))
            .collect())
    }
}

/// A file stored in a Kubernetes namespace
#[derive(Clone)]
pub struct K8sPath {
    store: Arc<dyn KubeObjectStore>,
    namespace: String,
    key: String,
}

impl fmt::Debug for K8sPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K8sPath({})", self.path())
    }
}

impl K8sPath {
    /// Path for `key` in `namespace`
    pub fn new(store: Arc<dyn KubeObjectStore>, namespace: impl Into<String>, key: &str) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            key: join_key(key, &[]),
        }
    }

    fn with_key(&self, key: String) -> K8sPath {
        K8sPath {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            key,
        }
    }

    async fn keys_below(&self) -> Result<Vec<String>> {
        let prefix = dir_prefix(&self.key);
        Ok(self
            .store
            .list(&self.namespace)
            .await?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect())
    }
}

#[async_trait]
impl Path for K8sPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.with_key(join_key(&self.key, parts)))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        self.store
            .get(&self.namespace, &self.key)
            .await?
            .ok_or_else(|| Error::not_exist(self.path()))
    }

    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        if let Some(acl) = acl {
            return Err(Error::invalid_input(format!("k8s does not support acl {acl}")));
        }
        self.store.put(&self.namespace, &self.key, data).await
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        if let Some(acl) = acl {
            return Err(Error::invalid_input(format!("k8s does not support acl {acl}")));
        }
        self.store.create(&self.namespace, &self.key, data).await
    }

    async fn remove(&self) -> Result<()> {
        self.store.delete(&self.namespace, &self.key).await
    }

    async fn read_dir(&self) -> Result<Vec<VfsPath>> {
        let prefix = dir_prefix(&self.key);
        let mut children: Vec<String> = self
            .keys_below()
            .await?
            .iter()
            .filter_map(|k| k[prefix.len()..].split('/').next().map(str::to_string))
            .collect();
        children.sort();
        children.dedup();
        Ok(children
            .into_iter()
            .map(|c| -> VfsPath { Arc::new(self.with_key(join_key(&self.key, &[&c]))) })
            .collect())
    }

    async fn read_tree(&self) -> Result<Vec<VfsPath>> {
        let mut keys = self.keys_below().await?;
        keys.sort();
        Ok(keys
            .into_iter()
            .map(|k| -> VfsPath { Arc::new(self.with_key(k)) })
            .collect())
    }

    fn base(&self) -> String {
        base_name(&self.key)
    }

    fn path(&self) -> String {
        format!("{K8S_SCHEME}{}/{}", self.namespace, self.key)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
