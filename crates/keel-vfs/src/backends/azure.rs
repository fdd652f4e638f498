//! Azure Blob Storage backend

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use keel_common::hashing::{Hash, HashAlgorithm};
use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::client::ClientError;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, dir_prefix, join_key};

/// URL scheme of Azure Blob paths
pub const AZURE_SCHEME: &str = "azureblob://";

/// Environment variable naming the storage account
pub const AZURE_ACCOUNT_ENV: &str = "AZURE_STORAGE_ACCOUNT";

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Blob properties
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AzureBlob {
    /// Blob name
    pub name: String,
    /// Base64-encoded MD5 of the contents
    pub content_md5: Option<String>,
}

/// One page of a listing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AzureListPage {
    /// Blobs in this page
    pub blobs: Vec<AzureBlob>,
    /// Virtual directories when a delimiter was given
    pub prefixes: Vec<String>,
    /// Marker for the next page
    pub next_marker: Option<String>,
}

/// The subset of the Blob service API used by the backend
#[async_trait]
pub trait AzureBlobApi: Send + Sync {
    /// Download a blob
    async fn download(&self, container: &str, name: &str) -> std::result::Result<Vec<u8>, ClientError>;
    /// Blob properties
    async fn get_properties(&self, container: &str, name: &str)
        -> std::result::Result<AzureBlob, ClientError>;
    /// Upload a block blob
    async fn upload(&self, container: &str, name: &str, data: Vec<u8>)
        -> std::result::Result<(), ClientError>;
    /// Delete a blob, optionally with its snapshots
    async fn delete(
        &self,
        container: &str,
        name: &str,
        include_snapshots: bool,
    ) -> std::result::Result<(), ClientError>;
    /// List blobs under `prefix`
    async fn list(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<String>,
        marker: Option<String>,
    ) -> std::result::Result<AzureListPage, ClientError>;
}

/// Builds a client for a storage account
pub trait AzureClientFactory: Send + Sync {
    /// Client for `account`
    fn client(&self, account: &str) -> Result<Arc<dyn AzureBlobApi>>;
}

fn decode_md5(encoded: Option<&str>) -> Option<Hash> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded?)
        .ok()?;
    Hash::from_bytes(HashAlgorithm::Md5, bytes).ok()
}

/// A blob in an Azure container
#[derive(Clone)]
pub struct AzureBlobPath {
    client: Arc<dyn AzureBlobApi>,
    account: String,
    container: String,
    key: String,
    md5: Option<Hash>,
}

impl fmt::Debug for AzureBlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AzureBlobPath({})", self.path())
    }
}

impl AzureBlobPath {
    /// Path for `container`/`key` in `account`
    pub fn new(
        client: Arc<dyn AzureBlobApi>,
        account: impl Into<String>,
        container: impl Into<String>,
        key: &str,
    ) -> Self {
        Self {
            client,
            account: account.into(),
            container: container.into(),
            key: join_key(key, &[]),
            md5: None,
        }
    }

    /// Container name
    pub fn container(&self) -> &str {
        &self.container
    }

    /// HTTPS URL of the blob
    pub fn https_url(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            self.account, self.container, self.key
        )
    }

    fn sibling(&self, key: String, md5: Option<Hash>) -> AzureBlobPath {
        AzureBlobPath {
            client: self.client.clone(),
            account: self.account.clone(),
            container: self.container.clone(),
            key,
            md5,
        }
    }

    fn translate(&self, e: ClientError) -> Error {
        e.into_error("azureblob", &self.path())
    }

    async fn list(&self, delimiter: Option<&str>) -> Result<Vec<VfsPath>> {
        let prefix = dir_prefix(&self.key);
        let mut out: Vec<VfsPath> = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .client
                .list(&self.container, &prefix, delimiter.map(str::to_string), marker)
                .await
                .map_err(|e| self.translate(e))?;
            for blob in page.blobs {
                if blob.name == prefix {
                    continue;
                }
                let md5 = decode_md5(blob.content_md5.as_deref());
                out.push(Arc::new(self.sibling(blob.name, md5)));
            }
            for p in page.prefixes {
                out.push(Arc::new(self.sibling(join_key(&p, &[]), None)));
            }
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Path for AzureBlobPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.sibling(join_key(&self.key, parts), None))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        Backoff::object_store_read()
            .retry("azureblob read", || async {
                self.client
                    .download(&self.container, &self.key)
                    .await
                    .map(Some)
                    .map_err(|e| self.translate(e))
            })
            .await
    }

    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        if let Some(acl) = acl {
            return Err(Error::invalid_input(format!(
                "azureblob does not support acl {acl}"
            )));
        }
        Backoff::object_store_write()
            .retry("azureblob write", || async {
                self.client
                    .upload(&self.container, &self.key, data.to_vec())
                    .await
                    .map(Some)
                    .map_err(|e| self.translate(e))
            })
            .await
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let _guard = CREATE_LOCK.lock().await;
        match self.client.get_properties(&self.container, &self.key).await {
            Ok(_) => Err(Error::already_exists(self.path())),
            Err(e) if e.is_not_found() => self.write_file(data, acl).await,
            Err(e) => Err(self.translate(e)),
        }
    }

    async fn remove(&self) -> Result<()> {
        self.client
            .delete(&self.container, &self.key, true)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn read_dir(&self) -> Result<Vec<VfsPath>> {
        self.list(Some("/")).await
    }

    async fn read_tree(&self) -> Result<Vec<VfsPath>> {
        self.list(None).await
    }

    fn base(&self) -> String {
        base_name(&self.key)
    }

    fn path(&self) -> String {
        format!("{AZURE_SCHEME}{}/{}", self.container, self.key)
    }

    async fn preferred_hash(&self) -> Result<Option<Hash>> {
        self.hash(HashAlgorithm::Md5).await
    }

    async fn hash(&self, algorithm: HashAlgorithm) -> Result<Option<Hash>> {
        if algorithm != HashAlgorithm::Md5 {
            return Ok(None);
        }
        if let Some(md5) = &self.md5 {
            return Ok(Some(md5.clone()));
        }
        let props = self
            .client
            .get_properties(&self.container, &self.key)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(decode_md5(props.content_md5.as_deref()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
