//! Google Cloud Storage backend

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

/// URL scheme of GCS paths
pub const GCS_SCHEME: &str = "gs://";

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Object metadata
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GcsObject {
    /// Object name
    pub name: String,
    /// Base64-encoded MD5 of the contents
    pub md5_hash: Option<String>,
}

/// One page of a listing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GcsListPage {
    /// Objects in this page
    pub objects: Vec<GcsObject>,
    /// Prefixes (directories) when a delimiter was given
    pub prefixes: Vec<String>,
    /// Token for the next page
    pub next_page_token: Option<String>,
}

/// The subset of the GCS JSON API used by the backend
#[async_trait]
pub trait GcsApi: Send + Sync {
    /// Download an object
    async fn get_object(&self, bucket: &str, name: &str) -> std::result::Result<Vec<u8>, ClientError>;
    /// Object metadata
    async fn get_metadata(&self, bucket: &str, name: &str)
        -> std::result::Result<GcsObject, ClientError>;
    /// Upload an object
    async fn insert_object(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
        predefined_acl: Option<String>,
    ) -> std::result::Result<(), ClientError>;
    /// Delete an object
    async fn delete_object(&self, bucket: &str, name: &str) -> std::result::Result<(), ClientError>;
    /// List objects under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<String>,
        page_token: Option<String>,
    ) -> std::result::Result<GcsListPage, ClientError>;
}

fn decode_md5(encoded: Option<&str>) -> Option<Hash> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded?)
        .ok()?;
    Hash::from_bytes(HashAlgorithm::Md5, bytes).ok()
}

/// An object in a GCS bucket
#[derive(Clone)]
pub struct GcsPath {
    client: Arc<dyn GcsApi>,
    bucket: String,
    key: String,
    md5: Option<Hash>,
}

impl fmt::Debug for GcsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcsPath({})", self.path())
    }
}

impl GcsPath {
    /// Path for `bucket`/`key`
    pub fn new(client: Arc<dyn GcsApi>, bucket: impl Into<String>, key: &str) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: join_key(key, &[]),
            md5: None,
        }
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object name
    pub fn key(&self) -> &str {
        &self.key
    }

    fn sibling(&self, key: String, md5: Option<Hash>) -> GcsPath {
        GcsPath {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key,
            md5,
        }
    }

    fn translate(&self, e: ClientError) -> Error {
        e.into_error("gcs", &self.path())
    }

    async fn list(&self, delimiter: Option<&str>) -> Result<Vec<VfsPath>> {
        let prefix = dir_prefix(&self.key);
        let mut out: Vec<VfsPath> = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = Backoff::object_store_read()
                .retry("gcs list", || {
                    let prefix = prefix.clone();
                    let token = token.clone();
                    async move {
                        self.client
                            .list_objects(&self.bucket, &prefix, delimiter.map(str::to_string), token)
                            .await
                            .map(Some)
                            .map_err(|e| self.translate(e))
                    }
                })
                .await?;
            for object in page.objects {
                if object.name == prefix {
                    continue;
                }
                let md5 = decode_md5(object.md5_hash.as_deref());
                out.push(Arc::new(self.sibling(object.name, md5)));
            }
            for p in page.prefixes {
                out.push(Arc::new(self.sibling(join_key(&p, &[]), None)));
            }
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Path for GcsPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.sibling(join_key(&self.key, parts), None))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        Backoff::object_store_read()
            .retry("gcs read", || async {
                self.client
                    .get_object(&self.bucket, &self.key)
                    .await
                    .map(Some)
                    .map_err(|e| self.translate(e))
            })
            .await
    }

    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let predefined = match acl {
            None => None,
            Some(Acl::Gcs(gcs)) => Some(gcs.predefined.clone()),
            Some(other) => {
                return Err(Error::invalid_input(format!(
                    "unexpected acl {other:?} for {}",
                    self.path()
                )))
            }
        };
        Backoff::object_store_write()
            .retry("gcs write", || {
                let predefined = predefined.clone();
                async move {
                    self.client
                        .insert_object(&self.bucket, &self.key, data.to_vec(), predefined)
                        .await
                        .map(Some)
                        .map_err(|e| self.translate(e))
                }
            })
            .await
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let _guard = CREATE_LOCK.lock().await;
        match self.client.get_metadata(&self.bucket, &self.key).await {
            Ok(_) => Err(Error::already_exists(self.path())),
            Err(e) if e.is_not_found() => self.write_file(data, acl).await,
            Err(e) => Err(self.translate(e)),
        }
    }

    async fn remove(&self) -> Result<()> {
        self.client
            .delete_object(&self.bucket, &self.key)
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
        format!("{GCS_SCHEME}{}/{}", self.bucket, self.key)
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
        let meta = self
            .client
            .get_metadata(&self.bucket, &self.key)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(decode_md5(meta.md5_hash.as_deref()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
