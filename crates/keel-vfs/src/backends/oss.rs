//! Aliyun OSS backend

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use keel_common::hashing::{Hash, HashAlgorithm};
use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::client::ClientError;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, dir_prefix, join_key};

/// URL scheme of OSS paths
pub const OSS_SCHEME: &str = "oss://";

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Object summary
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OssObject {
    /// Object key
    pub key: String,
    /// Quoted ETag
    pub etag: Option<String>,
}

/// One page of a listing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OssListPage {
    /// Objects in this page
    pub objects: Vec<OssObject>,
    /// Common prefixes when a delimiter was given
    pub prefixes: Vec<String>,
    /// Marker for the next page
    pub next_marker: Option<String>,
}

/// The subset of the OSS API used by the backend
#[async_trait]
pub trait OssApi: Send + Sync {
    /// Download an object
    async fn get_object(&self, bucket: &str, key: &str) -> std::result::Result<Vec<u8>, ClientError>;
    /// Object metadata
    async fn head_object(&self, bucket: &str, key: &str) -> std::result::Result<OssObject, ClientError>;
    /// Upload an object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        acl: Option<String>,
    ) -> std::result::Result<(), ClientError>;
    /// Delete an object
    async fn delete_object(&self, bucket: &str, key: &str) -> std::result::Result<(), ClientError>;
    /// List objects under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<String>,
        marker: Option<String>,
    ) -> std::result::Result<OssListPage, ClientError>;
}

/// Builds a client for a region
pub trait OssClientFactory: Send + Sync {
    /// Client for `region` using the given access key
    fn client(&self, region: &str, access_key_id: &str, access_key_secret: &str)
        -> Result<Arc<dyn OssApi>>;
}

fn parse_etag(etag: Option<&str>) -> Option<Hash> {
    let etag = etag?.trim_matches('"');
    if etag.contains('-') {
        return None;
    }
    HashAlgorithm::Md5.parse_hex(&etag.to_ascii_lowercase()).ok()
}

/// An object in an OSS bucket
#[derive(Clone)]
pub struct OssPath {
    client: Arc<dyn OssApi>,
    region: String,
    bucket: String,
    key: String,
    etag: Option<Hash>,
}

impl fmt::Debug for OssPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OssPath({})", self.path())
    }
}

impl OssPath {
    /// Path for `bucket`/`key` in `region`
    pub fn new(
        client: Arc<dyn OssApi>,
        region: impl Into<String>,
        bucket: impl Into<String>,
        key: &str,
    ) -> Self {
        Self {
            client,
            region: region.into(),
            bucket: bucket.into(),
            key: join_key(key, &[]),
            etag: None,
        }
    }

    /// HTTPS URL of the object
    pub fn https_url(&self) -> String {
        format!(
            "https://{}.oss-{}.aliyuncs.com/{}",
            self.bucket, self.region, self.key
        )
    }

    fn sibling(&self, key: String, etag: Option<Hash>) -> OssPath {
        OssPath {
            client: self.client.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            key,
            etag,
        }
    }

    fn translate(&self, e: ClientError) -> Error {
        e.into_error("oss", &self.path())
    }

    async fn list(&self, delimiter: Option<&str>) -> Result<Vec<VfsPath>> {
        let prefix = dir_prefix(&self.key);
        let mut out: Vec<VfsPath> = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects(&self.bucket, &prefix, delimiter.map(str::to_string), marker)
                .await
                .map_err(|e| self.translate(e))?;
            for object in page.objects {
                if object.key == prefix {
                    continue;
                }
                let etag = parse_etag(object.etag.as_deref());
                out.push(Arc::new(self.sibling(object.key, etag)));
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
impl Path for OssPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.sibling(join_key(&self.key, parts), None))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        Backoff::object_store_read()
            .retry("oss read", || async {
                self.client
                    .get_object(&self.bucket, &self.key)
                    .await
                    .map(Some)
                    .map_err(|e| self.translate(e))
            })
            .await
    }

    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let canned = match acl {
            None => None,
            Some(Acl::Oss(oss)) => Some(oss.canned.clone()),
            Some(other) => {
                return Err(Error::invalid_input(format!(
                    "unexpected acl {other:?} for {}",
                    self.path()
                )))
            }
        };
        Backoff::object_store_write()
            .retry("oss write", || {
                let canned = canned.clone();
                async move {
                    self.client
                        .put_object(&self.bucket, &self.key, data.to_vec(), canned)
                        .await
                        .map(Some)
                        .map_err(|e| self.translate(e))
                }
            })
            .await
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let _guard = CREATE_LOCK.lock().await;
        match self.client.head_object(&self.bucket, &self.key).await {
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
        format!("{OSS_SCHEME}{}/{}", self.bucket, self.key)
    }

    async fn preferred_hash(&self) -> Result<Option<Hash>> {
        self.hash(HashAlgorithm::Md5).await
    }

    async fn hash(&self, algorithm: HashAlgorithm) -> Result<Option<Hash>> {
        if algorithm != HashAlgorithm::Md5 {
            return Ok(None);
        }
        if let Some(etag) = &self.etag {
            return Ok(Some(etag.clone()));
        }
        let head = self
            .client
            .head_object(&self.bucket, &self.key)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(parse_etag(head.etag.as_deref()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
