//! OpenStack Swift backend

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::debug;

use keel_common::hashing::{Hash, HashAlgorithm};
use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::client::ClientError;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, dir_prefix, join_key};

/// URL scheme of Swift paths
pub const SWIFT_SCHEME: &str = "swift://";

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Object summary
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwiftObject {
    /// Object name
    pub name: String,
    /// Hex MD5 of the contents
    pub hash: Option<String>,
}

/// One page of a listing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwiftListPage {
    /// Objects in this page
    pub objects: Vec<SwiftObject>,
    /// Pseudo-directories when a delimiter was given
    pub subdirs: Vec<String>,
    /// Marker for the next page
    pub next_marker: Option<String>,
}

/// The subset of the Swift object API used by the backend
#[async_trait]
pub trait SwiftApi: Send + Sync {
    /// Download an object
    async fn get_object(&self, container: &str, name: &str) -> std::result::Result<Vec<u8>, ClientError>;
    /// Object metadata
    async fn head_object(&self, container: &str, name: &str)
        -> std::result::Result<SwiftObject, ClientError>;
    /// Upload an object; fails with not-found if the container is missing
    async fn put_object(&self, container: &str, name: &str, data: Vec<u8>)
        -> std::result::Result<(), ClientError>;
    /// Delete an object
    async fn delete_object(&self, container: &str, name: &str) -> std::result::Result<(), ClientError>;
    /// List objects under `prefix`
    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<String>,
        marker: Option<String>,
    ) -> std::result::Result<SwiftListPage, ClientError>;
    /// Create a container
    async fn create_container(&self, container: &str) -> std::result::Result<(), ClientError>;
}

/// An object in a Swift container
#[derive(Clone)]
pub struct SwiftPath {
    client: Arc<dyn SwiftApi>,
    container: String,
    key: String,
    md5: Option<Hash>,
}

impl fmt::Debug for SwiftPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwiftPath({})", self.path())
    }
}

impl SwiftPath {
    /// Path for `container`/`key`
    pub fn new(client: Arc<dyn SwiftApi>, container: impl Into<String>, key: &str) -> Self {
        Self {
            client,
            container: container.into(),
            key: join_key(key, &[]),
            md5: None,
        }
    }

    fn sibling(&self, key: String, md5: Option<Hash>) -> SwiftPath {
        SwiftPath {
            client: self.client.clone(),
            container: self.container.clone(),
            key,
            md5,
        }
    }

    fn translate(&self, e: ClientError) -> Error {
        e.into_error("swift", &self.path())
    }

    async fn list(&self, delimiter: Option<&str>) -> Result<Vec<VfsPath>> {
        let prefix = dir_prefix(&self.key);
        let mut out: Vec<VfsPath> = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects(&self.container, &prefix, delimiter.map(str::to_string), marker)
                .await
                .map_err(|e| self.translate(e))?;
            for object in page.objects {
                if object.name == prefix {
                    continue;
                }
                let md5 = object
                    .hash
                    .as_deref()
                    .and_then(|h| HashAlgorithm::Md5.parse_hex(h).ok());
                out.push(Arc::new(self.sibling(object.name, md5)));
            }
            for dir in page.subdirs {
                out.push(Arc::new(self.sibling(join_key(&dir, &[]), None)));
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
impl Path for SwiftPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.sibling(join_key(&self.key, parts), None))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        Backoff::object_store_read()
            .retry("swift read", || async {
                self.client
                    .get_object(&self.container, &self.key)
                    .await
                    .map(Some)
                    .map_err(|e| self.translate(e))
            })
            .await
    }

    /// Writes the object, creating the container on first use
    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        if let Some(acl) = acl {
            return Err(Error::invalid_input(format!("swift does not support acl {acl}")));
        }
        Backoff::object_store_write()
            .retry("swift write", || async {
                match self
                    .client
                    .put_object(&self.container, &self.key, data.to_vec())
                    .await
                {
                    Ok(()) => Ok(Some(())),
                    Err(e) if e.is_not_found() => {
                        debug!(container = %self.container, "creating swift container");
                        self.client
                            .create_container(&self.container)
                            .await
                            .map_err(|e| self.translate(e))?;
                        Ok(None)
                    }
                    Err(e) => Err(self.translate(e)),
                }
            })
            .await
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let _guard = CREATE_LOCK.lock().await;
        match self.client.head_object(&self.container, &self.key).await {
            Ok(_) => Err(Error::already_exists(self.path())),
            Err(e) if e.is_not_found() => self.write_file(data, acl).await,
            Err(e) => Err(self.translate(e)),
        }
    }

    async fn remove(&self) -> Result<()> {
        self.client
            .delete_object(&self.container, &self.key)
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
        format!("{SWIFT_SCHEME}{}/{}", self.container, self.key)
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
        let head = self
            .client
            .head_object(&self.container, &self.key)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(head
            .hash
            .as_deref()
            .and_then(|h| HashAlgorithm::Md5.parse_hex(h).ok()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
