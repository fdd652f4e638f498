//! The uniform path abstraction implemented by every backend

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use keel_common::hashing::{Hash, HashAlgorithm};
use keel_common::{Error, Result};

use crate::acl::Acl;

/// Shared handle to a backend path
pub type VfsPath = Arc<dyn Path>;

/// A location in some storage backend
///
/// Reads of missing objects fail with [`Error::NotExist`]; `create_file`
/// fails with [`Error::AlreadyExists`] when the object is already present.
/// Backends that cannot report a content hash return `Ok(None)` from
/// [`Path::hash`] and [`Path::preferred_hash`].
#[async_trait]
pub trait Path: fmt::Debug + Send + Sync + Any {
    /// Child path; joining is associative and collapses `.` and empty segments
    fn join(&self, parts: &[&str]) -> VfsPath;

    /// Whole contents
    async fn read_file(&self) -> Result<Vec<u8>>;

    /// Stream contents into `out`, returning the byte count
    async fn write_to(&self, out: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64> {
        let data = self.read_file().await?;
        out.write_all(&data)
            .await
            .map_err(|e| Error::io(format!("copying {}", self.path()), e))?;
        Ok(data.len() as u64)
    }

    /// Replace contents
    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()>;

    /// Write only if absent
    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()>;

    /// Delete the current object
    async fn remove(&self) -> Result<()>;

    /// Delete every stored version; backends without versioning just remove
    async fn remove_all_versions(&self) -> Result<()> {
        self.remove().await
    }

    /// Immediate children
    async fn read_dir(&self) -> Result<Vec<VfsPath>>;

    /// All descendant files
    async fn read_tree(&self) -> Result<Vec<VfsPath>>;

    /// Final segment
    fn base(&self) -> String;

    /// Canonical URL of this location
    fn path(&self) -> String;

    /// Cheapest hash the backend can report
    async fn preferred_hash(&self) -> Result<Option<Hash>> {
        Ok(None)
    }

    /// Hash of the contents in `algorithm`, when the backend can report it
    async fn hash(&self, _algorithm: HashAlgorithm) -> Result<Option<Hash>> {
        Ok(None)
    }

    /// Downcast support for backend-specific behaviour
    fn as_any(&self) -> &dyn Any;
}

impl PartialEq for dyn Path {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl fmt::Display for dyn Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Downcast a path to its concrete backend type
pub fn downcast<T: Path>(path: &dyn Path) -> Option<&T> {
    path.as_any().downcast_ref::<T>()
}
