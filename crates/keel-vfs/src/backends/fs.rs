//! Local filesystem backend

use std::any::Any;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use keel_common::hashing::{hash_file, Hash, HashAlgorithm};
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, join_key};

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// A file or directory on local disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsPath {
    location: String,
}

impl FsPath {
    /// Path at `location`
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    fn std_path(&self) -> PathBuf {
        PathBuf::from(&self.location)
    }

    fn map_io(&self, action: &str, e: std::io::Error) -> Error {
        if e.kind() == IoErrorKind::NotFound {
            Error::not_exist(&self.location)
        } else {
            Error::io(format!("{action} {}", self.location), e)
        }
    }

    async fn walk(&self, out: &mut Vec<VfsPath>) -> Result<()> {
        let mut pending = vec![self.std_path()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| self.map_io("reading directory", e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| self.map_io("reading directory", e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| self.map_io("reading directory", e))?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else {
                    out.push(Arc::new(FsPath::new(entry.path().to_string_lossy())));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Path for FsPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(FsPath::new(join_key(&self.location, parts)))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.location)
            .await
            .map_err(|e| self.map_io("reading", e))
    }

    async fn write_file(&self, data: &[u8], _acl: Option<&Acl>) -> Result<()> {
        let target = self.std_path();
        let dir = target
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io(format!("creating directory {}", dir.display()), e))?;

        // The temp file is unlinked on drop unless persisted.
        let prefix = format!(".{}.", self.base());
        let data = data.to_vec();
        let location = self.location.clone();
        tokio::task::spawn_blocking(move || {
            let mut tmp = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".tmp")
                .tempfile_in(&dir)
                .map_err(|e| Error::io(format!("creating temp file in {}", dir.display()), e))?;
            tmp.write_all(&data)
                .and_then(|()| tmp.as_file().sync_all())
                .map_err(|e| Error::io(format!("writing {}", tmp.path().display()), e))?;
            tmp.persist(&target)
                .map_err(|e| Error::io(format!("renaming into {location}"), e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::fatal("fs", format!("write task for {} failed: {e}", self.location)))?
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let _guard = CREATE_LOCK.lock().await;
        let exists = tokio::fs::try_exists(&self.location)
            .await
            .map_err(|e| self.map_io("checking", e))?;
        if exists {
            return Err(Error::already_exists(&self.location));
        }
        self.write_file(data, acl).await
    }

    async fn remove(&self) -> Result<()> {
        tokio::fs::remove_file(&self.location)
            .await
            .map_err(|e| self.map_io("removing", e))
    }

    async fn read_dir(&self) -> Result<Vec<VfsPath>> {
        let mut entries = tokio::fs::read_dir(&self.location)
            .await
            .map_err(|e| self.map_io("reading directory", e))?;
        let mut paths: Vec<VfsPath> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.map_io("reading directory", e))?
        {
            paths.push(Arc::new(FsPath::new(entry.path().to_string_lossy())));
        }
        Ok(paths)
    }

    async fn read_tree(&self) -> Result<Vec<VfsPath>> {
        let mut out = Vec::new();
        self.walk(&mut out).await?;
        Ok(out)
    }

    fn base(&self) -> String {
        base_name(&self.location)
    }

    fn path(&self) -> String {
        self.location.clone()
    }

    async fn preferred_hash(&self) -> Result<Option<Hash>> {
        self.hash(HashAlgorithm::Sha256).await
    }

    async fn hash(&self, algorithm: HashAlgorithm) -> Result<Option<Hash>> {
        match hash_file(&self.location, algorithm).await {
            Ok(h) => Ok(Some(h)),
            Err(e) if e.is_not_exist() => Err(Error::not_exist(&self.location)),
            Err(e) => Err(e),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::hashing::hash_bytes;

    #[tokio::test]
    async fn write_read_and_create_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let root = FsPath::new(dir.path().to_string_lossy());
        let p = root.join(&["state", "config"]);

        assert!(p.read_file().await.unwrap_err().is_not_exist());
        p.create_file(b"one", None).await.unwrap();
        assert!(p.create_file(b"two", None).await.unwrap_err().is_already_exists());
        assert_eq!(p.read_file().await.unwrap(), b"one");

        p.write_file(b"three", None).await.unwrap();
        assert_eq!(p.read_file().await.unwrap(), b"three");
        assert_eq!(
            p.preferred_hash().await.unwrap(),
            Some(hash_bytes(HashAlgorithm::Sha256, b"three"))
        );
    }

    #[tokio::test]
    async fn read_tree_lists_nested_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = FsPath::new(dir.path().to_string_lossy());
        root.join(&["a"]).write_file(b"1", None).await.unwrap();
        root.join(&["d", "b"]).write_file(b"2", None).await.unwrap();
        root.join(&["d", "e", "c"]).write_file(b"3", None).await.unwrap();

        let mut names: Vec<String> = root
            .read_tree()
            .await
            .unwrap()
            .iter()
            .map(|p| p.base())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);

        let dir_entries = root.read_dir().await.unwrap();
        assert_eq!(dir_entries.len(), 2);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = FsPath::new(dir.path().to_string_lossy());
        std::fs::create_dir_all(dir.path().join("state").join("config")).unwrap();

        let err = root.join(&["state", "config"]).write_file(b"x", None).await.unwrap_err();
        assert!(err.to_string().contains("renaming into"), "{err}");

        let names: Vec<String> = root
            .join(&["state"])
            .read_dir()
            .await
            .unwrap()
            .iter()
            .map(|p| p.base())
            .collect();
        assert_eq!(names, vec!["config"]);
    }

    #[tokio::test]
    async fn remove_missing_is_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let p = FsPath::new(dir.path().to_string_lossy()).join(&["nope"]);
        assert!(p.remove().await.unwrap_err().is_not_exist());
    }
}
