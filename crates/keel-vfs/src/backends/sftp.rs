//! SFTP backend for `ssh://user@host/path`
//!
//! Writes go to a temporary sibling and are renamed into place.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::client::ClientError;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, join_key, parent_key};

/// URL scheme of SFTP paths
pub const SSH_SCHEME: &str = "ssh://";

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Directory entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SftpEntry {
    /// Entry name
    pub name: String,
    /// True for directories
    pub is_dir: bool,
}

/// File operations over an established SFTP session
#[async_trait]
pub trait SftpSession: Send + Sync {
    /// Read a whole file
    async fn read(&self, path: &str) -> std::result::Result<Vec<u8>, ClientError>;
    /// Create or truncate and write a file
    async fn write(&self, path: &str, data: &[u8]) -> std::result::Result<(), ClientError>;
    /// Atomically rename, replacing the destination
    async fn rename(&self, from: &str, to: &str) -> std::result::Result<(), ClientError>;
    /// Remove a file
    async fn remove(&self, path: &str) -> std::result::Result<(), ClientError>;
    /// Create a directory and its parents
    async fn mkdir_all(&self, path: &str) -> std::result::Result<(), ClientError>;
    /// Directory listing
    async fn read_dir(&self, path: &str) -> std::result::Result<Vec<SftpEntry>, ClientError>;
    /// Entry metadata
    async fn stat(&self, path: &str) -> std::result::Result<SftpEntry, ClientError>;
}

/// Opens SFTP sessions
pub trait SshConnector: Send + Sync {
    /// Session to `host` as `user`
    fn session(&self, user: &str, host: &str) -> Result<Arc<dyn SftpSession>>;
}

/// A file on a remote host
#[derive(Clone)]
pub struct SshPath {
    session: Arc<dyn SftpSession>,
    user: String,
    host: String,
    location: String,
}

impl fmt::Debug for SshPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SshPath({})", self.path())
    }
}

/// User, host and absolute path of an `ssh://` URL
pub fn parse_ssh_url(raw: &str) -> Result<(String, String, String)> {
    let url = Url::parse(raw).map_err(|e| Error::invalid_input(format!("invalid ssh url {raw:?}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid_input(format!("ssh url has no host: {raw}")))?;
    let user = if url.username().is_empty() {
        "root"
    } else {
        url.username()
    };
    Ok((user.to_string(), host.to_string(), join_key(url.path(), &[])))
}

impl SshPath {
    /// Path `location` on `host`
    pub fn new(
        session: Arc<dyn SftpSession>,
        user: impl Into<String>,
        host: impl Into<String>,
        location: &str,
    ) -> Self {
        Self {
            session,
            user: user.into(),
            host: host.into(),
            location: join_key(location, &[]),
        }
    }

    fn with_location(&self, location: String) -> SshPath {
        SshPath {
            session: self.session.clone(),
            user: self.user.clone(),
            host: self.host.clone(),
            location,
        }
    }

    fn translate(&self, e: ClientError) -> Error {
        e.into_error("ssh", &self.path())
    }
}

#[async_trait]
impl Path for SshPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.with_location(join_key(&self.location, parts)))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        self.session
            .read(&self.location)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        if let Some(acl) = acl {
            return Err(Error::invalid_input(format!("ssh does not support acl {acl}")));
        }
        let dir = parent_key(&self.location);
        if !dir.is_empty() {
            self.session
                .mkdir_all(dir)
                .await
                .map_err(|e| self.translate(e))?;
        }
        let suffix: u64 = rand::thread_rng().gen();
        let tmp = format!("{}.tmp-{suffix:x}", self.location);
        self.session
            .write(&tmp, data)
            .await
            .map_err(|e| self.translate(e))?;
        if let Err(e) = self.session.rename(&tmp, &self.location).await {
            if let Err(cleanup) = self.session.remove(&tmp).await {
                warn!(path = %tmp, error = %cleanup, "failed to remove temporary file");
            }
            return Err(self.translate(e));
        }
        Ok(())
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let _guard = CREATE_LOCK.lock().await;
        match self.session.stat(&self.location).await {
            Ok(_) => Err(Error::already_exists(self.path())),
            Err(e) if e.is_not_found() => self.write_file(data, acl).await,
            Err(e) => Err(self.translate(e)),
        }
    }

    async fn remove(&self) -> Result<()> {
        self.session
            .remove(&self.location)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn read_dir(&self) -> Result<Vec<VfsPath>> {
        let entries = self
            .session
            .read_dir(&self.location)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(entries
            .into_iter()
            .map(|e| -> VfsPath { Arc::new(self.with_location(join_key(&self.location, &[&e.name]))) })
            .collect())
    }

    async fn read_tree(&self) -> Result<Vec<VfsPath>> {
        let mut out: Vec<VfsPath> = Vec::new();
        let mut pending = vec![self.location.clone()];
        while let Some(dir) = pending.pop() {
            let entries = self
                .session
                .read_dir(&dir)
                .await
                .map_err(|e| self.translate(e))?;
            for entry in entries {
                let child = join_key(&dir, &[&entry.name]);
                if entry.is_dir {
                    pending.push(child);
                } else {
                    out.push(Arc::new(self.with_location(child)));
                }
            }
        }
        Ok(out)
    }

    fn base(&self) -> String {
        base_name(&self.location)
    }

    fn path(&self) -> String {
        format!("{SSH_SCHEME}{}@{}{}", self.user, self.host, self.location)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSftp;

    #[test]
    fn parse_url_defaults_user() {
        let (user, host, path) = parse_ssh_url("ssh://10.0.0.1/etc/kubernetes").unwrap();
        assert_eq!((user.as_str(), host.as_str(), path.as_str()), ("root", "10.0.0.1", "/etc/kubernetes"));
        let (user, _, _) = parse_ssh_url("ssh://admin@10.0.0.1/x").unwrap();
        assert_eq!(user, "admin");
    }

    #[tokio::test]
    async fn write_goes_through_temporary_file() {
        let fake = Arc::new(FakeSftp::default());
        let p = SshPath::new(fake.clone(), "root", "h", "/srv/state/config");
        p.write_file(b"v", None).await.unwrap();
        assert_eq!(p.read_file().await.unwrap(), b"v");
        assert_eq!(fake.renames(), 1);
        assert_eq!(fake.file_count(), 1);
        assert_eq!(p.path(), "ssh://root@h/srv/state/config");
        assert!(p.create_file(b"x", None).await.unwrap_err().is_already_exists());
        assert_eq!(p.hash(keel_common::hashing::HashAlgorithm::Sha256).await.unwrap(), None);
    }
}
