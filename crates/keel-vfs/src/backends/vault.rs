//! Vault KV version 2 backend
//!
//! `vault://host:port/<mount>/<key>` maps to the KV v2 secret `<key>` in
//! `<mount>`; the file contents live base64-encoded under the `file` field.
//! Add `?tls=false` to talk plain HTTP.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::client::ClientError;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, join_key};

/// URL scheme of Vault paths
pub const VAULT_SCHEME: &str = "vault://";

/// Environment variable holding the Vault token
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

/// Default Vault port
pub const DEFAULT_VAULT_PORT: u16 = 8200;

const FILE_FIELD: &str = "file";

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// KV v2 operations used by the backend
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Latest version of the secret's file field
    async fn read(&self, mount: &str, key: &str) -> std::result::Result<Vec<u8>, ClientError>;
    /// Write a new version
    async fn write(&self, mount: &str, key: &str, data: &[u8]) -> std::result::Result<(), ClientError>;
    /// Soft-delete the latest version
    async fn delete(&self, mount: &str, key: &str) -> std::result::Result<(), ClientError>;
    /// Remove the secret with its whole history
    async fn destroy(&self, mount: &str, key: &str) -> std::result::Result<(), ClientError>;
    /// Names under `key`; directories end with `/`
    async fn list(&self, mount: &str, key: &str) -> std::result::Result<Vec<String>, ClientError>;
}

/// Builds clients for a Vault address
pub trait VaultConnector: Send + Sync {
    /// Client for `address` (scheme://host:port)
    fn client(&self, address: &str) -> Result<Arc<dyn VaultApi>>;
}

/// Talks to Vault's HTTP API with a static token
#[derive(Clone, Debug)]
pub struct HttpVaultClient {
    http: reqwest::Client,
    address: String,
    token: String,
}

#[derive(Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Deserialize)]
struct ReadData {
    data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Deserialize)]
struct ListData {
    keys: Vec<String>,
}

impl HttpVaultClient {
    /// Client for `address` authenticating with `token`
    pub fn new(http: reqwest::Client, address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            address: address.into(),
            token: token.into(),
        }
    }

    fn url(&self, mount: &str, section: &str, key: &str) -> String {
        format!("{}/v1/{mount}/{section}/{key}", self.address.trim_end_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> std::result::Result<reqwest::Response, ClientError> {
        let response = request.header("X-Vault-Token", &self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::new(
            Some(status.as_u16()),
            status.canonical_reason().unwrap_or("Unknown"),
            body,
        ))
    }
}

#[async_trait]
impl VaultApi for HttpVaultClient {
    async fn read(&self, mount: &str, key: &str) -> std::result::Result<Vec<u8>, ClientError> {
        let response = self
            .send(self.http.get(self.url(mount, "data", key)))
            .await?;
        let parsed: ReadResponse = response.json().await?;
        let encoded = parsed
            .data
            .data
            .get(FILE_FIELD)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::not_found("MissingFileField"))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ClientError::new(Some(422), "InvalidEncoding", e.to_string()))
    }

    async fn write(&self, mount: &str, key: &str, data: &[u8]) -> std::result::Result<(), ClientError> {
        let body = json!({
            "data": { "file": base64::engine::general_purpose::STANDARD.encode(data) }
        });
        self.send(self.http.post(self.url(mount, "data", key)).json(&body))
            .await
            .map(|_| ())
    }

    async fn delete(&self, mount: &str, key: &str) -> std::result::Result<(), ClientError> {
        self.send(self.http.delete(self.url(mount, "data", key)))
            .await
            .map(|_| ())
    }

    async fn destroy(&self, mount: &str, key: &str) -> std::result::Result<(), ClientError> {
        self.send(self.http.delete(self.url(mount, "metadata", key)))
            .await
            .map(|_| ())
    }

    async fn list(&self, mount: &str, key: &str) -> std::result::Result<Vec<String>, ClientError> {
        let request = self
            .http
            .get(self.url(mount, "metadata", key))
            .query(&[("list", "true")]);
        let parsed: ListResponse = self.send(request).await?.json().await?;
        Ok(parsed.data.keys)
    }
}

/// Connector producing [`HttpVaultClient`]s with a fixed token
#[derive(Clone, Debug)]
pub struct HttpVaultConnector {
    http: reqwest::Client,
    token: String,
}

impl HttpVaultConnector {
    /// Connector using `token` for every client
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }
}

impl VaultConnector for HttpVaultConnector {
    fn client(&self, address: &str) -> Result<Arc<dyn VaultApi>> {
        Ok(Arc::new(HttpVaultClient::new(
            self.http.clone(),
            address,
            self.token.clone(),
        )))
    }
}

/// Components of a `vault://` URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultLocation {
    /// `scheme://host:port` of the server
    pub address: String,
    /// Host and port as written in the URL
    pub authority: String,
    /// KV mount
    pub mount: String,
    /// Secret key under the mount
    pub key: String,
    /// True when TLS is used
    pub tls: bool,
}

impl VaultLocation {
    /// Parse `vault://host[:port]/mount/key[?tls=false]`
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| Error::invalid_input(format!("invalid vault url {raw:?}: {e}")))?;
        if url.scheme() != "vault" {
            return Err(Error::invalid_input(format!("not a vault url: {raw}")));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_input(format!("vault url has no host: {raw}")))?;
        let port = url.port().unwrap_or(DEFAULT_VAULT_PORT);
        let tls = !url
            .query_pairs()
            .any(|(k, v)| k == "tls" && v == "false");
        let path = url.path().trim_start_matches('/');
        let (mount, key) = path
            .split_once('/')
            .ok_or_else(|| Error::invalid_input(format!("vault url needs a mount and key: {raw}")))?;
        let scheme = if tls { "https" } else { "http" };
        Ok(Self {
            address: format!("{scheme}://{host}:{port}"),
            authority: format!("{host}:{port}"),
            mount: mount.to_string(),
            key: join_key(key, &[]),
            tls,
        })
    }
}

/// A secret in a Vault KV v2 mount
#[derive(Clone)]
pub struct VaultPath {
    client: Arc<dyn VaultApi>,
    location: VaultLocation,
}

impl fmt::Debug for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultPath({})", self.path())
    }
}

impl VaultPath {
    /// Path at `location`
    pub fn new(client: Arc<dyn VaultApi>, location: VaultLocation) -> Self {
        Self { client, location }
    }

    fn with_key(&self, key: String) -> VaultPath {
        VaultPath {
            client: self.client.clone(),
            location: VaultLocation {
                key,
                ..self.location.clone()
            },
        }
    }

    fn translate(&self, e: ClientError) -> Error {
        e.into_error("vault", &self.path())
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        self.client
            .list(&self.location.mount, &self.location.key)
            .await
            .map_err(|e| self.translate(e))
    }
}

#[async_trait]
impl Path for VaultPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.with_key(join_key(&self.location.key, parts)))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        Backoff::object_store_read()
            .retry("vault read", || async {
                self.client
                    .read(&self.location.mount, &self.location.key)
                    .await
                    .map(Some)
                    .map_err(|e| self.translate(e))
            })
            .await
    }

    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        if let Some(acl) = acl {
            return Err(Error::invalid_input(format!("vault does not support acl {acl}")));
        }
        Backoff::object_store_write()
            .retry("vault write", || async {
                self.client
                    .write(&self.location.mount, &self.location.key, data)
                    .await
                    .map(Some)
                    .map_err(|e| self.translate(e))
            })
            .await
    }

    async fn create_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let _guard = CREATE_LOCK.lock().await;
        match self.read_file().await {
            Ok(_) => Err(Error::already_exists(self.path())),
            Err(e) if e.is_not_exist() => self.write_file(data, acl).await,
            Err(e) => Err(e),
        }
    }

    async fn remove(&self) -> Result<()> {
        self.client
            .delete(&self.location.mount, &self.location.key)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn remove_all_versions(&self) -> Result<()> {
        self.client
            .destroy(&self.location.mount, &self.location.key)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn read_dir(&self) -> Result<Vec<VfsPath>> {
        let names = self.list_names().await?;
        Ok(names
            .into_iter()
            .map(|name| -> VfsPath {
                Arc::new(self.with_key(join_key(&self.location.key, &[name.trim_end_matches('/')])))
            })
            .collect())
    }

    async fn read_tree(&self) -> Result<Vec<VfsPath>> {
        let mut out: Vec<VfsPath> = Vec::new();
        let mut pending = vec![self.clone()];
        while let Some(dir) = pending.pop() {
            for name in dir.list_names().await? {
                let child = dir.with_key(join_key(&dir.location.key, &[name.trim_end_matches('/')]));
                if name.ends_with('/') {
                    pending.push(child);
                } else {
                    out.push(Arc::new(child));
                }
            }
        }
        Ok(out)
    }

    fn base(&self) -> String {
        base_name(&self.location.key)
    }

    fn path(&self) -> String {
        let query = if self.location.tls { "" } else { "?tls=false" };
        format!(
            "{VAULT_SCHEME}{}/{}/{}{query}",
            self.location.authority, self.location.mount, self.location.key
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVault;

    #[test]
    fn parse_location() {
        let loc = VaultLocation::parse("vault://vault.local/kv/cluster/secrets?tls=false").unwrap();
        assert_eq!(loc.address, "http://vault.local:8200");
        assert_eq!(loc.mount, "kv");
        assert_eq!(loc.key, "cluster/secrets");
        assert!(!loc.tls);

        let loc = VaultLocation::parse("vault://vault.local:9000/kv/a").unwrap();
        assert_eq!(loc.address, "https://vault.local:9000");

        assert!(VaultLocation::parse("vault://vault.local/kv").is_err());
    }

    #[tokio::test]
    async fn tree_walk_and_version_destroy() {
        let fake = Arc::new(FakeVault::default());
        let loc = VaultLocation::parse("vault://v/kv/cluster?tls=false").unwrap();
        let root = VaultPath::new(fake.clone(), loc);
        root.join(&["a"]).write_file(b"1", None).await.unwrap();
        root.join(&["d", "b"]).write_file(b"2", None).await.unwrap();

        let mut tree: Vec<String> = root.read_tree().await.unwrap().iter().map(|p| p.path()).collect();
        tree.sort();
        assert_eq!(
            tree,
            vec![
                "vault://v:8200/kv/cluster/a?tls=false",
                "vault://v:8200/kv/cluster/d/b?tls=false"
            ]
        );

        let a = root.join(&["a"]);
        assert!(a.create_file(b"x", None).await.unwrap_err().is_already_exists());
        a.remove_all_versions().await.unwrap();
        assert!(a.read_file().await.unwrap_err().is_not_exist());
    }
}
