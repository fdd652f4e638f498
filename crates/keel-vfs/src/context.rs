//! URL dispatch to storage backends
//!
//! A [`VfsContext`] holds the backend clients and environment-derived
//! settings, and turns any supported URL into a [`VfsPath`]. One context is
//! normally installed process-wide with [`install_global`].

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use keel_common::env::EnvSource;
use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use crate::backends::azure::{AzureBlobPath, AzureClientFactory, AZURE_ACCOUNT_ENV, AZURE_SCHEME};
use crate::backends::fs::FsPath;
use crate::backends::gcs::{GcsApi, GcsPath, GCS_SCHEME};
use crate::backends::http::HttpPath;
use crate::backends::k8s::{K8sPath, KubeObjectStore, K8S_SCHEME};
use crate::backends::memfs::{MemFsContext, MEMFS_SCHEME};
use crate::backends::metadata::{MetadataPath, MetadataProvider, METADATA_SCHEME};
use crate::backends::oss::{OssClientFactory, OssPath, OSS_SCHEME};
use crate::backends::s3::{parse_aws_s3_url, S3ClientFactory, S3Config, S3Context, S3_SCHEME};
use crate::backends::sftp::{parse_ssh_url, SshConnector, SshPath, SSH_SCHEME};
use crate::backends::swift::{SwiftApi, SwiftPath, SWIFT_SCHEME};
use crate::backends::vault::{
    HttpVaultConnector, VaultConnector, VaultLocation, VaultPath, VAULT_SCHEME, VAULT_TOKEN_ENV,
};
use crate::path::VfsPath;
use crate::util::split_bucket;

static GLOBAL: OnceCell<Arc<VfsContext>> = OnceCell::new();

/// Settings read from the environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VfsConfig {
    /// `S3_REGION`
    pub s3_region: Option<String>,
    /// `S3_ENDPOINT`
    pub s3_endpoint: Option<String>,
    /// `AZURE_STORAGE_ACCOUNT`
    pub azure_storage_account: Option<String>,
    /// `VAULT_TOKEN`
    pub vault_token: Option<String>,
    /// `OSS_REGION`
    pub oss_region: Option<String>,
    /// `ALIYUN_ACCESS_KEY_ID`
    pub aliyun_access_key_id: Option<String>,
    /// `ALIYUN_ACCESS_KEY_SECRET`
    pub aliyun_access_key_secret: Option<String>,
}

impl VfsConfig {
    /// Read every setting from `env`
    pub fn from_env(env: &dyn EnvSource) -> Self {
        Self {
            s3_region: env.get("S3_REGION"),
            s3_endpoint: env.get("S3_ENDPOINT"),
            azure_storage_account: env.get(AZURE_ACCOUNT_ENV),
            vault_token: env.get(VAULT_TOKEN_ENV),
            oss_region: env.get("OSS_REGION"),
            aliyun_access_key_id: env.get("ALIYUN_ACCESS_KEY_ID"),
            aliyun_access_key_secret: env.get("ALIYUN_ACCESS_KEY_SECRET"),
        }
    }
}

/// Backend clients; a missing client makes its scheme unusable
#[derive(Clone, Default)]
pub struct VfsClients {
    /// S3 client factory
    pub s3: Option<Arc<dyn S3ClientFactory>>,
    /// GCS client
    pub gcs: Option<Arc<dyn GcsApi>>,
    /// Azure client factory
    pub azure: Option<Arc<dyn AzureClientFactory>>,
    /// Swift client
    pub swift: Option<Arc<dyn SwiftApi>>,
    /// OSS client factory
    pub oss: Option<Arc<dyn OssClientFactory>>,
    /// SFTP connector
    pub ssh: Option<Arc<dyn SshConnector>>,
    /// Vault connector; defaults to HTTP with `VAULT_TOKEN`
    pub vault: Option<Arc<dyn VaultConnector>>,
    /// Kubernetes store
    pub kube: Option<Arc<dyn KubeObjectStore>>,
}

/// Options for [`VfsContext::read_file`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadOptions {
    /// Retry policy; the backend's own policy when None
    pub backoff: Option<Backoff>,
}

/// Builds paths for URLs
pub struct VfsContext {
    config: VfsConfig,
    clients: VfsClients,
    http: reqwest::Client,
    s3: Option<Arc<S3Context>>,
    memfs: Arc<MemFsContext>,
}

impl std::fmt::Debug for VfsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfsContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn missing_client(scheme: &str) -> Error {
    Error::invalid_input(format!("no client configured for {scheme} paths"))
}

impl VfsContext {
    /// Context over `clients` using the process-wide memory tree
    pub fn new(config: VfsConfig, clients: VfsClients) -> Self {
        let s3 = clients.s3.as_ref().map(|factory| {
            Arc::new(S3Context::new(
                factory.clone(),
                S3Config {
                    region: config.s3_region.clone(),
                    endpoint: config.s3_endpoint.clone(),
                },
            ))
        });
        Self {
            config,
            clients,
            http: reqwest::Client::new(),
            s3,
            memfs: MemFsContext::global(),
        }
    }

    /// Context configured from `env` with the given clients
    pub fn from_env(env: &dyn EnvSource, clients: VfsClients) -> Self {
        Self::new(VfsConfig::from_env(env), clients)
    }

    /// Use `memfs` instead of the process-wide tree
    pub fn with_memfs(mut self, memfs: Arc<MemFsContext>) -> Self {
        self.memfs = memfs;
        self
    }

    /// Use `http` for HTTP, metadata and Vault requests
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Environment-derived settings
    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Shared S3 region and client cache
    pub fn s3_context(&self) -> Option<&Arc<S3Context>> {
        self.s3.as_ref()
    }

    /// Memory tree used for `memfs://` paths
    pub fn memfs(&self) -> &Arc<MemFsContext> {
        &self.memfs
    }

    /// Path for `url`
    pub fn build_vfs_path(&self, url: &str) -> Result<VfsPath> {
        if let Some(rest) = url.strip_prefix("file://") {
            return Ok(Arc::new(FsPath::new(rest)));
        }
        if !url.contains("://") {
            return Ok(Arc::new(FsPath::new(url)));
        }
        if let Some(rest) = url.strip_prefix(MEMFS_SCHEME) {
            return Ok(Arc::new(self.memfs.path(rest)));
        }
        if let Some(rest) = url.strip_prefix(S3_SCHEME) {
            let s3 = self.s3.as_ref().ok_or_else(|| missing_client("s3"))?;
            let (bucket, key) = split_bucket(rest);
            return Ok(Arc::new(s3.path(&bucket, &key)));
        }
        if let Some(rest) = url.strip_prefix(GCS_SCHEME) {
            let client = self.clients.gcs.clone().ok_or_else(|| missing_client("gs"))?;
            let (bucket, key) = split_bucket(rest);
            return Ok(Arc::new(GcsPath::new(client, bucket, &key)));
        }
        if let Some(rest) = url.strip_prefix(AZURE_SCHEME) {
            let factory = self.clients.azure.as_ref().ok_or_else(|| missing_client("azureblob"))?;
            let account = self.config.azure_storage_account.as_deref().ok_or_else(|| {
                Error::invalid_input(format!("{AZURE_ACCOUNT_ENV} must be set for {url}"))
            })?;
            let (container, key) = split_bucket(rest);
            return Ok(Arc::new(AzureBlobPath::new(
                factory.client(account)?,
                account,
                container,
                &key,
            )));
        }
        if let Some(rest) = url.strip_prefix(SWIFT_SCHEME) {
            let client = self.clients.swift.clone().ok_or_else(|| missing_client("swift"))?;
            let (container, key) = split_bucket(rest);
            return Ok(Arc::new(SwiftPath::new(client, container, &key)));
        }
        if let Some(rest) = url.strip_prefix(OSS_SCHEME) {
            return self.build_oss_path(url, rest);
        }
        if url.starts_with(VAULT_SCHEME) {
            let location = VaultLocation::parse(url)?;
            let client = match &self.clients.vault {
                Some(connector) => connector.client(&location.address)?,
                None => {
                    let token = self.config.vault_token.clone().ok_or_else(|| {
                        Error::invalid_input(format!("{VAULT_TOKEN_ENV} must be set for {url}"))
                    })?;
                    HttpVaultConnector::new(self.http.clone(), token).client(&location.address)?
                }
            };
            return Ok(Arc::new(VaultPath::new(client, location)));
        }
        if url.starts_with(SSH_SCHEME) {
            let connector = self.clients.ssh.as_ref().ok_or_else(|| missing_client("ssh"))?;
            let (user, host, location) = parse_ssh_url(url)?;
            let session = connector.session(&user, &host)?;
            return Ok(Arc::new(SshPath::new(session, user, host, &location)));
        }
        if let Some(rest) = url.strip_prefix(K8S_SCHEME) {
            let store = self.clients.kube.clone().ok_or_else(|| missing_client("k8s"))?;
            let (namespace, key) = split_bucket(rest);
            return Ok(Arc::new(K8sPath::new(store, namespace, &key)));
        }
        if let Some(rest) = url.strip_prefix(METADATA_SCHEME) {
            let (host, key) = split_bucket(rest);
            let provider = MetadataProvider::from_host(&host)?;
            return Ok(Arc::new(MetadataPath::with_default_endpoint(
                self.http.clone(),
                provider,
                &key,
            )));
        }
        if url.starts_with("https://") || url.starts_with("http://") {
            return Ok(Arc::new(HttpPath::new(self.http.clone(), url)));
        }
        Err(Error::invalid_input(format!("unknown / unhandled path type: {url:?}")))
    }

    fn build_oss_path(&self, url: &str, rest: &str) -> Result<VfsPath> {
        let factory = self.clients.oss.as_ref().ok_or_else(|| missing_client("oss"))?;
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| Error::invalid_input(format!("{name} must be set for {url}")))
        };
        let region = required(&self.config.oss_region, "OSS_REGION")?;
        let key_id = required(&self.config.aliyun_access_key_id, "ALIYUN_ACCESS_KEY_ID")?;
        let secret = required(&self.config.aliyun_access_key_secret, "ALIYUN_ACCESS_KEY_SECRET")?;
        let (bucket, key) = split_bucket(rest);
        let client = factory.client(&region, &key_id, &secret)?;
        Ok(Arc::new(OssPath::new(client, region, bucket, &key)))
    }

    /// Read `url`, retrying with `options.backoff` when given
    ///
    /// AWS S3 HTTPS URLs are read through the S3 backend (so credentials
    /// apply) when an S3 client is configured.
    pub async fn read_file(&self, url: &str, options: ReadOptions) -> Result<Vec<u8>> {
        let path = match (&self.s3, url.starts_with("https://")) {
            (Some(_), true) => match parse_aws_s3_url(url) {
                Ok(canonical) => {
                    debug!(url = %url, canonical = %canonical, "reading https url through s3");
                    self.build_vfs_path(&canonical)?
                }
                Err(_) => self.build_vfs_path(url)?,
            },
            _ => self.build_vfs_path(url)?,
        };
        match options.backoff {
            None => path.read_file().await,
            Some(backoff) => {
                backoff
                    .retry(&format!("read {url}"), || {
                        let path = path.clone();
                        async move { path.read_file().await.map(Some) }
                    })
                    .await
            }
        }
    }
}

/// Install the process-wide context; fails if one is already installed
pub fn install_global(context: Arc<VfsContext>) -> Result<()> {
    GLOBAL
        .set(context)
        .map_err(|_| Error::precondition("vfs context is already installed"))
}

/// The process-wide context
pub fn global() -> Result<Arc<VfsContext>> {
    GLOBAL
        .get()
        .cloned()
        .ok_or_else(|| Error::precondition("vfs context has not been installed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeObjectStore, FakeS3, FakeS3Factory};
    use keel_common::env::StaticEnv;

    fn context() -> VfsContext {
        let store = Arc::new(FakeObjectStore::default());
        VfsContext::new(
            VfsConfig::default(),
            VfsClients {
                s3: Some(Arc::new(FakeS3Factory::new(Arc::new(FakeS3::default())))),
                gcs: Some(store.clone()),
                swift: Some(store),
                ..Default::default()
            },
        )
        .with_memfs(Arc::new(MemFsContext::default()))
    }

    #[test]
    fn dispatches_by_scheme() {
        let ctx = context();
        assert_eq!(ctx.build_vfs_path("/tmp/state").unwrap().path(), "/tmp/state");
        assert_eq!(ctx.build_vfs_path("file:///tmp/state").unwrap().path(), "/tmp/state");
        assert_eq!(ctx.build_vfs_path("memfs://tests/a").unwrap().path(), "memfs://tests/a");
        assert_eq!(ctx.build_vfs_path("s3://bucket/c/config").unwrap().path(), "s3://bucket/c/config");
        assert_eq!(ctx.build_vfs_path("gs://bucket/c").unwrap().path(), "gs://bucket/c");
        assert_eq!(ctx.build_vfs_path("swift://container/c").unwrap().path(), "swift://container/c");
        assert_eq!(
            ctx.build_vfs_path("https://example.com/file").unwrap().path(),
            "https://example.com/file"
        );
        assert_eq!(
            ctx.build_vfs_path("metadata://gce/instance/attributes").unwrap().path(),
            "metadata://gce/instance/attributes"
        );
    }

    #[test]
    fn unconfigured_or_unknown_schemes_are_rejected() {
        let ctx = context();
        assert!(ctx.build_vfs_path("azureblob://c/k").is_err());
        assert!(ctx.build_vfs_path("oss://b/k").is_err());
        assert!(ctx.build_vfs_path("vault://v/kv/k").is_err());
        assert!(ctx.build_vfs_path("ftp://host/x").is_err());
    }

    #[test]
    fn config_reads_environment() {
        let env = StaticEnv::new([("S3_REGION", "eu-west-3"), ("VAULT_TOKEN", "t")]);
        let config = VfsConfig::from_env(&env);
        assert_eq!(config.s3_region.as_deref(), Some("eu-west-3"));
        assert_eq!(config.vault_token.as_deref(), Some("t"));
        assert_eq!(config.s3_endpoint, None);
    }

    #[tokio::test]
    async fn https_s3_urls_read_through_s3_backend() {
        let ctx = context();
        ctx.build_vfs_path("s3://bucket/assets/file")
            .unwrap()
            .write_file(b"data", None)
            .await
            .unwrap();
        let data = ctx
            .read_file("https://s3.amazonaws.com/bucket/assets/file", ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(data, b"data");
    }

    #[tokio::test]
    async fn read_with_backoff_stops_on_not_exist() {
        let ctx = context();
        let err = ctx
            .read_file(
                "memfs://tests/missing",
                ReadOptions {
                    backoff: Some(Backoff::object_store_read()),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_exist());
    }
}
