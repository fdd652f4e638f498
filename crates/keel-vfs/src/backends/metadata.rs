//! Read-only cloud instance metadata (`metadata://gce/...`, `metadata://aws/...`)

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use super::http::fetch;
use crate::acl::Acl;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, join_key};

/// URL scheme of metadata paths
pub const METADATA_SCHEME: &str = "metadata://";

/// GCE metadata server
pub const GCE_METADATA_ENDPOINT: &str = "http://metadata.google.internal";

/// EC2 instance metadata service
pub const AWS_METADATA_ENDPOINT: &str = "http://169.254.169.254";

const AWS_TOKEN_TTL_SECONDS: &str = "21600";

/// Metadata provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataProvider {
    /// Google Compute Engine
    Gce,
    /// Amazon EC2 (IMDSv2)
    Aws,
}

impl MetadataProvider {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Gce => "gce",
            Self::Aws => "aws",
        }
    }

    /// Provider named by the URL host
    pub fn from_host(host: &str) -> Result<Self> {
        match host {
            "gce" => Ok(Self::Gce),
            "aws" => Ok(Self::Aws),
            other => Err(Error::invalid_input(format!(
                "unknown metadata provider {other:?}"
            ))),
        }
    }
}

/// A key in the instance metadata tree
#[derive(Clone)]
pub struct MetadataPath {
    http: reqwest::Client,
    provider: MetadataProvider,
    endpoint: String,
    key: String,
}

impl fmt::Debug for MetadataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetadataPath({})", self.path())
    }
}

impl MetadataPath {
    /// Key under `provider`'s metadata tree served at `endpoint`
    pub fn new(
        http: reqwest::Client,
        provider: MetadataProvider,
        endpoint: impl Into<String>,
        key: &str,
    ) -> Self {
        Self {
            http,
            provider,
            endpoint: endpoint.into(),
            key: join_key(key, &[]),
        }
    }

    /// Key using the provider's well-known endpoint
    pub fn with_default_endpoint(http: reqwest::Client, provider: MetadataProvider, key: &str) -> Self {
        let endpoint = match provider {
            MetadataProvider::Gce => GCE_METADATA_ENDPOINT,
            MetadataProvider::Aws => AWS_METADATA_ENDPOINT,
        };
        Self::new(http, provider, endpoint, key)
    }

    fn unsupported(&self, op: &str) -> Error {
        Error::invalid_input(format!("{op} is not supported for {}", self.path()))
    }

    async fn aws_token(&self) -> Result<String> {
        let url = format!("{}/latest/api/token", self.endpoint);
        let request = self
            .http
            .put(&url)
            .header("X-aws-ec2-metadata-token-ttl-seconds", AWS_TOKEN_TTL_SECONDS);
        let token = fetch(request, &url).await?;
        String::from_utf8(token).map_err(|e| Error::fatal("metadata", format!("token is not utf-8: {e}")))
    }

    async fn read_once(&self) -> Result<Vec<u8>> {
        match self.provider {
            MetadataProvider::Gce => {
                let url = format!("{}/computeMetadata/v1/{}", self.endpoint, self.key);
                fetch(self.http.get(&url).header("Metadata-Flavor", "Google"), &url).await
            }
            MetadataProvider::Aws => {
                let token = self.aws_token().await?;
                let url = format!("{}/latest/{}", self.endpoint, self.key);
                fetch(
                    self.http.get(&url).header("X-aws-ec2-metadata-token", token),
                    &url,
                )
                .await
            }
        }
    }
}

#[async_trait]
impl Path for MetadataPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(MetadataPath {
            key: join_key(&self.key, parts),
            ..self.clone()
        })
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        Backoff::object_store_read()
            .retry("metadata read", || async { self.read_once().await.map(Some) })
            .await
    }

    async fn write_file(&self, _data: &[u8], _acl: Option<&Acl>) -> Result<()> {
        Err(self.unsupported("write"))
    }

    async fn create_file(&self, _data: &[u8], _acl: Option<&Acl>) -> Result<()> {
        Err(self.unsupported("create"))
    }

    async fn remove(&self) -> Result<()> {
        Err(self.unsupported("remove"))
    }

    async fn read_dir(&self) -> Result<Vec<VfsPath>> {
        Err(self.unsupported("read_dir"))
    }

    async fn read_tree(&self) -> Result<Vec<VfsPath>> {
        Err(self.unsupported("read_tree"))
    }

    fn base(&self) -> String {
        base_name(&self.key)
    }

    fn path(&self) -> String {
        format!("{METADATA_SCHEME}{}/{}", self.provider.as_str(), self.key)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
