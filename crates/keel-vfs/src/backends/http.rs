//! Read-only HTTP(S) backend

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::path::{Path, VfsPath};
use crate::util::base_name;

/// A resource served over HTTP
#[derive(Clone)]
pub struct HttpPath {
    http: reqwest::Client,
    url: String,
}

impl fmt::Debug for HttpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HttpPath({})", self.url)
    }
}

impl HttpPath {
    /// Resource at `url`
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    fn unsupported(&self, op: &str) -> Error {
        Error::invalid_input(format!("{op} is not supported for {}", self.url))
    }
}

/// GET `url`, mapping 404 to not-exist and 5xx to a retryable error
pub(crate) async fn fetch(request: reqwest::RequestBuilder, url: &str) -> Result<Vec<u8>> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::transient("http", format!("GET {url}: {e}")))?;
    match response.status() {
        StatusCode::NOT_FOUND => Err(Error::not_exist(url)),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Err(Error::transient("http", format!("GET {url}: {s}")))
        }
        s if !s.is_success() => Err(Error::fatal("http", format!("GET {url}: unexpected status {s}"))),
        _ => response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::transient("http", format!("reading body of {url}: {e}"))),
    }
}

#[async_trait]
impl Path for HttpPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        let mut url = self.url.trim_end_matches('/').to_string();
        for part in parts.iter().filter(|p| !p.is_empty() && **p != ".") {
            url.push('/');
            url.push_str(part.trim_matches('/'));
        }
        Arc::new(HttpPath::new(self.http.clone(), url))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        Backoff::object_store_read()
            .retry("http read", || async {
                fetch(self.http.get(&self.url), &self.url)
                    .await
                    .map(Some)
            })
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
        base_name(&self.url)
    }

    fn path(&self) -> String {
        self.url.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_and_writes_are_rejected() {
        let p = HttpPath::new(reqwest::Client::new(), "https://dl.k8s.io/release/");
        let child = p.join(&["v1.26.0", "bin"]);
        assert_eq!(child.path(), "https://dl.k8s.io/release/v1.26.0/bin");
        assert_eq!(child.base(), "bin");
        let err = child.write_file(b"x", None).await.unwrap_err();
        assert_eq!(err.kind(), keel_common::ErrorKind::InvalidInput);
    }
}
