//! Scaleway instance metadata service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use keel_common::{Error, Result};

#[cfg(test)]
use mockall::automock;

/// Metadata endpoint reachable from every Scaleway server
pub const METADATA_ENDPOINT: &str = "http://169.254.42.42";

/// What a server knows about itself
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct InstanceMetadata {
    /// Server ID
    pub id: String,
    /// Server name
    #[serde(default)]
    pub name: String,
    /// Placement
    #[serde(default)]
    pub location: Location,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Private IPv4 address
    #[serde(default)]
    pub private_ip: Option<String>,
}

/// Placement of a server
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// Zone (`fr-par-1`)
    #[serde(default)]
    pub zone_id: String,
}

impl InstanceMetadata {
    /// Zone the server runs in
    pub fn zone(&self) -> &str {
        &self.location.zone_id
    }
}

/// Source of the local server's metadata
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScwMetadata: Send + Sync {
    /// Metadata of the server this process runs on
    async fn instance(&self) -> Result<InstanceMetadata>;
}

/// [`ScwMetadata`] read over HTTP
#[derive(Clone, Debug)]
pub struct HttpScwMetadata {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScwMetadata {
    /// Client for the standard endpoint
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::fatal("scaleway metadata", format!("building http client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Client using `client`
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: METADATA_ENDPOINT.to_string(),
        }
    }

    /// Read from `endpoint` instead of the standard one
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self) -> String {
        format!("{}/conf?format=json", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ScwMetadata for HttpScwMetadata {
    async fn instance(&self) -> Result<InstanceMetadata> {
        let url = self.url();
        debug!(url = %url, "reading instance metadata");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::transient("scaleway metadata", format!("GET {url}: {e}")))?;
        match response.status() {
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                return Err(Error::transient("scaleway metadata", format!("GET {url}: {s}")));
            }
            s if !s.is_success() => {
                return Err(Error::fatal("scaleway metadata", format!("GET {url}: unexpected status {s}")));
            }
            _ => {}
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transient("scaleway metadata", format!("reading body of {url}: {e}")))?;
        serde_json::from_slice(&body).map_err(|e| Error::serialization_for("scaleway metadata", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CONF: &str = r#"{
        "id": "11111111-2222-3333-4444-555555555555",
        "name": "control-plane-fr-par-1-0",
        "commercial_type": "DEV1-M",
        "location": {"zone_id": "fr-par-1", "platform_id": "14"},
        "tags": ["kops.k8s.io/cluster=demo.example.com"],
        "private_ip": "10.0.0.4"
    }"#;

    /// Serve one canned HTTP response and return the request line
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request.lines().next().unwrap_or_default().to_string()
        });
        (endpoint, handle)
    }

    #[tokio::test]
    async fn reads_the_json_configuration() {
        let (endpoint, server) = serve_once("200 OK", CONF).await;
        let metadata = HttpScwMetadata::with_client(reqwest::Client::new()).with_endpoint(endpoint);

        let instance = metadata.instance().await.unwrap();
        assert_eq!(instance.id, "11111111-2222-3333-4444-555555555555");
        assert_eq!(instance.zone(), "fr-par-1");
        assert_eq!(instance.private_ip.as_deref(), Some("10.0.0.4"));
        assert_eq!(server.await.unwrap(), "GET /conf?format=json HTTP/1.1");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let (endpoint, _server) = serve_once("503 Service Unavailable", "").await;
        let metadata = HttpScwMetadata::with_client(reqwest::Client::new()).with_endpoint(endpoint);
        let err = metadata.instance().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn missing_location_means_no_zone() {
        let instance: InstanceMetadata = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(instance.zone(), "");
    }
}
