//! S3 and S3-compatible object stores
//!
//! The wire client sits behind [`S3Api`]; [`S3Context`] owns one client per
//! region and caches per-bucket details (region, default encryption). Both
//! caches are guarded by a single async lock so region discovery for a
//! bucket happens once.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use keel_common::hashing::{Hash, HashAlgorithm};
use keel_common::retry::Backoff;
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::client::ClientError;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, dir_prefix, join_key};

/// URL scheme of S3 paths
pub const S3_SCHEME: &str = "s3://";

/// Region assumed when a bucket reports no location
pub const DEFAULT_REGION: &str = "us-east-1";

/// Server-side encryption requested when a bucket has default encryption
pub const DEFAULT_SSE: &str = "AES256";

static CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Object written by [`S3Api::put_object`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PutObjectRequest {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Contents
    pub body: Vec<u8>,
    /// Canned ACL
    pub acl: Option<String>,
    /// Server-side encryption algorithm
    pub server_side_encryption: Option<String>,
}

/// Object summary from a listing or head request
#[derive(Clone, Debug, Default, PartialEq)]
pub struct S3Object {
    /// Object key
    pub key: String,
    /// Quoted ETag as returned by the service
    pub etag: Option<String>,
    /// Size in bytes
    pub size: u64,
}

/// One page of a list request
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListObjectsPage {
    /// Objects in this page
    pub objects: Vec<S3Object>,
    /// Common prefixes (directories) when a delimiter was given
    pub common_prefixes: Vec<String>,
    /// Token for the next page
    pub next_continuation_token: Option<String>,
}

/// One stored version or delete marker
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectVersion {
    /// Object key
    pub key: String,
    /// Version id
    pub version_id: String,
}

/// One page of a version listing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListVersionsPage {
    /// Versions and delete markers in this page
    pub versions: Vec<ObjectVersion>,
    /// Key marker for the next page
    pub next_key_marker: Option<String>,
    /// Version marker for the next page
    pub next_version_id_marker: Option<String>,
    /// True if more pages follow
    pub is_truncated: bool,
}

/// The subset of the S3 API used by the backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait S3Api: Send + Sync {
    /// Fetch object contents
    async fn get_object(&self, bucket: &str, key: &str) -> std::result::Result<Vec<u8>, ClientError>;

    /// Fetch object metadata
    async fn head_object(&self, bucket: &str, key: &str)
        -> std::result::Result<S3Object, ClientError>;

    /// Store an object
    async fn put_object(&self, request: PutObjectRequest) -> std::result::Result<(), ClientError>;

    /// Delete an object, or one version of it
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<String>,
    ) -> std::result::Result<(), ClientError>;

    /// List objects under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<String>,
        continuation_token: Option<String>,
    ) -> std::result::Result<ListObjectsPage, ClientError>;

    /// List object versions and delete markers under `prefix`
    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: Option<String>,
        version_id_marker: Option<String>,
    ) -> std::result::Result<ListVersionsPage, ClientError>;

    /// Bucket location constraint; None or empty for the legacy default region
    async fn get_bucket_location(&self, bucket: &str)
        -> std::result::Result<Option<String>, ClientError>;

    /// Default encryption algorithm configured on the bucket, if any
    async fn get_bucket_encryption(
        &self,
        bucket: &str,
    ) -> std::result::Result<Option<String>, ClientError>;
}

/// Builds region-scoped clients
pub trait S3ClientFactory: Send + Sync {
    /// Client for `region`, talking to `endpoint` when set
    fn client(&self, region: &str, endpoint: Option<&str>) -> Result<Arc<dyn S3Api>>;
}

/// Overrides read from the environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct S3Config {
    /// `S3_REGION`: skip bucket location discovery
    pub region: Option<String>,
    /// `S3_ENDPOINT`: S3-compatible endpoint
    pub endpoint: Option<String>,
}

/// Cached facts about a bucket
#[derive(Clone, Debug, PartialEq)]
pub struct S3BucketDetails {
    /// Bucket name
    pub name: String,
    /// Region hosting the bucket
    pub region: String,
    /// Encryption to request on writes
    pub server_side_encryption: Option<String>,
}

#[derive(Default)]
struct S3State {
    clients: HashMap<String, Arc<dyn S3Api>>,
    buckets: HashMap<String, Arc<S3BucketDetails>>,
}

/// Region-aware client pool and bucket cache
pub struct S3Context {
    factory: Arc<dyn S3ClientFactory>,
    config: S3Config,
    state: Mutex<S3State>,
}

impl fmt::Debug for S3Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Map a bucket location constraint to a region
pub fn normalize_region(location: Option<&str>) -> String {
    match location {
        None | Some("") => DEFAULT_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(other) => other.to_string(),
    }
}

impl S3Context {
    /// New context over `factory`
    pub fn new(factory: Arc<dyn S3ClientFactory>, config: S3Config) -> Self {
        Self {
            factory,
            config,
            state: Mutex::new(S3State::default()),
        }
    }

    /// Configured overrides
    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn client_locked(&self, state: &mut S3State, region: &str) -> Result<Arc<dyn S3Api>> {
        if let Some(client) = state.clients.get(region) {
            return Ok(client.clone());
        }
        let client = self
            .factory
            .client(region, self.config.endpoint.as_deref())?;
        state.clients.insert(region.to_string(), client.clone());
        Ok(client)
    }

    /// Client for `region`
    pub async fn get_client(&self, region: &str) -> Result<Arc<dyn S3Api>> {
        let mut state = self.state.lock().await;
        self.client_locked(&mut state, region)
    }

    /// Region and encryption settings of `bucket`, discovered once
    pub async fn get_bucket_details(&self, bucket: &str) -> Result<Arc<S3BucketDetails>> {
        let mut state = self.state.lock().await;
        if let Some(details) = state.buckets.get(bucket) {
            return Ok(details.clone());
        }

        let region = match (&self.config.region, &self.config.endpoint) {
            (Some(region), _) => region.clone(),
            (None, Some(_)) => DEFAULT_REGION.to_string(),
            (None, None) => {
                let lookup = self.client_locked(&mut state, DEFAULT_REGION)?;
                let location = lookup
                    .get_bucket_location(bucket)
                    .await
                    .map_err(|e| e.into_error("s3", &format!("{S3_SCHEME}{bucket}")))?;
                normalize_region(location.as_deref())
            }
        };
        debug!(bucket = %bucket, region = %region, "discovered bucket region");

        let client = self.client_locked(&mut state, &region)?;
        let server_side_encryption = match client.get_bucket_encryption(bucket).await {
            Ok(Some(_)) => Some(DEFAULT_SSE.to_string()),
            Ok(None) => None,
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "unable to read bucket encryption; writing without SSE");
                None
            }
        };

        let details = Arc::new(S3BucketDetails {
            name: bucket.to_string(),
            region,
            server_side_encryption,
        });
        state.buckets.insert(bucket.to_string(), details.clone());
        Ok(details)
    }

    /// Path for `bucket`/`key`
    pub fn path(self: &Arc<Self>, bucket: &str, key: &str) -> S3Path {
        S3Path {
            context: self.clone(),
            bucket: bucket.to_string(),
            key: join_key(key, &[]),
            etag: None,
        }
    }
}

/// Virtual-hosted or path-style HTTPS URL of an object
///
/// Buckets containing dots are rendered path-style so the TLS certificate
/// still matches.
pub fn render_https_url(bucket: &str, region: &str, key: &str, dualstack: bool) -> String {
    let dualstack = if dualstack { "dualstack." } else { "" };
    let suffix = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    if bucket.contains('.') {
        format!("https://s3.{dualstack}{region}.{suffix}/{bucket}/{key}")
    } else {
        format!("https://{bucket}.s3.{dualstack}{region}.{suffix}/{key}")
    }
}

/// Parse an AWS S3 HTTPS URL into its canonical `s3://bucket/key` form
///
/// Accepts path-style (`s3.amazonaws.com/bucket`,
/// `s3.<region>.amazonaws.com/bucket`, `s3-<region>.amazonaws.com/bucket`)
/// and virtual-hosted (`bucket.s3.<region>.amazonaws.com`) hosts, with or
/// without the `https://` prefix.
pub fn parse_aws_s3_url(raw: &str) -> Result<String> {
    let (bucket, key) = split_aws_s3_url(raw)?;
    if key.is_empty() {
        Ok(format!("{S3_SCHEME}{bucket}"))
    } else {
        Ok(format!("{S3_SCHEME}{bucket}/{key}"))
    }
}

/// Bucket and key of an AWS S3 HTTPS URL
pub fn split_aws_s3_url(raw: &str) -> Result<(String, String)> {
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    let host = host.to_ascii_lowercase();
    let invalid = || Error::invalid_input(format!("unable to parse {raw:?} as an S3 URL"));

    let domain = host
        .strip_suffix(".amazonaws.com")
        .or_else(|| host.strip_suffix(".amazonaws.com.cn"))
        .ok_or_else(invalid)?;

    let is_s3_endpoint = |label: &str| {
        label == "s3"
            || label.starts_with("s3.")
            || label.starts_with("s3-")
            || label == "s3-external-1"
    };

    if is_s3_endpoint(domain) {
        let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
        if bucket.is_empty() {
            return Err(invalid());
        }
        return Ok((bucket.to_string(), join_key(key, &[])));
    }

    match domain.split_once(".s3") {
        Some((bucket, region_part))
            if !bucket.is_empty() && (region_part.is_empty() || region_part.starts_with('.') || region_part.starts_with('-')) =>
        {
            Ok((bucket.to_string(), join_key(path, &[])))
        }
        _ => Err(invalid()),
    }
}

fn parse_etag(etag: Option<&str>) -> Option<Hash> {
    let etag = etag?.trim_matches('"');
    // Multipart uploads carry "<md5-of-md5s>-<parts>", which is not a content hash
    if etag.contains('-') {
        return None;
    }
    HashAlgorithm::Md5.parse_hex(etag).ok()
}

/// An object (or prefix) in an S3 bucket
#[derive(Clone)]
pub struct S3Path {
    context: Arc<S3Context>,
    bucket: String,
    key: String,
    etag: Option<Hash>,
}

impl fmt::Debug for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S3Path({})", self.path())
    }
}

impl S3Path {
    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Region hosting the bucket
    pub async fn region(&self) -> Result<String> {
        Ok(self.context.get_bucket_details(&self.bucket).await?.region.clone())
    }

    /// HTTPS URL of this object
    pub async fn get_https_url(&self, dualstack: bool) -> Result<String> {
        let details = self.context.get_bucket_details(&self.bucket).await?;
        Ok(render_https_url(&self.bucket, &details.region, &self.key, dualstack))
    }

    fn sibling(&self, key: String, etag: Option<Hash>) -> S3Path {
        S3Path {
            context: self.context.clone(),
            bucket: self.bucket.clone(),
            key,
            etag,
        }
    }

    async fn client(&self) -> Result<Arc<dyn S3Api>> {
        let details = self.context.get_bucket_details(&self.bucket).await?;
        self.context.get_client(&details.region).await
    }

    fn translate(&self, e: ClientError) -> Error {
        e.into_error("s3", &self.path())
    }

    async fn list(&self, delimiter: Option<&str>) -> Result<Vec<VfsPath>> {
        let client = self.client().await?;
        let prefix = dir_prefix(&self.key);
        let mut out: Vec<VfsPath> = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = Backoff::object_store_read()
                .retry("s3 list", || {
                    let client = client.clone();
                    let prefix = prefix.clone();
                    let token = token.clone();
                    async move {
                        client
                            .list_objects(&self.bucket, &prefix, delimiter.map(str::to_string), token)
                            .await
                            .map(Some)
                            .map_err(|e| self.translate(e))
                    }
                })
                .await?;
            for object in page.objects {
                if object.key == prefix || object.key.ends_with('/') {
                    continue;
                }
                let etag = parse_etag(object.etag.as_deref());
                out.push(Arc::new(self.sibling(object.key, etag)));
            }
            for common in page.common_prefixes {
                out.push(Arc::new(self.sibling(join_key(&common, &[]), None)));
            }
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(path = %self.path(), count = out.len(), "listed s3 prefix");
        Ok(out)
    }
}

#[async_trait]
impl Path for S3Path {
    fn join(&self, parts: &[&str]) -> VfsPath {
        Arc::new(self.sibling(join_key(&self.key, parts), None))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        let client = self.client().await?;
        Backoff::object_store_read()
            .retry("s3 read", || {
                let client = client.clone();
                async move {
                    client
                        .get_object(&self.bucket, &self.key)
                        .await
                        .map(Some)
                        .map_err(|e| self.translate(e))
                }
            })
            .await
    }

    async fn write_file(&self, data: &[u8], acl: Option<&Acl>) -> Result<()> {
        let canned = match acl {
            None => None,
            Some(Acl::S3(s3)) => Some(s3.canned.clone()),
            Some(other) => {
                return Err(Error::invalid_input(format!(
                    "unexpected acl {other:?} for {}",
                    self.path()
                )))
            }
        };
        let details = self.context.get_bucket_details(&self.bucket).await?;
        let client = self.context.get_client(&details.region).await?;
        debug!(path = %self.path(), acl = ?canned, "writing s3 object");
        Backoff::object_store_write()
            .retry("s3 write", || {
                let client = client.clone();
                let request = PutObjectRequest {
                    bucket: self.bucket.clone(),
                    key: self.key.clone(),
                    body: data.to_vec(),
                    acl: canned.clone(),
                    server_side_encryption: details.server_side_encryption.clone(),
                };
                async move {
                    client
                        .put_object(request)
                        .await
                        .map(Some)
                        .map_err(|e| self.translate(e))
                }
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
        let client = self.client().await?;
        client
            .delete_object(&self.bucket, &self.key, None)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn remove_all_versions(&self) -> Result<()> {
        let client = self.client().await?;
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        loop {
            let page = client
                .list_object_versions(&self.bucket, &self.key, key_marker, version_marker)
                .await
                .map_err(|e| self.translate(e))?;
            versions.extend(page.versions.into_iter().filter(|v| v.key == self.key));
            if !page.is_truncated {
                break;
            }
            key_marker = page.next_key_marker;
            version_marker = page.next_version_id_marker;
        }
        if versions.is_empty() {
            return Err(Error::not_exist(self.path()));
        }
        debug!(path = %self.path(), versions = versions.len(), "deleting all object versions");
        for version in versions {
            client
                .delete_object(&self.bucket, &self.key, Some(version.version_id))
                .await
                .map_err(|e| self.translate(e))?;
        }
        Ok(())
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
        if self.key.is_empty() {
            format!("{S3_SCHEME}{}", self.bucket)
        } else {
            format!("{S3_SCHEME}{}/{}", self.bucket, self.key)
        }
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
        let client = self.client().await?;
        let head = client
            .head_object(&self.bucket, &self.key)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(parse_etag(head.etag.as_deref()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
