//! In-memory clients for every remote backend
//!
//! Used by this crate's tests and by downstream crates that exercise code
//! paths against object stores without network access.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;

use keel_common::hashing::{hash_bytes, HashAlgorithm};
use keel_common::{Error, Result};

use crate::backends::azure::{AzureBlob, AzureBlobApi, AzureClientFactory, AzureListPage};
use crate::backends::gcs::{GcsApi, GcsListPage, GcsObject};
use crate::backends::k8s::KubeObjectStore;
use crate::backends::oss::{OssApi, OssClientFactory, OssListPage, OssObject};
use crate::backends::s3::{
    ListObjectsPage, ListVersionsPage, ObjectVersion, PutObjectRequest, S3Api, S3ClientFactory,
    S3Object,
};
use crate::backends::sftp::{SftpEntry, SftpSession, SshConnector};
use crate::backends::swift::{SwiftApi, SwiftListPage, SwiftObject};
use crate::backends::vault::VaultApi;
use crate::client::ClientError;
use crate::util::{dir_prefix, parent_key};

type ClientResult<T> = std::result::Result<T, ClientError>;

fn md5_hex(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Md5, data).hex()
}

fn md5_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(hash_bytes(HashAlgorithm::Md5, data).as_bytes())
}

/// Split `keys` under `prefix` into objects and delimiter-grouped prefixes
fn group_keys<'a>(
    keys: impl Iterator<Item = &'a String>,
    prefix: &str,
    delimiter: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let mut objects = Vec::new();
    let mut prefixes = BTreeSet::new();
    for key in keys.filter(|k| k.starts_with(prefix)) {
        let rest = &key[prefix.len()..];
        match delimiter.and_then(|d| rest.find(d).map(|i| (i, d.len()))) {
            Some((i, len)) => {
                prefixes.insert(format!("{prefix}{}", &rest[..i + len]));
            }
            None => objects.push(key.clone()),
        }
    }
    (objects, prefixes.into_iter().collect())
}

// =============================================================================
// S3
// =============================================================================

#[derive(Clone, Debug)]
struct FakeVersion {
    id: String,
    data: Option<Vec<u8>>,
}

#[derive(Default)]
struct FakeS3State {
    objects: BTreeMap<(String, String), Vec<FakeVersion>>,
    locations: HashMap<String, Option<String>>,
    encryption: HashMap<String, Option<String>>,
    location_calls: usize,
    head_calls: usize,
    puts: Vec<PutObjectRequest>,
    next_version: u64,
}

/// Versioned in-memory S3
#[derive(Default)]
pub struct FakeS3 {
    state: Mutex<FakeS3State>,
}

impl FakeS3 {
    /// Set the location constraint reported for `bucket`
    pub fn set_bucket_location(&self, bucket: &str, location: Option<&str>) {
        self.state
            .lock()
            .locations
            .insert(bucket.to_string(), location.map(str::to_string));
    }

    /// Set the default encryption reported for `bucket`
    pub fn set_bucket_encryption(&self, bucket: &str, algorithm: Option<&str>) {
        self.state
            .lock()
            .encryption
            .insert(bucket.to_string(), algorithm.map(str::to_string));
    }

    /// Number of location lookups served
    pub fn location_calls(&self) -> usize {
        self.state.lock().location_calls
    }

    /// Number of head requests served
    pub fn head_calls(&self) -> usize {
        self.state.lock().head_calls
    }

    /// Most recent put request
    pub fn last_put(&self) -> Option<PutObjectRequest> {
        self.state.lock().puts.last().cloned()
    }

    /// Versions and delete markers stored for a key
    pub fn version_count(&self, bucket: &str, key: &str) -> usize {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn latest(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|v| v.last())
            .and_then(|v| v.data.clone())
    }
}

#[async_trait]
impl S3Api for FakeS3 {
    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<Vec<u8>> {
        self.latest(bucket, key)
            .ok_or_else(|| ClientError::not_found("NoSuchKey"))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<S3Object> {
        self.state.lock().head_calls += 1;
        let data = self
            .latest(bucket, key)
            .ok_or_else(|| ClientError::not_found("NotFound"))?;
        Ok(S3Object {
            key: key.to_string(),
            etag: Some(format!("\"{}\"", md5_hex(&data))),
            size: data.len() as u64,
        })
    }

    async fn put_object(&self, request: PutObjectRequest) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.next_version += 1;
        let id = format!("v{}", state.next_version);
        state
            .objects
            .entry((request.bucket.clone(), request.key.clone()))
            .or_default()
            .push(FakeVersion {
                id,
                data: Some(request.body.clone()),
            });
        state.puts.push(request);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str, version_id: Option<String>) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.next_version += 1;
        let marker = format!("v{}", state.next_version);
        let versions = state
            .objects
            .entry((bucket.to_string(), key.to_string()))
            .or_default();
        match version_id {
            None => versions.push(FakeVersion {
                id: marker,
                data: None,
            }),
            Some(id) => {
                let before = versions.len();
                versions.retain(|v| v.id != id);
                if versions.len() == before {
                    return Err(ClientError::not_found("NoSuchVersion"));
                }
            }
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<String>,
        _continuation_token: Option<String>,
    ) -> ClientResult<ListObjectsPage> {
        let state = self.state.lock();
        let live: BTreeMap<&String, &Vec<u8>> = state
            .objects
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .filter_map(|((_, k), versions)| versions.last()?.data.as_ref().map(|d| (k, d)))
            .collect();
        let (objects, common_prefixes) = group_keys(live.keys().copied(), prefix, delimiter.as_deref());
        Ok(ListObjectsPage {
            objects: objects
                .into_iter()
                .map(|key| {
                    let data = live[&key];
                    S3Object {
                        etag: Some(format!("\"{}\"", md5_hex(data))),
                        size: data.len() as u64,
                        key,
                    }
                })
                .collect(),
            common_prefixes,
            next_continuation_token: None,
        })
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        _key_marker: Option<String>,
        _version_id_marker: Option<String>,
    ) -> ClientResult<ListVersionsPage> {
        let state = self.state.lock();
        let versions = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .flat_map(|((_, k), versions)| {
                versions.iter().map(move |v| ObjectVersion {
                    key: k.clone(),
                    version_id: v.id.clone(),
                })
            })
            .collect();
        Ok(ListVersionsPage {
            versions,
            ..Default::default()
        })
    }

    async fn get_bucket_location(&self, bucket: &str) -> ClientResult<Option<String>> {
        let mut state = self.state.lock();
        state.location_calls += 1;
        Ok(state.locations.get(bucket).cloned().flatten())
    }

    async fn get_bucket_encryption(&self, bucket: &str) -> ClientResult<Option<String>> {
        Ok(self.state.lock().encryption.get(bucket).cloned().flatten())
    }
}

/// Hands out one client for every region
pub struct FakeS3Factory {
    client: Arc<dyn S3Api>,
}

impl FakeS3Factory {
    /// Factory serving `fake`
    pub fn new(fake: Arc<FakeS3>) -> Self {
        Self { client: fake }
    }

    /// Factory serving any client
    pub fn from_client(client: Arc<dyn S3Api>) -> Self {
        Self { client }
    }
}

impl S3ClientFactory for FakeS3Factory {
    fn client(&self, _region: &str, _endpoint: Option<&str>) -> Result<Arc<dyn S3Api>> {
        Ok(self.client.clone())
    }
}

// =============================================================================
// GCS / Azure / Swift / OSS
// =============================================================================

#[derive(Clone, Debug)]
struct StoredObject {
    data: Vec<u8>,
    acl: Option<String>,
}

#[derive(Default)]
struct ObjectStoreState {
    objects: BTreeMap<(String, String), StoredObject>,
    containers: BTreeSet<String>,
    require_containers: bool,
    snapshots_removed: BTreeSet<(String, String)>,
}

/// Flat in-memory object store speaking the GCS, Azure, Swift and OSS traits
#[derive(Default)]
pub struct FakeObjectStore {
    state: Mutex<ObjectStoreState>,
}

impl FakeObjectStore {
    /// Make uploads fail with not-found until the container is created
    pub fn require_containers(&self) {
        self.state.lock().require_containers = true;
    }

    /// True once `container` has been created
    pub fn has_container(&self, container: &str) -> bool {
        self.state.lock().containers.contains(container)
    }

    /// ACL the object was written with
    pub fn acl_of(&self, bucket: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|o| o.acl.clone())
    }

    /// True if the object was deleted together with its snapshots
    pub fn snapshots_removed(&self, container: &str, key: &str) -> bool {
        self.state
            .lock()
            .snapshots_removed
            .contains(&(container.to_string(), key.to_string()))
    }

    fn get(&self, bucket: &str, key: &str) -> ClientResult<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
            .ok_or_else(|| ClientError::not_found("NotFound"))
    }

    fn put(&self, bucket: &str, key: &str, data: Vec<u8>, acl: Option<String>) -> ClientResult<()> {
        let mut state = self.state.lock();
        if state.require_containers && !state.containers.contains(bucket) {
            return Err(ClientError::not_found("ContainerNotFound"));
        }
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { data, acl });
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> ClientResult<()> {
        self.state
            .lock()
            .objects
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClientError::not_found("NotFound"))
    }

    fn list(&self, bucket: &str, prefix: &str, delimiter: Option<&str>) -> (Vec<(String, Vec<u8>)>, Vec<String>) {
        let state = self.state.lock();
        let keys: Vec<&String> = state
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k)
            .collect();
        let (objects, prefixes) = group_keys(keys.into_iter(), prefix, delimiter);
        let objects = objects
            .into_iter()
            .map(|k| {
                let data = state.objects[&(bucket.to_string(), k.clone())].data.clone();
                (k, data)
            })
            .collect();
        (objects, prefixes)
    }
}

#[async_trait]
impl GcsApi for FakeObjectStore {
    async fn get_object(&self, bucket: &str, name: &str) -> ClientResult<Vec<u8>> {
        self.get(bucket, name)
    }

    async fn get_metadata(&self, bucket: &str, name: &str) -> ClientResult<GcsObject> {
        let data = self.get(bucket, name)?;
        Ok(GcsObject {
            name: name.to_string(),
            md5_hash: Some(md5_base64(&data)),
        })
    }

    async fn insert_object(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
        predefined_acl: Option<String>,
    ) -> ClientResult<()> {
        self.put(bucket, name, data, predefined_acl)
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> ClientResult<()> {
        self.delete(bucket, name)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<String>,
        _page_token: Option<String>,
    ) -> ClientResult<GcsListPage> {
        let (objects, prefixes) = self.list(bucket, prefix, delimiter.as_deref());
        Ok(GcsListPage {
            objects: objects
                .into_iter()
                .map(|(name, data)| GcsObject {
                    name,
                    md5_hash: Some(md5_base64(&data)),
                })
                .collect(),
            prefixes,
            next_page_token: None,
        })
    }
}

#[async_trait]
impl AzureBlobApi for FakeObjectStore {
    async fn download(&self, container: &str, name: &str) -> ClientResult<Vec<u8>> {
        self.get(container, name)
    }

    async fn get_properties(&self, container: &str, name: &str) -> ClientResult<AzureBlob> {
        let data = self.get(container, name)?;
        Ok(AzureBlob {
            name: name.to_string(),
            content_md5: Some(md5_base64(&data)),
        })
    }

    async fn upload(&self, container: &str, name: &str, data: Vec<u8>) -> ClientResult<()> {
        self.put(container, name, data, None)
    }

    async fn delete(&self, container: &str, name: &str, include_snapshots: bool) -> ClientResult<()> {
        FakeObjectStore::delete(self, container, name)?;
        if include_snapshots {
            self.state
                .lock()
                .snapshots_removed
                .insert((container.to_string(), name.to_string()));
        }
        Ok(())
    }

    async fn list(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<String>,
        _marker: Option<String>,
    ) -> ClientResult<AzureListPage> {
        let (objects, prefixes) = FakeObjectStore::list(self, container, prefix, delimiter.as_deref());
        Ok(AzureListPage {
            blobs: objects
                .into_iter()
                .map(|(name, data)| AzureBlob {
                    name,
                    content_md5: Some(md5_base64(&data)),
                })
                .collect(),
            prefixes,
            next_marker: None,
        })
    }
}

#[async_trait]
impl SwiftApi for FakeObjectStore {
    async fn get_object(&self, container: &str, name: &str) -> ClientResult<Vec<u8>> {
        self.get(container, name)
    }

    async fn head_object(&self, container: &str, name: &str) -> ClientResult<SwiftObject> {
        let data = self.get(container, name)?;
        Ok(SwiftObject {
            name: name.to_string(),
            hash: Some(md5_hex(&data)),
        })
    }

    async fn put_object(&self, container: &str, name: &str, data: Vec<u8>) -> ClientResult<()> {
        self.put(container, name, data, None)
    }

    async fn delete_object(&self, container: &str, name: &str) -> ClientResult<()> {
        self.delete(container, name)
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<String>,
        _marker: Option<String>,
    ) -> ClientResult<SwiftListPage> {
        let (objects, subdirs) = self.list(container, prefix, delimiter.as_deref());
        Ok(SwiftListPage {
            objects: objects
                .into_iter()
                .map(|(name, data)| SwiftObject {
                    name,
                    hash: Some(md5_hex(&data)),
                })
                .collect(),
            subdirs,
            next_marker: None,
        })
    }

    async fn create_container(&self, container: &str) -> ClientResult<()> {
        self.state.lock().containers.insert(container.to_string());
        Ok(())
    }
}

#[async_trait]
impl OssApi for FakeObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<Vec<u8>> {
        self.get(bucket, key)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<OssObject> {
        let data = self.get(bucket, key)?;
        Ok(OssObject {
            key: key.to_string(),
            etag: Some(format!("\"{}\"", md5_hex(&data).to_uppercase())),
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>, acl: Option<String>) -> ClientResult<()> {
        self.put(bucket, key, data, acl)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ClientResult<()> {
        self.delete(bucket, key)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<String>,
        _marker: Option<String>,
    ) -> ClientResult<OssListPage> {
        let (objects, prefixes) = self.list(bucket, prefix, delimiter.as_deref());
        Ok(OssListPage {
            objects: objects
                .into_iter()
                .map(|(key, data)| OssObject {
                    key,
                    etag: Some(format!("\"{}\"", md5_hex(&data).to_uppercase())),
                })
                .collect(),
            prefixes,
            next_marker: None,
        })
    }
}

/// Factory handing out a shared [`FakeObjectStore`]
pub struct FakeObjectStoreFactory(pub Arc<FakeObjectStore>);

impl AzureClientFactory for FakeObjectStoreFactory {
    fn client(&self, _account: &str) -> Result<Arc<dyn AzureBlobApi>> {
        Ok(self.0.clone())
    }
}

impl OssClientFactory for FakeObjectStoreFactory {
    fn client(&self, _region: &str, _key_id: &str, _secret: &str) -> Result<Arc<dyn OssApi>> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Vault
// =============================================================================

/// In-memory KV v2 mount
#[derive(Default)]
pub struct FakeVault {
    secrets: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl VaultApi for FakeVault {
    async fn read(&self, mount: &str, key: &str) -> ClientResult<Vec<u8>> {
        self.secrets
            .lock()
            .get(&(mount.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::not_found("NotFound"))
    }

    async fn write(&self, mount: &str, key: &str, data: &[u8]) -> ClientResult<()> {
        self.secrets
            .lock()
            .insert((mount.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    async fn delete(&self, mount: &str, key: &str) -> ClientResult<()> {
        self.secrets.lock().remove(&(mount.to_string(), key.to_string()));
        Ok(())
    }

    async fn destroy(&self, mount: &str, key: &str) -> ClientResult<()> {
        self.delete(mount, key).await
    }

    async fn list(&self, mount: &str, key: &str) -> ClientResult<Vec<String>> {
        let prefix = dir_prefix(key);
        let names: BTreeSet<String> = self
            .secrets
            .lock()
            .keys()
            .filter(|(m, k)| m == mount && k.starts_with(&prefix))
            .map(|(_, k)| {
                let rest = &k[prefix.len()..];
                match rest.split_once('/') {
                    Some((dir, _)) => format!("{dir}/"),
                    None => rest.to_string(),
                }
            })
            .collect();
        if names.is_empty() {
            return Err(ClientError::not_found("NotFound"));
        }
        Ok(names.into_iter().collect())
    }
}

// =============================================================================
// SFTP
// =============================================================================

#[derive(Default)]
struct SftpState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    renames: usize,
}

/// In-memory SFTP server
#[derive(Default)]
pub struct FakeSftp {
    state: Mutex<SftpState>,
}

impl FakeSftp {
    /// Number of renames performed
    pub fn renames(&self) -> usize {
        self.state.lock().renames
    }

    /// Number of files stored
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }
}

#[async_trait]
impl SftpSession for FakeSftp {
    async fn read(&self, path: &str) -> ClientResult<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ClientError::not_found("NoSuchFile"))
    }

    async fn write(&self, path: &str, data: &[u8]) -> ClientResult<()> {
        let mut state = self.state.lock();
        if !state.dirs.contains(parent_key(path)) {
            return Err(ClientError::not_found("NoSuchFile"));
        }
        state.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> ClientResult<()> {
        let mut state = self.state.lock();
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| ClientError::not_found("NoSuchFile"))?;
        state.files.insert(to.to_string(), data);
        state.renames += 1;
        Ok(())
    }

    async fn remove(&self, path: &str) -> ClientResult<()> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ClientError::not_found("NoSuchFile"))
    }

    async fn mkdir_all(&self, path: &str) -> ClientResult<()> {
        let mut state = self.state.lock();
        let mut current = path.to_string();
        while !current.is_empty() && current != "/" {
            state.dirs.insert(current.clone());
            current = parent_key(&current).to_string();
        }
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> ClientResult<Vec<SftpEntry>> {
        let state = self.state.lock();
        if !state.dirs.contains(path) {
            return Err(ClientError::not_found("NoSuchFile"));
        }
        let mut entries: Vec<SftpEntry> = state
            .dirs
            .iter()
            .filter(|d| parent_key(d) == path)
            .map(|d| SftpEntry {
                name: crate::util::base_name(d),
                is_dir: true,
            })
            .collect();
        entries.extend(state.files.keys().filter(|f| parent_key(f) == path).map(|f| SftpEntry {
            name: crate::util::base_name(f),
            is_dir: false,
        }));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> ClientResult<SftpEntry> {
        let state = self.state.lock();
        if state.files.contains_key(path) {
            Ok(SftpEntry {
                name: crate::util::base_name(path),
                is_dir: false,
            })
        } else if state.dirs.contains(path) {
            Ok(SftpEntry {
                name: crate::util::base_name(path),
                is_dir: true,
            })
        } else {
            Err(ClientError::not_found("NoSuchFile"))
        }
    }
}

/// Connector handing out one shared [`FakeSftp`]
pub struct FakeSshConnector(pub Arc<FakeSftp>);

impl SshConnector for FakeSshConnector {
    fn session(&self, _user: &str, _host: &str) -> Result<Arc<dyn SftpSession>> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Kubernetes
// =============================================================================

/// In-memory namespaced store
#[derive(Default)]
pub struct FakeKubeStore {
    entries: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl KubeObjectStore for FakeKubeStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .insert((namespace.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    async fn create(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock();
        let id = (namespace.to_string(), key.to_string());
        if entries.contains_key(&id) {
            return Err(Error::already_exists(format!("k8s://{namespace}/{key}")));
        }
        entries.insert(id, data.to_vec());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.entries
            .lock()
            .remove(&(namespace.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::not_exist(format!("k8s://{namespace}/{key}")))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect())
    }
}
