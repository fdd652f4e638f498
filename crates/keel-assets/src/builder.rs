//! Discovers the files and images a cluster needs and remaps them to mirrors

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_yaml::Value;
use tracing::{debug, info};
use url::Url;

use keel_common::api::{AssetsSpec, Cluster};
use keel_common::env::{EnvSource, OsEnv};
use keel_common::hashing::Hash;
use keel_common::retry::Backoff;
use keel_common::version::KubernetesVersion;
use keel_common::{Error, Result};
use keel_vfs::{ReadOptions, VfsContext};

use crate::manifest;

/// Overrides the dns-controller image
pub const DNS_CONTROLLER_IMAGE_ENV: &str = "DNSCONTROLLER_IMAGE";

/// Overrides the kops-controller image
pub const KOPS_CONTROLLER_IMAGE_ENV: &str = "KOPSCONTROLLER_IMAGE";

const HASH_SIDECARS: [&str; 2] = [".sha256", ".sha1"];
const MANIFEST_SEPARATOR: &str = "\n---\n\n";

/// A container image the cluster runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerAsset {
    /// Image the cluster pulls
    pub docker_image: String,
    /// Image it is copied from, when mirrored
    pub canonical_location: Option<String>,
}

/// A file the cluster downloads
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAsset {
    /// Where nodes download the file from
    pub download_url: Url,
    /// Where the file is published, when mirrored
    pub canonical_url: Option<Url>,
    /// Expected digest
    pub hash: Hash,
}

/// Collects assets while the cluster model is built
pub struct AssetBuilder {
    vfs: Arc<VfsContext>,
    location: Option<AssetsSpec>,
    kubernetes_version: KubernetesVersion,
    assets_phase: bool,
    env: Arc<dyn EnvSource>,
    containers: Mutex<Vec<ContainerAsset>>,
    files: Mutex<Vec<FileAsset>>,
}

impl std::fmt::Debug for AssetBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetBuilder")
            .field("location", &self.location)
            .field("kubernetes_version", &self.kubernetes_version)
            .field("assets_phase", &self.assets_phase)
            .finish_non_exhaustive()
    }
}

impl AssetBuilder {
    /// Builder reading through `vfs`
    pub fn new(vfs: Arc<VfsContext>, location: Option<AssetsSpec>, kubernetes_version: KubernetesVersion) -> Self {
        Self {
            vfs,
            location,
            kubernetes_version,
            assets_phase: false,
            env: Arc::new(OsEnv),
            containers: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
        }
    }

    /// Builder for `cluster`'s asset locations and version
    pub fn for_cluster(vfs: Arc<VfsContext>, cluster: &Cluster) -> Result<Self> {
        let version = cluster
            .spec
            .kubernetes_version
            .as_deref()
            .ok_or_else(|| Error::required_field("spec.kubernetesVersion"))?;
        Ok(Self::new(
            vfs,
            cluster.spec.assets.clone(),
            KubernetesVersion::parse(version)?,
        ))
    }

    /// Read hash sidecars from the canonical location (used while staging assets)
    pub fn with_assets_phase(mut self, assets_phase: bool) -> Self {
        self.assets_phase = assets_phase;
        self
    }

    /// Environment consulted for image overrides
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    /// Version the assets are chosen for
    pub fn kubernetes_version(&self) -> &KubernetesVersion {
        &self.kubernetes_version
    }

    /// Configured mirrors
    pub fn location(&self) -> Option<&AssetsSpec> {
        self.location.as_ref()
    }

    /// Images recorded so far
    pub fn container_assets(&self) -> Vec<ContainerAsset> {
        self.containers.lock().clone()
    }

    /// Files recorded so far
    pub fn file_assets(&self) -> Vec<FileAsset> {
        self.files.lock().clone()
    }

    /// Image the cluster should run in place of `image`
    ///
    /// Applying the result again yields the same image, so options builders
    /// may call this on every pass.
    pub fn remap_image(&self, image: &str) -> Result<String> {
        let mut asset = ContainerAsset {
            docker_image: image.to_string(),
            canonical_location: None,
        };
        let mut image = image.to_string();

        if !self.kubernetes_version.is_gte("1.10") {
            if let Some(rest) = image.strip_prefix("k8s.gcr.io/") {
                image = format!("gcr.io/google_containers/{rest}");
            }
        }

        for (prefix, env) in [
            ("kope/dns-controller:", DNS_CONTROLLER_IMAGE_ENV),
            ("kope/kops-controller:", KOPS_CONTROLLER_IMAGE_ENV),
        ] {
            if image.starts_with(prefix) {
                if let Some(custom) = self.env.get(env) {
                    image = custom;
                }
            }
        }

        let location = self.location.as_ref();
        if let Some(proxy) = location.and_then(|l| l.container_proxy.as_deref()) {
            let proxy = proxy.trim_end_matches('/');
            let first = image.split('/').next().unwrap_or_default();
            let normalized = if image.matches('/').count() <= 1 && !first.contains(['.', ':']) {
                format!("{proxy}/{image}")
            } else {
                format!("{proxy}{}", &image[first.len()..])
            };
            asset.docker_image = normalized.clone();
            asset.canonical_location = Some(image);
            image = normalized;
        }

        if let Some(registry) = location.and_then(|l| l.container_registry.as_deref()) {
            let stripped = if !self.kubernetes_version.is_gte("1.10") {
                image.strip_prefix("gcr.io/google_containers/")
            } else {
                image.strip_prefix("k8s.gcr.io/")
            };
            let normalized = stripped.unwrap_or(&image);
            if !normalized.starts_with(&format!("{registry}/")) {
                asset.docker_image = format!("{registry}/{}", normalized.replace('/', "-"));
            }
            asset.canonical_location = Some(image);
            image = asset.docker_image.clone();
        }

        let mut containers = self.containers.lock();
        if !containers.iter().any(|c| c.docker_image == asset.docker_image) {
            containers.push(asset);
        }
        Ok(image)
    }

    /// Rewrite every container image in a multi-document YAML manifest
    pub fn remap_manifest(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for document in serde_yaml::Deserializer::from_slice(data) {
            let mut value: Value = serde::Deserialize::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            self.remap_images_in(&mut value)?;
            out.push(serde_yaml::to_string(&value)?);
        }
        Ok(out.join(MANIFEST_SEPARATOR).into_bytes())
    }

    fn remap_images_in(&self, value: &mut Value) -> Result<()> {
        match value {
            Value::Mapping(map) => {
                for (key, child) in map.iter_mut() {
                    let is_container_list = matches!(key.as_str(), Some("containers" | "initContainers"));
                    match child {
                        Value::Sequence(items) if is_container_list => {
                            for container in items {
                                if let Some(Value::String(image)) = container.get_mut("image") {
                                    *image = self.remap_image(image)?;
                                }
                            }
                        }
                        _ => self.remap_images_in(child)?,
                    }
                }
            }
            Value::Sequence(items) => {
                for item in items {
                    self.remap_images_in(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Download location and digest for `url`
    pub async fn remap_file(&self, url: &Url) -> Result<(Url, Hash)> {
        let (download_url, canonical_url) = self.remap_location(url)?;
        let hash = self.find_hash(url, &download_url, canonical_url.as_ref()).await?;
        self.record_file(FileAsset {
            download_url: download_url.clone(),
            canonical_url,
            hash: hash.clone(),
        });
        Ok((download_url, hash))
    }

    /// Download location for `url`, whose digest is already known
    pub fn remap_file_with_hash(&self, url: &Url, hash: Hash) -> Result<Url> {
        let (download_url, canonical_url) = self.remap_location(url)?;
        self.record_file(FileAsset {
            download_url: download_url.clone(),
            canonical_url,
            hash,
        });
        Ok(download_url)
    }

    fn record_file(&self, asset: FileAsset) {
        debug!(url = %asset.download_url, hash = %asset.hash, "adding file asset");
        let mut files = self.files.lock();
        if !files.iter().any(|f| f.download_url == asset.download_url) {
            files.push(asset);
        }
    }

    fn remap_location(&self, url: &Url) -> Result<(Url, Option<Url>)> {
        let repository = self.location.as_ref().and_then(|l| l.file_repository.as_deref());
        match repository {
            None | Some("") => Ok((url.clone(), None)),
            Some(repository) => {
                let mut mirrored = Url::parse(repository).map_err(|e| {
                    Error::invalid_field(
                        "spec.assets.fileRepository",
                        format!("unable to parse {repository:?}: {e}"),
                    )
                })?;
                let joined = format!("{}{}", mirrored.path().trim_end_matches('/'), url.path());
                mirrored.set_path(&joined);
                debug!(canonical = %url, mirrored = %mirrored, "remapped file");
                Ok((mirrored, Some(url.clone())))
            }
        }
    }

    async fn find_hash(&self, url: &Url, download_url: &Url, canonical_url: Option<&Url>) -> Result<Hash> {
        if let Some(hash) = manifest::get_hash(url.as_str())? {
            return Ok(hash);
        }

        // While staging, the mirror does not hold the sidecars yet
        let source = match canonical_url {
            Some(canonical) if self.assets_phase => canonical,
            _ => download_url,
        };

        for steps in 1..=3 {
            let backoff = Backoff {
                duration: Duration::from_millis(500),
                factor: 2.0,
                jitter: 0.0,
                steps,
            };
            for ext in HASH_SIDECARS {
                let hash_url = format!("{source}{ext}");
                let data = match self
                    .vfs
                    .read_file(&hash_url, ReadOptions { backoff: Some(backoff.clone()) })
                    .await
                {
                    Ok(data) => data,
                    Err(e) => {
                        debug!(url = %hash_url, error = %e, "unable to read hash file");
                        continue;
                    }
                };
                let text = String::from_utf8_lossy(&data);
                // Accept `<hash>` or `<hash> <filename>`
                let Some(first) = text.split_whitespace().next() else {
                    info!(url = %hash_url, "hash file was empty");
                    continue;
                };
                debug!(url = %source, hash = %first, "found hash");
                return first.parse();
            }
        }

        if canonical_url.is_some() {
            return Err(Error::precondition(format!(
                "cannot find hash for {download_url}; stage the assets to the file repository first"
            )));
        }
        Err(Error::precondition(format!(
            "cannot determine hash for {source} (have you specified a valid file location?)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::env::StaticEnv;
    use keel_vfs::backends::memfs::MemFsContext;
    use keel_vfs::{Path, VfsClients, VfsConfig};

    fn vfs(fs: &Arc<MemFsContext>) -> Arc<VfsContext> {
        Arc::new(VfsContext::new(VfsConfig::default(), VfsClients::default()).with_memfs(fs.clone()))
    }

    fn builder(location: Option<AssetsSpec>) -> AssetBuilder {
        let fs = Arc::new(MemFsContext::default());
        AssetBuilder::new(vfs(&fs), location, KubernetesVersion::new(1, 26, 0))
    }

    fn registry(registry: &str) -> Option<AssetsSpec> {
        Some(AssetsSpec {
            container_registry: Some(registry.to_string()),
            ..Default::default()
        })
    }

    fn proxy(proxy: &str) -> Option<AssetsSpec> {
        Some(AssetsSpec {
            container_proxy: Some(proxy.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn images_pass_through_without_mirrors() {
        let b = builder(None);
        assert_eq!(b.remap_image("registry.k8s.io/pause:3.9").unwrap(), "registry.k8s.io/pause:3.9");
        assert_eq!(
            b.container_assets(),
            vec![ContainerAsset {
                docker_image: "registry.k8s.io/pause:3.9".into(),
                canonical_location: None,
            }]
        );
    }

    #[test]
    fn registry_flattens_and_is_idempotent() {
        let b = builder(registry("mirror.example.com"));
        let once = b.remap_image("k8s.gcr.io/kube-apiserver:v1.26.0").unwrap();
        assert_eq!(once, "mirror.example.com/kube-apiserver:v1.26.0");
        let nested = b.remap_image("quay.io/cilium/cilium:v1.13").unwrap();
        assert_eq!(nested, "mirror.example.com/quay.io-cilium-cilium:v1.13");

        assert_eq!(b.remap_image(&once).unwrap(), once);
        assert_eq!(b.container_assets().len(), 2);
        assert_eq!(
            b.container_assets()[0].canonical_location.as_deref(),
            Some("k8s.gcr.io/kube-apiserver:v1.26.0")
        );
    }

    #[test]
    fn proxy_replaces_registry_host() {
        let b = builder(proxy("proxy.example.com/"));
        assert_eq!(b.remap_image("weaveworks/weave-kube:2.8").unwrap(), "proxy.example.com/weaveworks/weave-kube:2.8");
        assert_eq!(b.remap_image("nginx:1.25").unwrap(), "proxy.example.com/nginx:1.25");
        assert_eq!(
            b.remap_image("registry.k8s.io/coredns/coredns:v1.10.1").unwrap(),
            "proxy.example.com/coredns/coredns:v1.10.1"
        );
    }

    #[test]
    fn controller_images_honor_env_overrides() {
        let b = builder(None).with_env(Arc::new(StaticEnv::new([(
            DNS_CONTROLLER_IMAGE_ENV,
            "me/dns-controller:dev",
        )])));
        assert_eq!(b.remap_image("kope/dns-controller:1.26.0").unwrap(), "me/dns-controller:dev");
        assert_eq!(b.remap_image("kope/kops-controller:1.26.0").unwrap(), "kope/kops-controller:1.26.0");
    }

    #[test]
    fn old_releases_use_the_legacy_registry() {
        let fs = Arc::new(MemFsContext::default());
        let b = AssetBuilder::new(vfs(&fs), None, KubernetesVersion::new(1, 9, 3));
        assert_eq!(
            b.remap_image("k8s.gcr.io/pause:3.1").unwrap(),
            "gcr.io/google_containers/pause:3.1"
        );
    }

    #[test]
    fn manifests_have_container_images_rewritten() {
        let b = builder(registry("mirror.example.com"));
        let manifest = br#"
apiVersion: v1
kind: Pod
metadata:
  name: p
spec:
  initContainers:
  - name: init
    image: busybox:1.36
  containers:
  - name: app
    image: k8s.gcr.io/pause:3.9
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: d
spec:
  template:
    spec:
      containers:
      - name: app
        image: quay.io/x/y:1
"#;
        let out = b.remap_manifest(manifest).unwrap();
        assert!(String::from_utf8_lossy(&out).contains("\n---\n\n"));

        let docs: Vec<Value> = serde_yaml::Deserializer::from_slice(&out)
            .map(|d| serde::Deserialize::deserialize(d).unwrap())
            .collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["spec"]["initContainers"][0]["image"], "mirror.example.com/busybox:1.36");
        assert_eq!(docs[0]["spec"]["containers"][0]["image"], "mirror.example.com/pause:3.9");
        assert_eq!(
            docs[1]["spec"]["template"]["spec"]["containers"][0]["image"],
            "mirror.example.com/quay.io-x-y:1"
        );
    }

    #[tokio::test]
    async fn manifest_hash_wins_over_sidecars() {
        let b = builder(None);
        let url = Url::parse("https://dl.k8s.io/release/v1.26.0/bin/linux/amd64/kubelet").unwrap();
        let (download, hash) = b.remap_file(&url).await.unwrap();
        assert_eq!(download, url);
        assert_eq!(hash.hex(), "b64949fe696c77565edbe4100a315b6bf8f0e2325daeb762f7e865f16a6e54b5");
    }

    #[tokio::test]
    async fn sidecar_hash_is_read_from_the_mirror() {
        let fs = Arc::new(MemFsContext::default());
        let digest = "a".repeat(64);
        fs.path("mirror/files/tools/crictl.tar.gz.sha256")
            .write_file(format!("{digest}  crictl.tar.gz\n").as_bytes(), None)
            .await
            .unwrap();
        let b = AssetBuilder::new(
            vfs(&fs),
            Some(AssetsSpec {
                file_repository: Some("memfs://mirror/files/".into()),
                ..Default::default()
            }),
            KubernetesVersion::new(1, 26, 0),
        );

        let url = Url::parse("https://github.com/tools/crictl.tar.gz").unwrap();
        let (download, hash) = b.remap_file(&url).await.unwrap();
        assert_eq!(download.as_str(), "memfs://mirror/files/tools/crictl.tar.gz");
        assert_eq!(hash.hex(), digest);

        let files = b.file_assets();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].canonical_url.as_ref(), Some(&url));
    }

    #[tokio::test]
    async fn sha1_sidecar_is_the_fallback() {
        let fs = Arc::new(MemFsContext::default());
        let digest = "b".repeat(40);
        fs.path("store/bin/tool.sha1")
            .write_file(digest.as_bytes(), None)
            .await
            .unwrap();
        let b = AssetBuilder::new(vfs(&fs), None, KubernetesVersion::new(1, 26, 0));

        let url = Url::parse("memfs://store/bin/tool").unwrap();
        let (_, hash) = b.remap_file(&url).await.unwrap();
        assert_eq!(hash.to_string(), format!("sha1:{digest}"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_hash_explains_itself() {
        let b = builder(Some(AssetsSpec {
            file_repository: Some("memfs://mirror/".into()),
            ..Default::default()
        }));
        let url = Url::parse("https://example.com/nothing").unwrap();
        let err = b.remap_file(&url).await.unwrap_err();
        assert!(err.to_string().contains("stage the assets"), "{err}");

        let err = builder(None)
            .remap_file(&Url::parse("memfs://nowhere/file").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot determine hash"), "{err}");
    }

    #[test]
    fn known_hash_is_recorded_with_the_mirror_location() {
        let b = builder(Some(AssetsSpec {
            file_repository: Some("https://mirror.example.com/k8s".into()),
            ..Default::default()
        }));
        let url = Url::parse("https://github.com/containernetworking/plugins/cni.tgz").unwrap();
        let hash: Hash = "c".repeat(64).parse().unwrap();
        let download = b.remap_file_with_hash(&url, hash).unwrap();
        assert_eq!(
            download.as_str(),
            "https://mirror.example.com/k8s/containernetworking/plugins/cni.tgz"
        );
    }
}
