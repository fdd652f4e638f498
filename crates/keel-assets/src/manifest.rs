//! Embedded digests of well-known release artifacts
//!
//! A manifest lists file stores (URL prefixes) and files (paths below a
//! store). A URL matches an entry when it starts with a store's base and
//! the rest of the URL is exactly the file's name.

use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::warn;

use keel_common::hashing::{Hash, HashAlgorithm};
use keel_common::{Error, Result};

/// One hash manifest document
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct HashManifest {
    /// URL prefixes the files are served under
    #[serde(default)]
    pub filestores: Vec<FileStore>,
    /// Known files
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// A URL prefix serving the manifest's files
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct FileStore {
    /// Prefix, usually ending in `/`
    pub base: String,
}

/// A file with its digest
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct FileEntry {
    /// Path below a file store
    pub name: String,
    /// Lowercase hex SHA-256
    pub sha256: String,
}

impl HashManifest {
    /// Parse a manifest from YAML
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::serialization_for("hash manifest", e.to_string()))
    }

    /// Digests of every entry matching `url`
    pub fn matches(&self, url: &str) -> Result<Vec<Hash>> {
        let mut found = Vec::new();
        for store in &self.filestores {
            let Some(rest) = url.strip_prefix(store.base.as_str()) else {
                continue;
            };
            for file in &self.files {
                if rest == file.name {
                    found.push(HashAlgorithm::Sha256.parse_hex(&file.sha256)?);
                }
            }
        }
        Ok(found)
    }
}

const EMBEDDED: &[(&str, &str)] = &[("kubernetes.yaml", include_str!("../hashes/kubernetes.yaml"))];

static MANIFESTS: Lazy<Vec<HashManifest>> = Lazy::new(|| {
    EMBEDDED
        .iter()
        .filter_map(|(name, yaml)| match HashManifest::parse(yaml) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(manifest = %name, error = %e, "skipping unparseable hash manifest");
                None
            }
        })
        .collect()
});

/// Look `url` up in `manifests`
///
/// Returns None when nothing matches, and an error when matches disagree.
pub fn find_hash_in(manifests: &[HashManifest], url: &str) -> Result<Option<Hash>> {
    let mut found: Option<Hash> = None;
    for manifest in manifests {
        for hash in manifest.matches(url)? {
            match &found {
                Some(existing) if *existing != hash => {
                    return Err(Error::invalid_input(format!(
                        "found multiple matching hashes for {url}: {existing} and {hash}"
                    )));
                }
                Some(_) => {}
                None => found = Some(hash),
            }
        }
    }
    Ok(found)
}

/// Look `url` up in the embedded manifests
pub fn get_hash(url: &str) -> Result<Option<Hash>> {
    find_hash_in(&MANIFESTS, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBELET: &str = "https://dl.k8s.io/release/v1.26.0/bin/linux/amd64/kubelet";

    #[test]
    fn embedded_manifests_parse() {
        assert_eq!(MANIFESTS.len(), EMBEDDED.len());
    }

    #[test]
    fn kubelet_release_hash_is_known() {
        let hash = get_hash(KUBELET).unwrap().unwrap();
        assert_eq!(
            hash.to_string(),
            "sha256:b64949fe696c77565edbe4100a315b6bf8f0e2325daeb762f7e865f16a6e54b5"
        );
    }

    #[test]
    fn mirror_store_yields_the_same_hash() {
        let mirrored =
            "https://storage.googleapis.com/kubernetes-release/release/v1.26.0/bin/linux/amd64/kubelet";
        assert_eq!(get_hash(mirrored).unwrap(), get_hash(KUBELET).unwrap());
    }

    #[test]
    fn unknown_urls_have_no_hash() {
        assert_eq!(get_hash("https://dl.k8s.io/release/v1.26.0/bin/linux/arm64/kubelet").unwrap(), None);
        assert_eq!(get_hash("https://example.com/release/v1.26.0/bin/linux/amd64/kubelet").unwrap(), None);
    }

    #[test]
    fn remainder_must_equal_the_file_name() {
        assert_eq!(get_hash("https://dl.k8s.io/mirror/release/v1.26.0/bin/linux/amd64/kubelet").unwrap(), None);
        assert_eq!(get_hash("https://dl.k8s.io/release/v1.26.0/bin/linux/amd64/kubelet.sig").unwrap(), None);
        assert!(get_hash(KUBELET).unwrap().is_some());
    }

    #[test]
    fn disagreeing_manifests_are_ambiguous() {
        let a = HashManifest::parse(
            "filestores: [{base: 'https://a/'}]\nfiles: [{name: f, sha256: '0000000000000000000000000000000000000000000000000000000000000000'}]\n",
        )
        .unwrap();
        let b = HashManifest::parse(
            "filestores: [{base: 'https://a/'}]\nfiles: [{name: f, sha256: '1111111111111111111111111111111111111111111111111111111111111111'}]\n",
        )
        .unwrap();

        assert!(find_hash_in(&[a.clone()], "https://a/f").unwrap().is_some());
        let err = find_hash_in(&[a, b], "https://a/f").unwrap_err();
        assert!(err.to_string().contains("multiple matching hashes"));
    }

    #[test]
    fn malformed_digest_is_an_error() {
        let bad = HashManifest::parse("filestores: [{base: 'https://a/'}]\nfiles: [{name: f, sha256: abc}]\n").unwrap();
        assert!(find_hash_in(&[bad], "https://a/f").is_err());
    }
}
