//! Path manipulation helpers shared by the backends

use keel_common::{Error, Result};

use crate::backends::azure::AzureBlobPath;
use crate::backends::gcs::GcsPath;
use crate::backends::k8s::K8sPath;
use crate::backends::oss::OssPath;
use crate::backends::s3::S3Path;
use crate::backends::swift::SwiftPath;
use crate::path::{downcast, Path};

/// Join `parts` onto `base`, collapsing empty, `.` and `..` segments
///
/// A leading `/` on `base` is preserved; an empty result stays empty so
/// bucket roots keep an empty key.
pub fn join_key(base: &str, parts: &[&str]) -> String {
    let rooted = base.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in std::iter::once(base)
        .chain(parts.iter().copied())
        .flat_map(|p| p.split('/'))
    {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Final segment of a key, ignoring trailing slashes
pub fn base_name(key: &str) -> String {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Parent key, or an empty string at the root
pub fn parent_key(key: &str) -> &str {
    match key.trim_end_matches('/').rfind('/') {
        Some(0) => "/",
        Some(i) => &key[..i],
        None => "",
    }
}

/// True if `child` equals `parent` or lies beneath it, comparing whole segments
pub fn is_within(parent: &str, child: &str) -> bool {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        return true;
    }
    child == parent
        || child
            .strip_prefix(parent)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

/// Key prefix used to list the children of `key`
pub fn dir_prefix(key: &str) -> String {
    let key = key.trim_end_matches('/');
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

/// Path of `child` relative to `base`
pub fn relative_path(base: &dyn Path, child: &dyn Path) -> Result<String> {
    let base_url = base.path();
    let child_url = child.path();
    let prefix = dir_prefix(&base_url);
    child_url
        .strip_prefix(&prefix)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::invalid_input(format!("path {child_url} is not a child of {base_url}"))
        })
}

/// True if nodes of the cluster can read `path` with their own credentials
///
/// Object stores and the Kubernetes store qualify; local disk, SFTP, Vault,
/// HTTP and memory paths are only reachable from the machine running keel.
pub fn is_cluster_readable(path: &dyn Path) -> bool {
    downcast::<S3Path>(path).is_some()
        || downcast::<GcsPath>(path).is_some()
        || downcast::<AzureBlobPath>(path).is_some()
        || downcast::<SwiftPath>(path).is_some()
        || downcast::<OssPath>(path).is_some()
        || downcast::<K8sPath>(path).is_some()
}

/// True if nodes of the cluster can write `path`
pub fn is_cluster_writable(path: &dyn Path) -> bool {
    is_cluster_readable(path)
}

/// Split `bucket/key/parts` into bucket and key
pub fn split_bucket(rest: &str) -> (String, String) {
    match rest.split_once('/') {
        Some((bucket, key)) => (bucket.to_string(), join_key(key, &[])),
        None => (rest.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_collapses_segments_and_is_associative() {
        assert_eq!(join_key("cluster", &["pki", "", "./ca"]), "cluster/pki/ca");
        assert_eq!(join_key("", &["a"]), "a");
        assert_eq!(join_key("/tmp/x", &["..", "y"]), "/tmp/y");
        assert_eq!(
            join_key(&join_key("a", &["b"]), &["c"]),
            join_key("a", &["b", "c"])
        );
    }

    #[test]
    fn within_compares_whole_segments() {
        assert!(is_within("cluster", "cluster/secrets"));
        assert!(is_within("cluster", "cluster"));
        assert!(!is_within("cluster", "cluster2/secrets"));
        assert!(is_within("", "anything"));
        assert!(is_within("opps/", "opps/file"));
    }

    #[test]
    fn base_and_parent() {
        assert_eq!(base_name("a/b/c"), "c");
        assert_eq!(base_name("a/b/"), "b");
        assert_eq!(parent_key("a/b/c"), "a/b");
        assert_eq!(parent_key("/c"), "/");
        assert_eq!(parent_key("c"), "");
    }

    #[test]
    fn local_and_memory_paths_are_not_cluster_readable() {
        let fs = crate::backends::fs::FsPath::new("/tmp/state");
        assert!(!is_cluster_readable(&fs));
        let mem = std::sync::Arc::new(crate::backends::memfs::MemFsContext::default()).path("x");
        assert!(!is_cluster_writable(&mem));
        let store = std::sync::Arc::new(crate::testing::FakeObjectStore::default());
        assert!(is_cluster_readable(&GcsPath::new(store, "b", "k")));
    }

    #[test]
    fn split_bucket_cleans_key() {
        assert_eq!(
            split_bucket("bucket/a//b/"),
            ("bucket".to_string(), "a/b".to_string())
        );
        assert_eq!(split_bucket("bucket"), ("bucket".to_string(), String::new()));
    }
}
