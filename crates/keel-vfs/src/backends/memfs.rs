//! In-process tree for tests and dry runs
//!
//! Each node guards its own contents and children with a mutex. A
//! process-wide context is shared by every [`crate::VfsContext`] built
//! without an explicit one and can be reset between tests.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use keel_common::hashing::{hash_bytes, Hash, HashAlgorithm};
use keel_common::{Error, Result};

use crate::acl::Acl;
use crate::path::{Path, VfsPath};
use crate::util::{base_name, join_key};

/// URL scheme of memory paths
pub const MEMFS_SCHEME: &str = "memfs://";

static GLOBAL: Lazy<RwLock<Arc<MemFsContext>>> =
    Lazy::new(|| RwLock::new(Arc::new(MemFsContext::default())));

#[derive(Default)]
struct NodeState {
    contents: Option<Vec<u8>>,
    children: BTreeMap<String, Arc<MemNode>>,
}

#[derive(Default)]
struct MemNode {
    state: Mutex<NodeState>,
}

impl MemNode {
    fn child(&self, name: &str) -> Option<Arc<MemNode>> {
        self.state.lock().children.get(name).cloned()
    }

    fn child_or_create(&self, name: &str) -> Arc<MemNode> {
        self.state
            .lock()
            .children
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// Root of one in-memory tree
#[derive(Default)]
pub struct MemFsContext {
    root: Arc<MemNode>,
}

impl fmt::Debug for MemFsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemFsContext").finish_non_exhaustive()
    }
}

impl MemFsContext {
    /// The process-wide tree
    pub fn global() -> Arc<MemFsContext> {
        GLOBAL.read().clone()
    }

    /// Replace the process-wide tree with an empty one
    pub fn reset_global() {
        *GLOBAL.write() = Arc::new(MemFsContext::default());
    }

    /// Path at `key` in this tree
    pub fn path(self: &Arc<Self>, key: &str) -> MemFsPath {
        MemFsPath {
            context: self.clone(),
            key: join_key(key, &[]),
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<MemNode>> {
        let mut node = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            node = node.child(segment)?;
        }
        Some(node)
    }

    fn lookup_or_create(&self, key: &str) -> Arc<MemNode> {
        let mut node = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            node = node.child_or_create(segment);
        }
        node
    }
}

/// A location in a memory tree
#[derive(Clone)]
pub struct MemFsPath {
    context: Arc<MemFsContext>,
    key: String,
}

impl fmt::Debug for MemFsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemFsPath({})", self.path())
    }
}

impl MemFsPath {
    fn child_path(&self, key: String) -> VfsPath {
        Arc::new(MemFsPath {
            context: self.context.clone(),
            key,
        })
    }

    fn contents(&self) -> Result<Vec<u8>> {
        self.context
            .lookup(&self.key)
            .and_then(|n| n.state.lock().contents.clone())
            .ok_or_else(|| Error::not_exist(self.path()))
    }

    fn collect_tree(&self, node: &MemNode, key: &str, out: &mut Vec<VfsPath>) {
        let state = node.state.lock();
        if state.contents.is_some() && key != self.key {
            out.push(self.child_path(key.to_string()));
        }
        for (name, child) in &state.children {
            self.collect_tree(child, &join_key(key, &[name]), out);
        }
    }
}

#[async_trait]
impl Path for MemFsPath {
    fn join(&self, parts: &[&str]) -> VfsPath {
        self.child_path(join_key(&self.key, parts))
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        self.contents()
    }

    async fn write_file(&self, data: &[u8], _acl: Option<&Acl>) -> Result<()> {
        let node = self.context.lookup_or_create(&self.key);
        node.state.lock().contents = Some(data.to_vec());
        Ok(())
    }

    async fn create_file(&self, data: &[u8], _acl: Option<&Acl>) -> Result<()> {
        let node = self.context.lookup_or_create(&self.key);
        let mut state = node.state.lock();
        if state.contents.is_some() {
            return Err(Error::already_exists(self.path()));
        }
        state.contents = Some(data.to_vec());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let node = self
            .context
            .lookup(&self.key)
            .ok_or_else(|| Error::not_exist(self.path()))?;
        let now_empty = {
            let mut state = node.state.lock();
            if state.contents.take().is_none() {
                return Err(Error::not_exist(self.path()));
            }
            state.children.is_empty()
        };
        if now_empty {
            let parent = crate::util::parent_key(&self.key);
            if let Some(parent) = self.context.lookup(parent) {
                parent.state.lock().children.remove(&self.base());
            }
        }
        Ok(())
    }

    async fn read_dir(&self) -> Result<Vec<VfsPath>> {
        let node = self
            .context
            .lookup(&self.key)
            .ok_or_else(|| Error::not_exist(self.path()))?;
        let names: Vec<String> = node.state.lock().children.keys().cloned().collect();
        Ok(names
            .into_iter()
            .map(|name| self.child_path(join_key(&self.key, &[&name])))
            .collect())
    }

    async fn read_tree(&self) -> Result<Vec<VfsPath>> {
        let node = self
            .context
            .lookup(&self.key)
            .ok_or_else(|| Error::not_exist(self.path()))?;
        let mut out = Vec::new();
        self.collect_tree(&node, &self.key, &mut out);
        Ok(out)
    }

    fn base(&self) -> String {
        base_name(&self.key)
    }

    fn path(&self) -> String {
        format!("{MEMFS_SCHEME}{}", self.key)
    }

    async fn preferred_hash(&self) -> Result<Option<Hash>> {
        self.hash(HashAlgorithm::Sha256).await
    }

    async fn hash(&self, algorithm: HashAlgorithm) -> Result<Option<Hash>> {
        Ok(Some(hash_bytes(algorithm, &self.contents()?)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> MemFsPath {
        Arc::new(MemFsContext::default()).path("tests")
    }

    #[tokio::test]
    async fn create_is_exclusive() {
        let p = root().join(&["cluster", "config"]);
        p.create_file(b"a", None).await.unwrap();
        let err = p.create_file(b"b", None).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(p.read_file().await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn concurrent_creates_have_one_winner() {
        let p: VfsPath = root().join(&["race"]);
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let p = p.clone();
            handles.push(tokio::spawn(async move { p.create_file(&[i], None).await }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn tree_and_dir_listing() {
        let r = root();
        r.join(&["a"]).write_file(b"1", None).await.unwrap();
        r.join(&["d", "b"]).write_file(b"2", None).await.unwrap();

        let dir: Vec<String> = r.read_dir().await.unwrap().iter().map(|p| p.base()).collect();
        assert_eq!(dir, vec!["a", "d"]);

        let tree: Vec<String> = r.read_tree().await.unwrap().iter().map(|p| p.path()).collect();
        assert_eq!(tree, vec!["memfs://tests/a", "memfs://tests/d/b"]);
    }

    #[tokio::test]
    async fn remove_prunes_leaf_and_reports_missing() {
        let r = root();
        let p = r.join(&["x"]);
        p.write_file(b"1", None).await.unwrap();
        p.remove().await.unwrap();
        assert!(p.read_file().await.unwrap_err().is_not_exist());
        assert!(r.read_dir().await.unwrap().is_empty());
        assert!(p.remove().await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn hash_reports_any_algorithm() {
        let p = root().join(&["h"]);
        p.write_file(b"hello", None).await.unwrap();
        for algorithm in HashAlgorithm::ALL {
            let h = p.hash(algorithm).await.unwrap().unwrap();
            assert_eq!(h, hash_bytes(algorithm, b"hello"));
        }
    }
}
