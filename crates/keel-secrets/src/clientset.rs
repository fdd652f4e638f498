//! Cluster and instance group documents in the state store
//!
//! ```text
//! <base>/config                   Cluster YAML
//! <base>/instancegroup/<name>     InstanceGroup YAML
//! <base>/secrets/<name>           secrets
//! <base>/pki/...                  keysets
//! <base>/clusteraddons/default    addon manifest
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::info;

use keel_common::api::{Cluster, InstanceGroup};
use keel_common::{Error, Result};
use keel_vfs::{Acl, AclOracle, VfsPath};

use crate::keystore::VfsKeystore;
use crate::vfs_store::VfsSecretStore;

const CONFIG_FILE: &str = "config";
const INSTANCE_GROUP_DIR: &str = "instancegroup";

/// Read/write access to one cluster's state-store directory
#[derive(Clone)]
pub struct VfsClientset {
    base: VfsPath,
    acls: Option<(Arc<dyn AclOracle>, Arc<Cluster>)>,
}

impl VfsClientset {
    /// Clientset rooted at the cluster directory `base`
    pub fn new(base: VfsPath) -> Self {
        Self { base, acls: None }
    }

    /// Apply ACLs chosen by `oracle` to every write
    pub fn with_acls(mut self, oracle: Arc<dyn AclOracle>, cluster: Arc<Cluster>) -> Self {
        self.acls = Some((oracle, cluster));
        self
    }

    /// The cluster directory
    pub fn base(&self) -> &VfsPath {
        &self.base
    }

    fn acl_for(&self, path: &VfsPath) -> Result<Option<Acl>> {
        match &self.acls {
            Some((oracle, cluster)) => oracle.get_acl(path.as_ref(), cluster),
            None => Ok(None),
        }
    }

    async fn read_yaml<T: DeserializeOwned>(path: &VfsPath, kind: &str) -> Result<Option<T>> {
        match path.read_file().await {
            Ok(data) => serde_yaml::from_slice(&data)
                .map(Some)
                .map_err(|e| Error::serialization_for(kind, format!("parsing {}: {e}", path.path()))),
            Err(e) if e.is_not_exist() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The cluster document, if the cluster exists
    pub async fn get_cluster(&self) -> Result<Option<Cluster>> {
        Self::read_yaml(&self.base.join(&[CONFIG_FILE]), "Cluster").await
    }

    /// Store a new cluster document, failing if one exists
    pub async fn create_cluster(&self, cluster: &Cluster) -> Result<()> {
        if cluster.cluster_name().is_empty() {
            return Err(Error::required_field("metadata.name"));
        }
        let path = self.base.join(&[CONFIG_FILE]);
        let acl = self.acl_for(&path)?;
        let data = serde_yaml::to_string(cluster)?;
        path.create_file(data.as_bytes(), acl.as_ref())
            .await
            .map_err(|e| {
                if e.is_already_exists() {
                    Error::already_exists(format!("cluster {}", cluster.cluster_name()))
                } else {
                    e
                }
            })?;
        info!(cluster = %cluster.cluster_name(), "created cluster");
        Ok(())
    }

    /// Overwrite the cluster document, which must already exist
    pub async fn update_cluster(&self, cluster: &Cluster) -> Result<()> {
        let Some(existing) = self.get_cluster().await? else {
            return Err(Error::not_exist(format!("cluster {}", cluster.cluster_name())));
        };
        if existing.cluster_name() != cluster.cluster_name() {
            return Err(Error::cannot_change_field("metadata.name"));
        }
        let path = self.base.join(&[CONFIG_FILE]);
        let acl = self.acl_for(&path)?;
        path.write_file(serde_yaml::to_string(cluster)?.as_bytes(), acl.as_ref())
            .await
    }

    fn instance_group_path(&self, name: &str) -> Result<VfsPath> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::invalid_field(
                "instance group name",
                format!("invalid name {name:?}"),
            ));
        }
        Ok(self.base.join(&[INSTANCE_GROUP_DIR, name]))
    }

    /// Every instance group, sorted by name
    pub async fn list_instance_groups(&self) -> Result<Vec<InstanceGroup>> {
        let entries = match self.base.join(&[INSTANCE_GROUP_DIR]).read_dir().await {
            Ok(entries) => entries,
            Err(e) if e.is_not_exist() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut groups = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(ig) = Self::read_yaml::<InstanceGroup>(&entry, "InstanceGroup").await? {
                groups.push(ig);
            }
        }
        groups.sort_by(|a, b| a.group_name().cmp(b.group_name()));
        Ok(groups)
    }

    /// The instance group called `name`, if present
    pub async fn get_instance_group(&self, name: &str) -> Result<Option<InstanceGroup>> {
        Self::read_yaml(&self.instance_group_path(name)?, "InstanceGroup").await
    }

    /// Store a new instance group, failing if one with that name exists
    pub async fn create_instance_group(&self, ig: &InstanceGroup) -> Result<()> {
        let path = self.instance_group_path(ig.group_name())?;
        let acl = self.acl_for(&path)?;
        path.create_file(serde_yaml::to_string(ig)?.as_bytes(), acl.as_ref())
            .await?;
        info!(instance_group = %ig.group_name(), "created instance group");
        Ok(())
    }

    /// Overwrite an existing instance group
    pub async fn update_instance_group(&self, ig: &InstanceGroup) -> Result<()> {
        let path = self.instance_group_path(ig.group_name())?;
        if Self::read_yaml::<InstanceGroup>(&path, "InstanceGroup").await?.is_none() {
            return Err(Error::not_exist(format!("instance group {}", ig.group_name())));
        }
        let acl = self.acl_for(&path)?;
        path.write_file(serde_yaml::to_string(ig)?.as_bytes(), acl.as_ref())
            .await
    }

    /// Delete the instance group called `name`
    pub async fn delete_instance_group(&self, name: &str) -> Result<()> {
        self.instance_group_path(name)?.remove().await
    }

    /// Secret store under `secrets/`
    pub fn secret_store(&self) -> VfsSecretStore {
        let store = VfsSecretStore::new(self.base.join(&["secrets"]));
        match &self.acls {
            Some((oracle, cluster)) => store.with_acls(oracle.clone(), cluster.clone()),
            None => store,
        }
    }

    /// Keystore under `pki/`
    pub fn keystore(&self) -> VfsKeystore {
        let keystore = VfsKeystore::new(self.base.join(&["pki"]));
        match &self.acls {
            Some((oracle, cluster)) => keystore.with_acls(oracle.clone(), cluster.clone()),
            None => keystore,
        }
    }

    /// Location of the addon manifest
    pub fn addons_path(&self) -> VfsPath {
        self.base.join(&["clusteraddons", "default"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::api::{ClusterSpec, InstanceGroupRole, InstanceGroupSpec};
    use keel_vfs::backends::memfs::MemFsContext;

    fn clientset() -> VfsClientset {
        let ctx = Arc::new(MemFsContext::default());
        VfsClientset::new(Arc::new(ctx.path("state/c.example.com")))
    }

    fn ig(name: &str, role: InstanceGroupRole) -> InstanceGroup {
        InstanceGroup::new(
            name,
            InstanceGroupSpec {
                role,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn cluster_create_is_exclusive() {
        let cs = clientset();
        assert!(cs.get_cluster().await.unwrap().is_none());

        let cluster = Cluster::new("c.example.com", ClusterSpec::default());
        cs.create_cluster(&cluster).await.unwrap();
        assert!(cs.create_cluster(&cluster).await.unwrap_err().is_already_exists());

        let mut updated = cluster.clone();
        updated.spec.kubernetes_version = Some("1.26.0".into());
        cs.update_cluster(&updated).await.unwrap();
        assert_eq!(cs.get_cluster().await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn update_requires_existing_cluster() {
        let cs = clientset();
        let cluster = Cluster::new("c.example.com", ClusterSpec::default());
        assert!(cs.update_cluster(&cluster).await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn instance_groups_are_listed_by_name() {
        let cs = clientset();
        assert!(cs.list_instance_groups().await.unwrap().is_empty());

        cs.create_instance_group(&ig("nodes", InstanceGroupRole::Node))
            .await
            .unwrap();
        cs.create_instance_group(&ig("control-plane-fr-par-1", InstanceGroupRole::ControlPlane))
            .await
            .unwrap();
        let names: Vec<String> = cs
            .list_instance_groups()
            .await
            .unwrap()
            .iter()
            .map(|g| g.group_name().to_string())
            .collect();
        assert_eq!(names, vec!["control-plane-fr-par-1", "nodes"]);

        cs.delete_instance_group("nodes").await.unwrap();
        assert!(cs.get_instance_group("nodes").await.unwrap().is_none());
        assert!(cs
            .update_instance_group(&ig("nodes", InstanceGroupRole::Node))
            .await
            .unwrap_err()
            .is_not_exist());
    }

    #[tokio::test]
    async fn stores_hang_off_the_cluster_directory() {
        let cs = clientset();
        assert_eq!(cs.secret_store().base().path(), "memfs://state/c.example.com/secrets");
        assert_eq!(cs.addons_path().path(), "memfs://state/c.example.com/clusteraddons/default");
    }
}
