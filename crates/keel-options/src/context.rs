//! Per-reconcile facts the options builders consult

use std::sync::Arc;

use tracing::debug;

use keel_assets::AssetBuilder;
use keel_common::api::Cluster;
use keel_common::version::KubernetesVersion;
use keel_common::{Error, Result};

/// Nodes may trail the control plane by at most this many minor releases
pub const MAX_NODE_SKEW: u64 = 3;

/// Immutable inputs to one options pass
#[derive(Clone, Debug)]
pub struct OptionsContext {
    cluster_name: String,
    control_plane_version: KubernetesVersion,
    node_version: KubernetesVersion,
    legacy_unified_version: bool,
    assets: Option<Arc<AssetBuilder>>,
}

impl OptionsContext {
    /// Context for `cluster`
    ///
    /// `spec.nodeKubernetesVersion` pins nodes below the control plane; it may
    /// not be newer, nor more than [`MAX_NODE_SKEW`] minors older.
    pub fn new(cluster: &Cluster) -> Result<Self> {
        let control_plane_version = cluster.kubernetes_version()?;
        let node_version = match cluster.spec.node_kubernetes_version.as_deref() {
            None => control_plane_version.clone(),
            Some(raw) => {
                let node = KubernetesVersion::parse(raw)?;
                check_node_skew(&control_plane_version, &node)?;
                node
            }
        };
        debug!(
            cluster = %cluster.cluster_name(),
            control_plane = %control_plane_version,
            node = %node_version,
            "options context"
        );
        Ok(Self {
            cluster_name: cluster.cluster_name().to_string(),
            control_plane_version,
            node_version,
            legacy_unified_version: false,
            assets: None,
        })
    }

    /// Answer node version queries with the control-plane version
    pub fn with_legacy_unified_version(mut self, legacy: bool) -> Self {
        self.legacy_unified_version = legacy;
        self
    }

    /// Remap images through `assets`
    pub fn with_assets(mut self, assets: Arc<AssetBuilder>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Cluster name
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Control-plane version
    pub fn control_plane_version(&self) -> &KubernetesVersion {
        &self.control_plane_version
    }

    /// Version kubelets and node components run
    pub fn node_version(&self) -> &KubernetesVersion {
        if self.legacy_unified_version {
            &self.control_plane_version
        } else {
            &self.node_version
        }
    }

    /// Asset builder, when configured
    pub fn assets(&self) -> Option<&Arc<AssetBuilder>> {
        self.assets.as_ref()
    }

    /// Control plane is at or above `version`
    pub fn is_kubernetes_gte(&self, version: &str) -> bool {
        self.control_plane_version.is_gte(version)
    }

    /// Control plane is below `version`
    pub fn is_kubernetes_lt(&self, version: &str) -> bool {
        self.control_plane_version.is_lt(version)
    }

    /// Nodes are at or above `version`
    pub fn is_node_kubernetes_gte(&self, version: &str) -> bool {
        self.node_version().is_gte(version)
    }

    /// Nodes are below `version`
    pub fn is_node_kubernetes_lt(&self, version: &str) -> bool {
        self.node_version().is_lt(version)
    }

    /// `image` as the cluster should pull it
    pub fn remap_image(&self, image: &str) -> Result<String> {
        match &self.assets {
            Some(assets) => assets.remap_image(image),
            None => Ok(image.to_string()),
        }
    }
}

fn check_node_skew(control_plane: &KubernetesVersion, node: &KubernetesVersion) -> Result<()> {
    if node > control_plane {
        return Err(Error::invalid_field(
            "spec.nodeKubernetesVersion",
            format!("node version {node} is newer than control plane version {control_plane}"),
        ));
    }
    if node.minors_behind(control_plane) > MAX_NODE_SKEW {
        return Err(Error::invalid_field(
            "spec.nodeKubernetesVersion",
            format!(
                "node version {node} is more than {MAX_NODE_SKEW} minor versions behind {control_plane}"
            ),
        ));
    }
    Ok(())
}
