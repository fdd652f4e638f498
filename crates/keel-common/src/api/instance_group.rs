//! Instance group document, stored at `<state-store>/instancegroup/<name>`

use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::components::KubeletConfigSpec;

/// A homogeneous set of nodes
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kops.k8s.io",
    version = "v1alpha2",
    kind = "InstanceGroup",
    plural = "instancegroups",
    namespaced = false,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupSpec {
    /// Role of every node in the group
    #[serde(default)]
    pub role: InstanceGroupRole,
    /// Minimum (and initial) node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i32>,
    /// Maximum node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i32>,
    /// Machine / commercial type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    /// Boot image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Zones the group spans
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    /// Subnets the group spans
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
    /// Root volume size in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume_size: Option<i32>,
    /// Give instances a public IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associate_public_ip: Option<bool>,
    /// Kubernetes node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,
    /// Cloud tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cloud_labels: BTreeMap<String, String>,
    /// Per-group kubelet overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletConfigSpec>,
}

/// Role of an instance group
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum InstanceGroupRole {
    /// Runs the control plane
    #[serde(alias = "Master")]
    ControlPlane,
    /// Worker node
    #[default]
    Node,
    /// SSH bastion
    Bastion,
    /// Dedicated API server node
    #[serde(rename = "APIServer")]
    ApiServer,
}

impl InstanceGroupRole {
    /// Role label used in cloud tags (`k8s.io/role/<label>`)
    pub fn tag_label(&self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Node => "node",
            Self::Bastion => "bastion",
            Self::ApiServer => "apiserver",
        }
    }

    /// Parse a role from its tag label
    pub fn from_tag_label(label: &str) -> Option<Self> {
        match label {
            "control-plane" | "master" => Some(Self::ControlPlane),
            "node" => Some(Self::Node),
            "bastion" => Some(Self::Bastion),
            "apiserver" => Some(Self::ApiServer),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ControlPlane => "ControlPlane",
            Self::Node => "Node",
            Self::Bastion => "Bastion",
            Self::ApiServer => "APIServer",
        })
    }
}

impl InstanceGroup {
    /// Group name (metadata.name)
    pub fn group_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// True if the group runs the control plane
    pub fn is_control_plane(&self) -> bool {
        self.spec.role == InstanceGroupRole::ControlPlane
    }

    /// True if nodes in the group serve the API (control plane or APIServer)
    pub fn has_api_server(&self) -> bool {
        matches!(
            self.spec.role,
            InstanceGroupRole::ControlPlane | InstanceGroupRole::ApiServer
        )
    }

    /// Minimum size, defaulting to 1
    pub fn min_size(&self) -> i32 {
        self.spec.min_size.unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_master_role_is_accepted() {
        let yaml = r#"
apiVersion: kops.k8s.io/v1alpha2
kind: InstanceGroup
metadata:
  name: master-fr-par-1
spec:
  role: Master
  minSize: 1
  maxSize: 1
  machineType: DEV1-M
  zones: [fr-par-1]
"#;
        let ig: InstanceGroup = serde_yaml::from_str(yaml).unwrap();
        assert!(ig.is_control_plane());
        assert!(ig.has_api_server());
        assert_eq!(ig.group_name(), "master-fr-par-1");
        assert_eq!(ig.min_size(), 1);
    }

    #[test]
    fn role_tag_labels_round_trip() {
        for role in [
            InstanceGroupRole::ControlPlane,
            InstanceGroupRole::Node,
            InstanceGroupRole::Bastion,
            InstanceGroupRole::ApiServer,
        ] {
            assert_eq!(InstanceGroupRole::from_tag_label(role.tag_label()), Some(role));
        }
    }
}
