//! Cluster document
//!
//! The cluster specification is stored as YAML at `<state-store>/config`.
//! After options resolution every field a model builder consults is either
//! user-set or holds a deterministic default.

use std::fmt;
use std::str::FromStr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::components::{
    CloudConfiguration, ClusterAutoscalerConfig, ContainerdConfig, KubeApiServerConfig,
    KubeControllerManagerConfig, KubeDnsConfig, KubeProxyConfig, KubeSchedulerConfig,
    KubeletConfigSpec,
};
use super::networking::{DnsType, NetworkingSpec};

/// Suffix marking a gossip-DNS cluster name
pub const GOSSIP_SUFFIX: &str = ".k8s.local";

/// Specification of a managed cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kops.k8s.io",
    version = "v1alpha2",
    kind = "Cluster",
    plural = "clusters",
    namespaced = false,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Control-plane Kubernetes version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Kubernetes version for nodes, when pinned below the control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_kubernetes_version: Option<String>,

    /// Cloud provider hosting the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<CloudProviderId>,

    /// Where the cluster's state lives
    #[serde(default)]
    pub config_store: ConfigStoreSpec,

    /// DNS zone hosting the cluster records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_zone: Option<String>,

    /// In-cluster DNS domain (defaults to `cluster.local`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_dns_domain: Option<String>,

    /// Name of the SSH key registered with the cloud
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// API server exposure
    #[serde(default)]
    pub api: ApiSpec,

    /// Networking configuration
    #[serde(default)]
    pub networking: NetworkingSpec,

    /// Etcd clusters (typically `main` and `events`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub etcd_clusters: Vec<EtcdClusterSpec>,

    /// Container runtime name (only `containerd` is supported)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<String>,

    /// containerd configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containerd: Option<ContainerdConfig>,

    /// kube-apiserver configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_api_server: Option<KubeApiServerConfig>,

    /// kube-controller-manager configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_controller_manager: Option<KubeControllerManagerConfig>,

    /// kube-scheduler configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_scheduler: Option<KubeSchedulerConfig>,

    /// kube-proxy configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_proxy: Option<KubeProxyConfig>,

    /// Cluster DNS addon configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_dns: Option<KubeDnsConfig>,

    /// kubelet configuration for worker nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletConfigSpec>,

    /// kubelet configuration for control-plane nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_kubelet: Option<KubeletConfigSpec>,

    /// Cloud-controller and storage settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<CloudConfiguration>,

    /// Cluster autoscaler addon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_autoscaler: Option<ClusterAutoscalerConfig>,

    /// Alternate locations for files and images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<AssetsSpec>,

    /// CIDRs allowed to reach the API
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_api_access: Vec<String>,

    /// CIDRs allowed to SSH to nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_access: Vec<String>,
}

impl Cluster {
    /// The cluster name (metadata.name)
    pub fn cluster_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// True if the cluster relies on gossip instead of a DNS provider
    pub fn is_gossip(&self) -> bool {
        self.cluster_name().ends_with(GOSSIP_SUFFIX)
    }

    /// True if the cluster has no DNS provider at all
    pub fn uses_none_dns(&self) -> bool {
        self.spec.networking.topology_dns() == DnsType::None
    }

    /// True if the cluster publishes records in a private zone
    pub fn uses_private_dns(&self) -> bool {
        self.spec.networking.topology_dns() == DnsType::Private
    }

    /// Name of the API endpoint published for clients
    pub fn api_name(&self) -> String {
        self.spec
            .api
            .public_name
            .clone()
            .unwrap_or_else(|| format!("api.{}", self.cluster_name()))
    }

    /// Name of the API endpoint used by nodes
    pub fn api_internal_name(&self) -> String {
        format!("api.internal.{}", self.cluster_name())
    }

    /// Name nodes use to reach kops-controller
    pub fn kops_controller_internal_name(&self) -> String {
        format!("kops-controller.internal.{}", self.cluster_name())
    }

    /// Parsed control-plane Kubernetes version
    pub fn kubernetes_version(&self) -> crate::Result<crate::version::KubernetesVersion> {
        let raw = self.spec.kubernetes_version.as_deref().ok_or_else(|| {
            crate::Error::invalid_field("spec.kubernetesVersion", "kubernetesVersion is required")
        })?;
        crate::version::KubernetesVersion::parse(raw)
    }
}

/// Cloud providers keel can reconcile against
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CloudProviderId {
    /// Amazon Web Services
    Aws,
    /// Google Compute Engine
    Gce,
    /// Microsoft Azure
    Azure,
    /// OpenStack
    #[serde(rename = "openstack")]
    OpenStack,
    /// Hetzner Cloud
    Hetzner,
    /// Scaleway
    Scaleway,
    /// DigitalOcean
    #[serde(rename = "digitalocean")]
    DigitalOcean,
    /// Alibaba Cloud
    #[serde(rename = "alicloud")]
    AliCloud,
    /// Bare metal
    Metal,
}

impl CloudProviderId {
    /// Lowercase identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gce => "gce",
            Self::Azure => "azure",
            Self::OpenStack => "openstack",
            Self::Hetzner => "hetzner",
            Self::Scaleway => "scaleway",
            Self::DigitalOcean => "digitalocean",
            Self::AliCloud => "alicloud",
            Self::Metal => "metal",
        }
    }

    /// True if instances can attach to a private network for internal LBs
    pub fn supports_private_networks(&self) -> bool {
        !matches!(self, Self::Metal | Self::DigitalOcean)
    }
}

impl fmt::Display for CloudProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProviderId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "gce" => Ok(Self::Gce),
            "azure" => Ok(Self::Azure),
            "openstack" => Ok(Self::OpenStack),
            "hetzner" => Ok(Self::Hetzner),
            "scaleway" => Ok(Self::Scaleway),
            "digitalocean" => Ok(Self::DigitalOcean),
            "alicloud" => Ok(Self::AliCloud),
            "metal" => Ok(Self::Metal),
            _ => Err(crate::Error::invalid_input(format!(
                "invalid cloud provider: {s}"
            ))),
        }
    }
}

/// Locations of the state store
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStoreSpec {
    /// Base VFS path of the cluster state (e.g. `s3://bucket/cluster`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Override for the keystore location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypairs: Option<String>,
    /// Override for the secret store location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<String>,
}

/// API exposure
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    /// Expose the API through a cloud load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerAccessSpec>,
    /// Expose the API through DNS records pointing at control-plane nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsAccessSpec>,
    /// Override for the public API name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_name: Option<String>,
}

/// Load balancer in front of the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerAccessSpec {
    /// Public or internal
    #[serde(default, rename = "type")]
    pub lb_type: LoadBalancerType,
    /// Provider-specific LB class / commercial type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Also use the LB for the internal API name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_for_internal_api: Option<bool>,
}

/// Load balancer visibility
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LoadBalancerType {
    /// Reachable from the internet
    #[default]
    Public,
    /// Reachable only from the private network
    Internal,
}

/// DNS-only API access marker
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DnsAccessSpec {}

/// Alternate asset locations
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetsSpec {
    /// Registry that mirrors every image (images are flattened into it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_registry: Option<String>,
    /// Repository that mirrors every file asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_repository: Option<String>,
    /// Pull-through proxy replacing the registry host of every image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_proxy: Option<String>,
}

/// One etcd cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// Cluster name (`main`, `events`, `cilium`)
    pub name: String,
    /// Etcd version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Members, one per control-plane instance group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<EtcdMemberSpec>,
}

/// One etcd member
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdMemberSpec {
    /// Member name
    pub name: String,
    /// Instance group hosting the member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_group: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str) -> Cluster {
        Cluster::new(name, ClusterSpec::default())
    }

    #[test]
    fn derived_names() {
        let c = cluster("example.com");
        assert_eq!(c.cluster_name(), "example.com");
        assert_eq!(c.api_name(), "api.example.com");
        assert_eq!(c.api_internal_name(), "api.internal.example.com");
        assert_eq!(
            c.kops_controller_internal_name(),
            "kops-controller.internal.example.com"
        );
        assert!(!c.is_gossip());
        assert!(cluster("dev.k8s.local").is_gossip());
    }

    #[test]
    fn cloud_provider_parses_case_insensitively() {
        assert_eq!(
            "Scaleway".parse::<CloudProviderId>().unwrap(),
            CloudProviderId::Scaleway
        );
        assert!("vmware".parse::<CloudProviderId>().is_err());
    }

    #[test]
    fn yaml_document_uses_camel_case() {
        let yaml = r#"
apiVersion: kops.k8s.io/v1alpha2
kind: Cluster
metadata:
  name: scw.example.com
spec:
  kubernetesVersion: 1.26.4
  cloudProvider: scaleway
  configStore:
    base: s3://state/scw.example.com
  api:
    loadBalancer:
      type: Public
  etcdClusters:
  - name: main
    members:
    - name: a
      instanceGroup: control-plane-fr-par-1
"#;
        let c: Cluster = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.cluster_name(), "scw.example.com");
        assert_eq!(c.spec.cloud_provider, Some(CloudProviderId::Scaleway));
        assert_eq!(
            c.spec.config_store.base.as_deref(),
            Some("s3://state/scw.example.com")
        );
        assert_eq!(c.spec.etcd_clusters[0].members.len(), 1);
        assert_eq!(c.kubernetes_version().unwrap().minor, 26);
    }

    #[test]
    fn missing_version_is_invalid_input() {
        let err = cluster("x").kubernetes_version().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }
}
