//! Component configuration blocks of the cluster spec
//!
//! Every field is optional; the options pipeline fills in defaults and only
//! touches fields that are still unset.

use std::collections::BTreeMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// containerd configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerdConfig {
    /// containerd version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Socket address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// runc settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runc: Option<RuncConfig>,
    /// Registry mirrors keyed by registry host
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registry_mirrors: BTreeMap<String, Vec<String>>,
}

/// runc configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuncConfig {
    /// runc version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Leader election settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionConfiguration {
    /// Enable leader election
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_elect: Option<bool>,
}

/// kube-apiserver configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeApiServerConfig {
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i32>,
    /// Allow anonymous requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_auth: Option<bool>,
    /// Insecure bind address; always forced empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_bind_address: Option<String>,
    /// Secure bind address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    /// Secure port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<i32>,
    /// Storage backend (`etcd3`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_backend: Option<String>,
    /// Etcd endpoints for the main cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub etcd_servers: Vec<String>,
    /// Etcd endpoints for specific resources (events)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub etcd_servers_overrides: Vec<String>,
    /// Enabled admission plugins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enable_admission_plugins: Vec<String>,
    /// Plugins appended after the defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub append_admission_plugins: Vec<String>,
    /// Service CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cluster_ip_range: Option<String>,
    /// Cloud provider name passed to the binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    /// Allow privileged containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_privileged: Option<bool>,
    /// Authorization mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_mode: Option<String>,
    /// Feature gates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, String>,
}

/// kube-controller-manager configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeControllerManagerConfig {
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Cloud provider name passed to the binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    /// Cluster name used to tag cloud resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// Pod CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,
    /// Allocate per-node pod CIDRs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocate_node_cidrs: Option<bool>,
    /// Program cloud routes for pod CIDRs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure_cloud_routes: Option<bool>,
    /// Leader election
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_election: Option<LeaderElectionConfiguration>,
    /// Attach/detach reconciler period as a duration string (`1m0s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach_detach_reconcile_sync_period: Option<String>,
    /// Verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i32>,
    /// Feature gates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, String>,
}

/// kube-scheduler configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeSchedulerConfig {
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i32>,
    /// Leader election
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_election: Option<LeaderElectionConfiguration>,
    /// Feature gates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, String>,
}

/// kube-proxy configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeProxyConfig {
    /// Run kube-proxy at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Pod CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,
    /// CPU request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    /// Verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i32>,
}

/// Cluster DNS addon configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeDnsConfig {
    /// Provider (`CoreDNS`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Service IP of the DNS server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    /// Cluster domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Upstream nameservers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_nameservers: Vec<String>,
}

/// kubelet configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfigSpec {
    /// Network plugin (`cni` or `kubenet`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_plugin_name: Option<String>,
    /// Hostname override; `@aws`-style sentinels are resolved on the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_override: Option<String>,
    /// Cluster DNS server IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_dns: Option<String>,
    /// Cluster domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,
    /// Hard eviction thresholds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_hard: Option<String>,
    /// cgroup driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup_driver: Option<String>,
    /// Sandbox image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_infra_container_image: Option<String>,
    /// Register the node as schedulable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_schedulable: Option<bool>,
    /// Cloud provider name passed to the binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    /// Allow anonymous requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_auth: Option<bool>,
    /// Static pod manifest directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_manifest_path: Option<String>,
    /// Verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i32>,
    /// Feature gates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, String>,
}

/// Cloud-controller and storage settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfiguration {
    /// Install default storage classes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_storage_classes: Option<bool>,
    /// CSI driver for the cloud's block storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csi_driver: Option<CsiDriverSpec>,
}

/// Block-storage CSI driver
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiDriverSpec {
    /// Deploy the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Driver version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Cluster autoscaler addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAutoscalerConfig {
    /// Deploy the autoscaler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Expander strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expander: Option<String>,
    /// Balance similar node groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_similar_node_groups: Option<bool>,
    /// Scale-down utilization threshold (decimal string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_utilization_threshold: Option<String>,
    /// Skip nodes with local storage on scale-down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_nodes_with_local_storage: Option<bool>,
    /// Delay before new pods trigger a scale-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_pod_scale_up_delay: Option<String>,
}

/// Parse a duration in `1h2m3s` / `500ms` form
pub fn parse_duration(s: &str) -> Result<Duration> {
    let invalid = || Error::invalid_input(format!("invalid duration {s:?}"));
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return Err(invalid()),
        };
        total += value * scale;
        rest = &rest[unit_len..];
    }
    Ok(Duration::from_secs_f64(total))
}
