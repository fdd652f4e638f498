//! Networking section of the cluster spec

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Networking configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSpec {
    /// Existing network to reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    /// CIDR of the cluster network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_cidr: Option<String>,
    /// CIDR for Service cluster IPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cluster_ip_range: Option<String>,
    /// CIDR for pod IPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
    /// Traffic outside this CIDR is masqueraded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_masquerade_cidr: Option<String>,
    /// Subnets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<ClusterSubnetSpec>,
    /// Topology (DNS visibility)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologySpec>,

    /// kubenet networking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubenet: Option<CniProviderSpec>,
    /// Externally managed CNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni: Option<CniProviderSpec>,
    /// Cilium
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cilium: Option<CniProviderSpec>,
    /// Calico
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calico: Option<CniProviderSpec>,
    /// Flannel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flannel: Option<CniProviderSpec>,
    /// Kindnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kindnet: Option<CniProviderSpec>,
    /// Amazon VPC CNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amazon_vpc: Option<CniProviderSpec>,
    /// GCE IP-alias networking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gce: Option<CniProviderSpec>,
}

impl NetworkingSpec {
    /// DNS visibility, defaulting to public
    pub fn topology_dns(&self) -> DnsType {
        self.topology.as_ref().map(|t| t.dns).unwrap_or_default()
    }

    /// True when kubenet is selected
    pub fn uses_kubenet(&self) -> bool {
        self.kubenet.is_some()
    }

    /// True when GCE IP aliases provide pod networking
    pub fn uses_gce_ip_alias(&self) -> bool {
        self.gce.is_some()
    }

    /// True when any CNI plugin (not kubenet or GCE) is selected
    pub fn uses_cni(&self) -> bool {
        self.cni.is_some()
            || self.cilium.is_some()
            || self.calico.is_some()
            || self.flannel.is_some()
            || self.kindnet.is_some()
            || self.amazon_vpc.is_some()
    }

    /// True when some networking provider has been chosen
    pub fn has_provider(&self) -> bool {
        self.uses_kubenet() || self.uses_gce_ip_alias() || self.uses_cni()
    }

    /// True when the cluster runs IPv6-only pod networking
    pub fn is_ipv6_only(&self) -> bool {
        self.non_masquerade_cidr
            .as_deref()
            .map(|c| c.contains(':'))
            .unwrap_or(false)
    }
}

/// Per-provider networking options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CniProviderSpec {
    /// Plugin version override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A subnet of the cluster network
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSubnetSpec {
    /// Subnet name
    pub name: String,
    /// Zone hosting the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Subnet CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    /// Subnet role
    #[serde(default, rename = "type")]
    pub subnet_type: SubnetType,
}

/// Role of a subnet
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SubnetType {
    /// Instances get public addresses
    #[default]
    Public,
    /// Instances egress through a gateway
    Private,
    /// Hosts bastions and load balancers
    Utility,
}

/// Topology options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpec {
    /// DNS visibility
    #[serde(default)]
    pub dns: DnsType,
}

/// DNS zone visibility
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DnsType {
    /// Public hosted zone
    #[default]
    Public,
    /// Private hosted zone
    Private,
    /// No DNS provider
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_predicates() {
        let mut n = NetworkingSpec::default();
        assert!(!n.has_provider());
        n.cilium = Some(CniProviderSpec::default());
        assert!(n.uses_cni());
        assert!(!n.uses_kubenet());
        assert!(n.has_provider());
    }

    #[test]
    fn ipv6_only_follows_non_masquerade_cidr() {
        let mut n = NetworkingSpec::default();
        assert!(!n.is_ipv6_only());
        n.non_masquerade_cidr = Some("::/0".to_string());
        assert!(n.is_ipv6_only());
    }
}
