//! Scaleway objects as the tasks see them

use std::fmt;

use serde::{Deserialize, Serialize};

/// An instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Server ID
    pub id: String,
    /// Server name
    pub name: String,
    /// Zone (`fr-par-1`)
    pub zone: String,
    /// Commercial type (`DEV1-M`)
    pub commercial_type: String,
    /// Boot image ID
    pub image_id: String,
    /// Tags
    pub tags: Vec<String>,
    /// Power state
    pub state: ServerState,
    /// Private IPv4 address
    pub private_ip: Option<String>,
    /// Public IPv4 address
    pub public_ip: Option<String>,
    /// IPv6 address
    pub ipv6_address: Option<String>,
    /// Private networks the server has a NIC in
    pub private_network_ids: Vec<String>,
    /// Attached volume IDs
    pub volume_ids: Vec<String>,
}

/// Power state of a server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Powered off
    #[default]
    Stopped,
    /// Booting
    Starting,
    /// Running
    Running,
    /// Shutting down
    Stopping,
    /// Locked by the provider
    Locked,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Locked => "locked",
        })
    }
}

/// Power actions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerAction {
    /// Boot the server
    PowerOn,
    /// Stop the server
    PowerOff,
}

/// Parameters of a new server
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateServerRequest {
    /// Zone
    pub zone: String,
    /// Server name
    pub name: String,
    /// Commercial type
    pub commercial_type: String,
    /// Boot image ID
    pub image_id: String,
    /// Tags
    pub tags: Vec<String>,
    /// Root volume size in GB
    pub root_volume_size_gb: Option<i32>,
}

/// Objects carrying tags
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaggedResource {
    /// Instance
    Server,
    /// Load balancer
    LoadBalancer,
    /// VPC
    Vpc,
    /// Private network
    PrivateNetwork,
    /// Public gateway
    Gateway,
}

/// A load balancer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// ID
    pub id: String,
    /// Name
    pub name: String,
    /// Zone
    pub zone: String,
    /// Description
    pub description: String,
    /// Offer (`LB-S`)
    pub lb_type: String,
    /// Tags
    pub tags: Vec<String>,
    /// Frontend IP addresses
    pub ip_addresses: Vec<String>,
    /// Attached private networks
    pub private_network_ids: Vec<String>,
}

/// Parameters of a new load balancer
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateLoadBalancerRequest {
    /// Zone
    pub zone: String,
    /// Name
    pub name: String,
    /// Description
    pub description: String,
    /// Offer
    pub lb_type: String,
    /// Tags
    pub tags: Vec<String>,
    /// Private network to attach, if any
    pub private_network_id: Option<String>,
}

/// A DNS record set entry
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Record ID
    pub id: String,
    /// Name relative to the zone (empty for the apex)
    pub name: String,
    /// Record type (`A`, `AAAA`)
    pub record_type: String,
    /// Record value
    pub data: String,
    /// TTL in seconds
    pub ttl: u32,
}

/// A VPC
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vpc {
    /// ID
    pub id: String,
    /// Name
    pub name: String,
    /// Region
    pub region: String,
    /// Tags
    pub tags: Vec<String>,
}

/// A private network inside a VPC
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivateNetwork {
    /// ID
    pub id: String,
    /// Name
    pub name: String,
    /// Region
    pub region: String,
    /// Owning VPC
    pub vpc_id: String,
    /// IPv4 subnets
    pub subnets: Vec<String>,
    /// Tags
    pub tags: Vec<String>,
}

/// Parameters of a new private network
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreatePrivateNetworkRequest {
    /// Region
    pub region: String,
    /// Name
    pub name: String,
    /// Owning VPC
    pub vpc_id: String,
    /// IPv4 subnet, provider-chosen when None
    pub subnet: Option<String>,
    /// Tags
    pub tags: Vec<String>,
}

/// DHCP settings served by a public gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DhcpConfig {
    /// ID
    pub id: String,
    /// Zone
    pub zone: String,
    /// Subnet served
    pub subnet: String,
    /// Address of the gateway inside the subnet
    pub address: Option<String>,
}

/// A public gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    /// ID
    pub id: String,
    /// Name
    pub name: String,
    /// Zone
    pub zone: String,
    /// Offer (`VPC-GW-S`)
    pub gateway_type: String,
    /// Tags
    pub tags: Vec<String>,
    /// SSH bastion enabled
    pub bastion_enabled: bool,
    /// Public IP
    pub public_ip: Option<String>,
}

/// Parameters of a new gateway
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateGatewayRequest {
    /// Zone
    pub zone: String,
    /// Name
    pub name: String,
    /// Offer
    pub gateway_type: String,
    /// Tags
    pub tags: Vec<String>,
    /// Enable the SSH bastion
    pub bastion_enabled: bool,
}

/// The link between a gateway and a private network
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayNetwork {
    /// ID
    pub id: String,
    /// Zone
    pub zone: String,
    /// Gateway
    pub gateway_id: String,
    /// Private network
    pub private_network_id: String,
    /// DHCP configuration
    pub dhcp_id: Option<String>,
    /// NAT outbound traffic
    pub enable_masquerade: bool,
}

/// Parameters of a new gateway network
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateGatewayNetworkRequest {
    /// Zone
    pub zone: String,
    /// Gateway
    pub gateway_id: String,
    /// Private network
    pub private_network_id: String,
    /// DHCP configuration
    pub dhcp_id: Option<String>,
    /// NAT outbound traffic
    pub enable_masquerade: bool,
}

/// An SSH key registered with the project
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SshKey {
    /// ID
    pub id: String,
    /// Name
    pub name: String,
    /// Public key as uploaded
    pub public_key: String,
    /// Fingerprint as reported by the provider (`256 MD5:.. (ssh-ed25519)`)
    pub fingerprint: String,
}
