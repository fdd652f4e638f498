//! Cluster API documents: Cluster, InstanceGroup and their component blocks

pub mod cluster;
pub mod components;
pub mod instance_group;
pub mod networking;

pub use cluster::{
    ApiSpec, AssetsSpec, CloudProviderId, Cluster, ClusterSpec, ConfigStoreSpec, DnsAccessSpec,
    EtcdClusterSpec, EtcdMemberSpec, LoadBalancerAccessSpec, LoadBalancerType, GOSSIP_SUFFIX,
};
pub use components::{
    parse_duration, CloudConfiguration, ClusterAutoscalerConfig, ContainerdConfig, CsiDriverSpec,
    KubeApiServerConfig, KubeControllerManagerConfig, KubeDnsConfig, KubeProxyConfig,
    KubeSchedulerConfig, KubeletConfigSpec, LeaderElectionConfiguration, RuncConfig,
};
pub use instance_group::{InstanceGroup, InstanceGroupRole, InstanceGroupSpec};
pub use networking::{
    ClusterSubnetSpec, CniProviderSpec, DnsType, NetworkingSpec, SubnetType, TopologySpec,
};
