//! Scaleway reconcile tasks
//!
//! Every task runs against [`ScwCloudHandle`](super::ScwCloudHandle). IDs and
//! addresses learned while running are published through
//! [`Output`](keel_tasks::Output) cells so dependents can reference them.
//!
//! ```text
//! Vpc ─► PrivateNetwork ─┬─► GatewayNetwork ◄─ Gateway
//!                        │        ▲
//!                        │   DhcpConfig
//!                        ├─► LoadBalancer ─┐
//! SshKey ────────────────┴─────────────────┴─► Instance ─► PrivateNic
//!                                                   └────► DnsRecord (control-plane IPs)
//! ```

pub mod dhcp_config;
pub mod dns_record;
pub mod gateway;
pub mod gateway_network;
pub mod instance;
pub mod load_balancer;
pub mod private_network;
pub mod private_nic;
pub mod ssh_key;
pub mod vpc;

pub use dhcp_config::DhcpConfigTask;
pub use dns_record::{DnsRecordTask, PLACEHOLDER_IP, PLACEHOLDER_TTL};
pub use gateway::{GatewayTask, DEFAULT_GATEWAY_TYPE};
pub use gateway_network::GatewayNetworkTask;
pub use instance::{bootstrap_server, unique_server_name, Instance, ServerDeletion, USER_DATA_KEY};
pub use load_balancer::{LoadBalancerTask, DEFAULT_LB_TYPE};
pub use private_network::PrivateNetworkTask;
pub use private_nic::PrivateNic;
pub use ssh_key::{openssh_fingerprint, SshKeyTask};
pub use vpc::VpcTask;

/// Fields no network object may change once created
pub(crate) const IMMUTABLE_FIELDS: &[&str] = &["id", "zone", "region", "name"];

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use keel_common::api::{Cluster, ClusterSpec};
    use keel_tasks::{ApiTarget, Context, DryRunTarget, Target};

    use crate::scaleway::testing::FakeScwCloud;
    use crate::scaleway::{ScwCloudHandle, ScwContext};

    pub const CLUSTER: &str = "demo.example.com";

    pub fn context(cloud: &Arc<FakeScwCloud>, target: Arc<dyn Target>) -> ScwContext {
        let handle: ScwCloudHandle = cloud.clone();
        Context::new(handle, target, Arc::new(Cluster::new(CLUSTER, ClusterSpec::default())))
    }

    pub fn api(cloud: &Arc<FakeScwCloud>) -> ScwContext {
        context(cloud, Arc::new(ApiTarget::new()))
    }

    pub fn dry_run(cloud: &Arc<FakeScwCloud>) -> (ScwContext, Arc<DryRunTarget>) {
        let target = Arc::new(DryRunTarget::new(true));
        (context(cloud, target.clone()), target)
    }
}
