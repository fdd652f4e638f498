//! Scaleway model builders
//!
//! Builders run in the order [`model_builders`] returns them: the network
//! stack first, so later builders can reference the private network.

mod api_load_balancer;
mod dns;
mod instances;
mod network;
mod ssh_key;

use std::sync::Arc;

use keel_cloud::scaleway::tasks::PrivateNetworkTask;
use keel_cloud::ScwCloudHandle;
use keel_common::{Error, Result};
use keel_tasks::{TaskKey, TaskMapBuilder, TaskRef};

use crate::bootstrap_script::BootstrapScriptBuilder;
use crate::builder::ModelBuilder;
use crate::context::ModelBuilderContext;

pub use api_load_balancer::ApiLoadBalancerModelBuilder;
pub use dns::DnsModelBuilder;
pub use instances::InstanceModelBuilder;
pub use network::{NetworkModelBuilder, DEFAULT_NETWORK_CIDR};
pub use ssh_key::SshKeyModelBuilder;

/// Every Scaleway builder, in build order
pub fn model_builders(bootstrap: Arc<BootstrapScriptBuilder>) -> Vec<Box<dyn ModelBuilder<ScwCloudHandle>>> {
    vec![
        Box::new(NetworkModelBuilder),
        Box::new(ApiLoadBalancerModelBuilder),
        Box::new(SshKeyModelBuilder),
        Box::new(InstanceModelBuilder::new(bootstrap)),
        Box::new(DnsModelBuilder),
    ]
}

/// Cluster tags as Scaleway `key=value` strings
fn cluster_tags(ctx: &ModelBuilderContext) -> Vec<String> {
    ctx.cluster_tags().iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Reference to the cluster's private network ID
fn private_network_ref(
    ctx: &ModelBuilderContext,
    tasks: &TaskMapBuilder<ScwCloudHandle>,
) -> Result<TaskRef<String>> {
    let key = TaskKey::new("PrivateNetwork", ctx.cluster_name());
    let pn = tasks.get_as::<PrivateNetworkTask>(&key).ok_or_else(|| {
        Error::precondition(format!("{key} must be built before the tasks that attach to it"))
    })?;
    Ok(TaskRef::new(key, &pn.id))
}
