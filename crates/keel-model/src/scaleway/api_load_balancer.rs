use keel_cloud::scaleway::role_tag;
use keel_cloud::scaleway::tasks::{LoadBalancerTask, DEFAULT_LB_TYPE};
use keel_cloud::ScwCloudHandle;
use keel_common::api::{InstanceGroupRole, LoadBalancerType};
use keel_common::{Error, Result};
use keel_tasks::{Output, TaskMapBuilder};

use super::{cluster_tags, private_network_ref};
use crate::builder::ModelBuilder;
use crate::context::ModelBuilderContext;

/// Load balancer in front of the control plane, when the cluster asks for one
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiLoadBalancerModelBuilder;

impl ModelBuilder<ScwCloudHandle> for ApiLoadBalancerModelBuilder {
    fn name(&self) -> &'static str {
        "scaleway-api-load-balancer"
    }

    fn build(&self, ctx: &ModelBuilderContext, tasks: &mut TaskMapBuilder<ScwCloudHandle>) -> Result<()> {
        let Some(spec) = ctx.api_load_balancer() else {
            return Ok(());
        };

        if spec.lb_type == LoadBalancerType::Internal && !ctx.cloud_provider()?.supports_private_networks() {
            return Err(Error::invalid_field(
                "spec.api.loadBalancer.type",
                format!(
                    "internal load balancers are not supported on {}",
                    ctx.cloud_provider()?
                ),
            ));
        }

        let mut tags = cluster_tags(ctx);
        tags.push(role_tag(InstanceGroupRole::ControlPlane));

        let lb = LoadBalancerTask {
            name: format!("api-{}", ctx.safe_cluster_name()),
            id: Output::new(),
            zone: ctx.primary_zone()?.to_string(),
            lb_type: spec.class.clone().unwrap_or_else(|| DEFAULT_LB_TYPE.to_string()),
            description: format!("Load balancer for kops cluster {}", ctx.cluster_name()),
            tags,
            addresses: Output::new(),
            private_network: Some(private_network_ref(ctx, tasks)?),
            for_api_server: !(ctx.use_gossip_dns()
                || ctx.cluster().uses_private_dns()
                || ctx.cluster().uses_none_dns()),
            lifecycle: ctx.lifecycle(),
        };
        tasks.add(lb)
    }
}
