use keel_cloud::scaleway::config::region_of_zone;
use keel_cloud::scaleway::tasks::{
    DhcpConfigTask, GatewayNetworkTask, GatewayTask, PrivateNetworkTask, VpcTask, DEFAULT_GATEWAY_TYPE,
};
use keel_cloud::ScwCloudHandle;
use keel_common::Result;
use keel_options::builders::nth_address;
use keel_tasks::{Output, TaskKey, TaskMapBuilder, TaskRef};

use super::cluster_tags;
use crate::builder::ModelBuilder;
use crate::context::ModelBuilderContext;

/// Subnet of the private network when the cluster sets no network CIDR
pub const DEFAULT_NETWORK_CIDR: &str = "192.168.1.0/24";

/// VPC and private network, plus a public gateway with DHCP when some
/// subnet is private
///
/// Gateways are created with SSH bastion enabled so private servers stay
/// reachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkModelBuilder;

impl ModelBuilder<ScwCloudHandle> for NetworkModelBuilder {
    fn name(&self) -> &'static str {
        "scaleway-network"
    }

    fn build(&self, ctx: &ModelBuilderContext, tasks: &mut TaskMapBuilder<ScwCloudHandle>) -> Result<()> {
        let name = ctx.cluster_name().to_string();
        let zone = ctx.primary_zone()?.to_string();
        let region = region_of_zone(&zone)?.to_string();
        let subnet = ctx
            .cluster()
            .spec
            .networking
            .network_cidr
            .clone()
            .unwrap_or_else(|| DEFAULT_NETWORK_CIDR.to_string());
        let tags = cluster_tags(ctx);

        let vpc = VpcTask {
            name: name.clone(),
            id: Output::new(),
            region: region.clone(),
            tags: tags.clone(),
            lifecycle: ctx.lifecycle(),
        };
        let pn = PrivateNetworkTask {
            name: name.clone(),
            id: Output::new(),
            region,
            vpc: TaskRef::new(TaskKey::new("VPC", &name), &vpc.id),
            ipv4_subnet: Some(subnet.clone()),
            tags: tags.clone(),
            lifecycle: ctx.lifecycle(),
        };

        if ctx.is_private_topology() {
            let dhcp = DhcpConfigTask {
                name: name.clone(),
                id: Output::new(),
                zone: zone.clone(),
                address: Some(nth_address(&subnet, 1)?.to_string()),
                subnet,
                lifecycle: ctx.lifecycle(),
            };
            let gateway = GatewayTask {
                name: name.clone(),
                id: Output::new(),
                zone: zone.clone(),
                gateway_type: DEFAULT_GATEWAY_TYPE.to_string(),
                bastion_enabled: true,
                public_ip: Output::new(),
                tags,
                lifecycle: ctx.lifecycle(),
            };
            let gateway_network = GatewayNetworkTask {
                name: name.clone(),
                id: Output::new(),
                zone,
                gateway: TaskRef::new(TaskKey::new("Gateway", &name), &gateway.id),
                private_network: TaskRef::new(TaskKey::new("PrivateNetwork", &name), &pn.id),
                dhcp: TaskRef::new(TaskKey::new("DHCPConfig", &name), &dhcp.id),
                enable_masquerade: true,
                lifecycle: ctx.lifecycle(),
            };
            tasks.add(dhcp)?;
            tasks.add(gateway)?;
            tasks.add(gateway_network)?;
        }

        tasks.add(vpc)?;
        tasks.add(pn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaleway::test_support::{context, spec, CLUSTER};
    use keel_common::api::{ClusterSubnetSpec, SubnetType};

    fn kinds(tasks: TaskMapBuilder<ScwCloudHandle>) -> Vec<String> {
        tasks.build().keys().map(|k| k.kind.clone()).collect()
    }

    #[test]
    fn public_clusters_get_a_vpc_and_private_network() {
        let ctx = context(spec());
        let mut tasks = TaskMapBuilder::new();
        NetworkModelBuilder.build(&ctx, &mut tasks).unwrap();

        let pn = tasks
            .get_as::<PrivateNetworkTask>(&TaskKey::new("PrivateNetwork", CLUSTER))
            .unwrap();
        assert_eq!(pn.region, "fr-par");
        assert_eq!(pn.ipv4_subnet.as_deref(), Some(DEFAULT_NETWORK_CIDR));
        assert_eq!(pn.vpc.key(), &TaskKey::new("VPC", CLUSTER));
        assert_eq!(pn.tags, vec![format!("kops.k8s.io/cluster={CLUSTER}")]);

        let mut kinds = kinds(tasks);
        kinds.sort();
        assert_eq!(kinds, vec!["PrivateNetwork", "VPC"]);
    }

    #[test]
    fn private_subnets_add_a_gateway() {
        let mut spec = spec();
        spec.networking.network_cidr = Some("172.16.8.0/22".into());
        spec.networking.subnets = vec![ClusterSubnetSpec {
            name: "fr-par-1".into(),
            zone: Some("fr-par-1".into()),
            subnet_type: SubnetType::Private,
            ..Default::default()
        }];
        let ctx = context(spec);
        let mut tasks = TaskMapBuilder::new();
        NetworkModelBuilder.build(&ctx, &mut tasks).unwrap();

        let dhcp = tasks
            .get_as::<DhcpConfigTask>(&TaskKey::new("DHCPConfig", CLUSTER))
            .unwrap();
        assert_eq!(dhcp.subnet, "172.16.8.0/22");
        assert_eq!(dhcp.address.as_deref(), Some("172.16.8.1"));

        let gwn = tasks
            .get_as::<GatewayNetworkTask>(&TaskKey::new("GatewayNetwork", CLUSTER))
            .unwrap();
        assert_eq!(gwn.gateway.key(), &TaskKey::new("Gateway", CLUSTER));
        assert_eq!(gwn.dhcp.key(), &TaskKey::new("DHCPConfig", CLUSTER));
        assert!(gwn.enable_masquerade);
        assert_eq!(kinds(tasks).len(), 5);
    }

    #[test]
    fn bad_zones_are_rejected() {
        let mut spec = spec();
        spec.networking.subnets[0].zone = Some("paris".into());
        let mut tasks = TaskMapBuilder::new();
        assert!(NetworkModelBuilder.build(&context(spec), &mut tasks).is_err());
    }
}
