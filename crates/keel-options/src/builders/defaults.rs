use keel_common::api::{
    Cluster, CniProviderSpec, DnsAccessSpec, LoadBalancerAccessSpec, LoadBalancerType,
};
use keel_common::Result;

use crate::builder::ClusterOptionsBuilder;

/// Runs first: fields every later builder reads
#[derive(Debug, Default)]
pub struct DefaultsOptionsBuilder;

impl ClusterOptionsBuilder for DefaultsOptionsBuilder {
    fn name(&self) -> &'static str {
        "defaults"
    }

    fn build_options(&self, cluster: &mut Cluster) -> Result<()> {
        let gossip = cluster.is_gossip();
        let spec = &mut cluster.spec;

        spec.cluster_dns_domain.get_or_insert_with(|| "cluster.local".to_string());
        spec.container_runtime.get_or_insert_with(|| "containerd".to_string());

        if !spec.networking.has_provider() {
            spec.networking.kubenet = Some(CniProviderSpec::default());
        }

        // gossip clusters have nowhere to publish api records
        if spec.api.load_balancer.is_none() && spec.api.dns.is_none() {
            if gossip {
                spec.api.load_balancer = Some(LoadBalancerAccessSpec {
                    lb_type: LoadBalancerType::Public,
                    ..Default::default()
                });
            } else {
                spec.api.dns = Some(DnsAccessSpec {});
            }
        }
        Ok(())
    }
}
