//! What every model builder sees: the cluster, its groups and derived names

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_common::api::{
    Cluster, CloudProviderId, InstanceGroup, InstanceGroupRole, LoadBalancerAccessSpec, SubnetType,
};
use keel_common::{Error, Result, TAG_CLUSTER_NAME};
use keel_tasks::Lifecycle;

/// Read-only view of a cluster for model builders
///
/// ```rust,ignore
/// let ctx = ModelBuilderContext::new(cluster, instance_groups)
///     .with_ssh_public_key(key)
///     .with_lifecycle(Lifecycle::Sync);
/// ```
#[derive(Clone, Debug)]
pub struct ModelBuilderContext {
    cluster: Arc<Cluster>,
    instance_groups: Vec<InstanceGroup>,
    ssh_public_key: Option<String>,
    lifecycle: Lifecycle,
}

impl ModelBuilderContext {
    /// Context for `cluster` and its `instance_groups`
    pub fn new(cluster: Arc<Cluster>, instance_groups: Vec<InstanceGroup>) -> Self {
        Self {
            cluster,
            instance_groups,
            ssh_public_key: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    /// Public key installed on every server
    pub fn with_ssh_public_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_public_key = Some(key.into());
        self
    }

    /// Lifecycle given to emitted tasks
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// The cluster
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// The cluster name
    pub fn cluster_name(&self) -> &str {
        self.cluster.cluster_name()
    }

    /// Every instance group
    pub fn instance_groups(&self) -> &[InstanceGroup] {
        &self.instance_groups
    }

    /// Groups running the control plane
    pub fn control_plane_groups(&self) -> impl Iterator<Item = &InstanceGroup> {
        self.instance_groups.iter().filter(|ig| ig.is_control_plane())
    }

    /// True if some group has `role`
    pub fn has_role(&self, role: InstanceGroupRole) -> bool {
        self.instance_groups.iter().any(|ig| ig.spec.role == role)
    }

    /// SSH public key, when one was supplied
    pub fn ssh_public_key(&self) -> Option<&str> {
        self.ssh_public_key.as_deref()
    }

    /// Lifecycle for emitted tasks
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Cloud the cluster runs on
    pub fn cloud_provider(&self) -> Result<CloudProviderId> {
        self.cluster
            .spec
            .cloud_provider
            .ok_or_else(|| Error::required_field("spec.cloudProvider"))
    }

    /// Name clients use for the API
    pub fn api_name(&self) -> String {
        self.cluster.api_name()
    }

    /// Name nodes use for the API
    pub fn api_internal_name(&self) -> String {
        self.cluster.api_internal_name()
    }

    /// Name nodes use for kops-controller
    pub fn kops_controller_internal_name(&self) -> String {
        self.cluster.kops_controller_internal_name()
    }

    /// Cluster name usable where dots are not (`demo.example.com` → `demo-example-com`)
    pub fn safe_cluster_name(&self) -> String {
        self.cluster_name().replace('.', "-")
    }

    /// Tags every cloud object of the cluster carries
    pub fn cluster_tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(TAG_CLUSTER_NAME.to_string(), self.cluster_name().to_string())])
    }

    /// Load balancer fronting the API, if any
    pub fn api_load_balancer(&self) -> Option<&LoadBalancerAccessSpec> {
        self.cluster.spec.api.load_balancer.as_ref()
    }

    /// True if a load balancer fronts the API
    pub fn use_load_balancer_for_api(&self) -> bool {
        self.api_load_balancer().is_some()
    }

    /// True if nodes also reach the API through the load balancer
    pub fn use_load_balancer_for_internal_api(&self) -> bool {
        self.api_load_balancer()
            .and_then(|lb| lb.use_for_internal_api)
            .unwrap_or(false)
    }

    /// True if the cluster relies on gossip instead of DNS
    pub fn use_gossip_dns(&self) -> bool {
        self.cluster.is_gossip()
    }

    /// True if no DNS records should be managed
    pub fn skip_dns(&self) -> bool {
        self.use_gossip_dns() || self.cluster.uses_none_dns()
    }

    /// True if pods are IPv6-only
    pub fn is_ipv6_only(&self) -> bool {
        self.cluster.spec.networking.is_ipv6_only()
    }

    /// True if some subnet egresses through a gateway
    pub fn is_private_topology(&self) -> bool {
        self.cluster
            .spec
            .networking
            .subnets
            .iter()
            .any(|s| s.subnet_type == SubnetType::Private)
    }

    /// DNS zone records are published in
    pub fn dns_zone(&self) -> Result<&str> {
        self.cluster
            .spec
            .dns_zone
            .as_deref()
            .filter(|z| !z.is_empty())
            .ok_or_else(|| Error::required_field("spec.dnsZone"))
    }

    /// Zone cluster-wide objects live in: the first subnet zone, else the
    /// first zone of any group
    pub fn primary_zone(&self) -> Result<&str> {
        self.cluster
            .spec
            .networking
            .subnets
            .iter()
            .find_map(|s| s.zone.as_deref())
            .or_else(|| self.instance_groups.iter().find_map(|ig| ig.spec.zones.first().map(String::as_str)))
            .ok_or_else(|| Error::invalid_field("spec.subnets", "no zone found for the cluster"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::api::{
        ApiSpec, ClusterSpec, ClusterSubnetSpec, DnsType, InstanceGroupSpec, NetworkingSpec,
        TopologySpec,
    };

    fn group(name: &str, role: InstanceGroupRole, zone: &str) -> InstanceGroup {
        InstanceGroup::new(
            name,
            InstanceGroupSpec {
                role,
                zones: vec![zone.to_string()],
                ..Default::default()
            },
        )
    }

    fn context(name: &str, spec: ClusterSpec) -> ModelBuilderContext {
        ModelBuilderContext::new(
            Arc::new(Cluster::new(name, spec)),
            vec![
                group("control-plane-fr-par-1", InstanceGroupRole::ControlPlane, "fr-par-1"),
                group("nodes-fr-par-2", InstanceGroupRole::Node, "fr-par-2"),
            ],
        )
    }

    #[test]
    fn names_derive_from_the_cluster() {
        let ctx = context("demo.example.com", ClusterSpec::default());
        assert_eq!(ctx.api_name(), "api.demo.example.com");
        assert_eq!(ctx.api_internal_name(), "api.internal.demo.example.com");
        assert_eq!(ctx.kops_controller_internal_name(), "kops-controller.internal.demo.example.com");
        assert_eq!(ctx.safe_cluster_name(), "demo-example-com");
        assert_eq!(
            ctx.cluster_tags(),
            BTreeMap::from([(TAG_CLUSTER_NAME.to_string(), "demo.example.com".to_string())])
        );
        assert_eq!(ctx.control_plane_groups().count(), 1);
        assert!(!ctx.has_role(InstanceGroupRole::Bastion));
    }

    #[test]
    fn dns_is_skipped_for_gossip_and_none() {
        assert!(context("demo.k8s.local", ClusterSpec::default()).skip_dns());

        let none = ClusterSpec {
            networking: NetworkingSpec {
                topology: Some(TopologySpec { dns: DnsType::None }),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(context("demo.example.com", none).skip_dns());
        assert!(!context("demo.example.com", ClusterSpec::default()).skip_dns());
    }

    #[test]
    fn internal_api_uses_the_load_balancer_only_when_asked() {
        let mut spec = ClusterSpec {
            api: ApiSpec {
                load_balancer: Some(LoadBalancerAccessSpec::default()),
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = context("demo.example.com", spec.clone());
        assert!(ctx.use_load_balancer_for_api());
        assert!(!ctx.use_load_balancer_for_internal_api());

        if let Some(lb) = spec.api.load_balancer.as_mut() {
            lb.use_for_internal_api = Some(true);
        }
        assert!(context("demo.example.com", spec).use_load_balancer_for_internal_api());
    }

    #[test]
    fn primary_zone_prefers_subnets() {
        let ctx = context("demo.example.com", ClusterSpec::default());
        assert_eq!(ctx.primary_zone().unwrap(), "fr-par-1");

        let spec = ClusterSpec {
            networking: NetworkingSpec {
                subnets: vec![ClusterSubnetSpec {
                    name: "fr-par-2".into(),
                    zone: Some("fr-par-2".into()),
                    subnet_type: SubnetType::Private,
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = context("demo.example.com", spec);
        assert_eq!(ctx.primary_zone().unwrap(), "fr-par-2");
        assert!(ctx.is_private_topology());
    }

    #[test]
    fn missing_dns_zone_is_reported() {
        let err = context("demo.example.com", ClusterSpec::default()).dns_zone().unwrap_err();
        assert!(err.to_string().contains("spec.dnsZone"));
    }
}
