use keel_common::api::ClusterSpec;
use keel_common::Result;

use crate::builder::SpecOptionsBuilder;

/// Default service CIDR
pub const DEFAULT_SERVICE_CIDR: &str = "100.64.0.0/13";
/// Default non-masquerade CIDR
pub const DEFAULT_NON_MASQUERADE_CIDR: &str = "100.64.0.0/10";
/// Default pod CIDR
pub const DEFAULT_POD_CIDR: &str = "100.96.0.0/11";

/// Cluster address ranges
#[derive(Debug, Default)]
pub struct NetworkingOptionsBuilder;

impl SpecOptionsBuilder for NetworkingOptionsBuilder {
    fn name(&self) -> &'static str {
        "networking"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let net = &mut spec.networking;
        net.non_masquerade_cidr
            .get_or_insert_with(|| DEFAULT_NON_MASQUERADE_CIDR.to_string());
        if net.is_ipv6_only() {
            return Ok(());
        }
        net.service_cluster_ip_range
            .get_or_insert_with(|| DEFAULT_SERVICE_CIDR.to_string());
        net.pod_cidr.get_or_insert_with(|| DEFAULT_POD_CIDR.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_defaults() {
        let mut spec = ClusterSpec::default();
        NetworkingOptionsBuilder.build_options(&mut spec).unwrap();
        assert_eq!(spec.networking.service_cluster_ip_range.as_deref(), Some(DEFAULT_SERVICE_CIDR));
        assert_eq!(spec.networking.pod_cidr.as_deref(), Some(DEFAULT_POD_CIDR));
    }

    #[test]
    fn ipv6_ranges_are_not_invented() {
        let mut spec = ClusterSpec::default();
        spec.networking.non_masquerade_cidr = Some("::/0".into());
        NetworkingOptionsBuilder.build_options(&mut spec).unwrap();
        assert!(spec.networking.service_cluster_ip_range.is_none());
        assert!(spec.networking.pod_cidr.is_none());
    }
}
