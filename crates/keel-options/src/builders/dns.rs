use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use keel_common::api::{ClusterSpec, KubeDnsConfig};
use keel_common::{Error, Result};

use crate::builder::SpecOptionsBuilder;

/// Offset of the DNS service inside the service range
const DNS_SERVICE_OFFSET: u128 = 10;

/// Address `n` of `cidr`, counting the network address as 0
pub fn nth_address(cidr: &str, n: u128) -> Result<IpAddr> {
    let invalid = |msg: &str| Error::invalid_input(format!("invalid CIDR {cidr:?}: {msg}"));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(|| invalid("missing prefix length"))?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid("bad address"))?;

    match addr {
        IpAddr::V4(v4) => {
            if prefix > 32 {
                return Err(invalid("prefix longer than 32"));
            }
            let size = 1u128 << (32 - prefix);
            if n >= size {
                return Err(invalid("range too small"));
            }
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            let base = u32::from(v4) & mask;
            Ok(IpAddr::V4(Ipv4Addr::from(base + n as u32)))
        }
        IpAddr::V6(v6) => {
            if prefix > 128 {
                return Err(invalid("prefix longer than 128"));
            }
            let host_bits = 128 - prefix;
            if host_bits < 128 && n >= (1u128 << host_bits) {
                return Err(invalid("range too small"));
            }
            let mask = if prefix == 0 { 0 } else { u128::MAX << host_bits };
            let base = u128::from(v6) & mask;
            Ok(IpAddr::V6(Ipv6Addr::from(base + n)))
        }
    }
}

/// Cluster DNS service
#[derive(Debug, Default)]
pub struct KubeDnsOptionsBuilder;

impl SpecOptionsBuilder for KubeDnsOptionsBuilder {
    fn name(&self) -> &'static str {
        "kube-dns"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let service_range = spec.networking.service_cluster_ip_range.clone();
        let domain = spec.cluster_dns_domain.clone();
        let dns = spec.kube_dns.get_or_insert_with(KubeDnsConfig::default);

        dns.provider.get_or_insert_with(|| "CoreDNS".to_string());
        if dns.server_ip.is_none() {
            if let Some(range) = service_range {
                dns.server_ip = Some(nth_address(&range, DNS_SERVICE_OFFSET)?.to_string());
            }
        }
        if dns.domain.is_none() {
            dns.domain = domain;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nth_address_in_both_families() {
        assert_eq!(nth_address("100.64.0.0/13", 10).unwrap().to_string(), "100.64.0.10");
        assert_eq!(nth_address("10.0.3.7/24", 10).unwrap().to_string(), "10.0.3.10");
        assert_eq!(nth_address("fd00:10:96::/108", 10).unwrap().to_string(), "fd00:10:96::a");
        assert!(nth_address("10.0.0.0/29", 10).is_err());
        assert!(nth_address("10.0.0.0", 10).is_err());
        assert!(nth_address("10.0.0.0/33", 1).is_err());
    }

    #[test]
    fn coredns_on_the_tenth_service_address() {
        let mut spec = ClusterSpec::default();
        spec.networking.service_cluster_ip_range = Some("100.64.0.0/13".into());
        spec.cluster_dns_domain = Some("cluster.local".into());
        KubeDnsOptionsBuilder.build_options(&mut spec).unwrap();
        let dns = spec.kube_dns.unwrap();
        assert_eq!(dns.provider.as_deref(), Some("CoreDNS"));
        assert_eq!(dns.server_ip.as_deref(), Some("100.64.0.10"));
        assert_eq!(dns.domain.as_deref(), Some("cluster.local"));
    }
}
