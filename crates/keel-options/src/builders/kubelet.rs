use std::sync::Arc;

use serde_json::Value;

use keel_common::api::{CloudProviderId, ClusterSpec, KubeletConfigSpec};
use keel_common::{Error, Result};

use crate::builder::SpecOptionsBuilder;
use crate::context::OptionsContext;

/// Hard eviction thresholds
pub const EVICTION_HARD: &str =
    "memory.available<100Mi,nodefs.available<10%,nodefs.inodesFree<5%,imagefs.available<10%,imagefs.inodesFree<5%";

const PAUSE_IMAGE: &str = "registry.k8s.io/pause:3.9";
const POD_MANIFEST_PATH: &str = "/etc/kubernetes/manifests";

/// Kubelet flags for every node, and the control-plane variant
#[derive(Debug)]
pub struct KubeletOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl KubeletOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

fn hostname_override(cloud: Option<CloudProviderId>) -> Option<&'static str> {
    match cloud? {
        CloudProviderId::Aws => Some("@aws"),
        CloudProviderId::DigitalOcean => Some("@digitalocean"),
        CloudProviderId::AliCloud => Some("@alicloud"),
        _ => None,
    }
}

impl SpecOptionsBuilder for KubeletOptionsBuilder {
    fn name(&self) -> &'static str {
        "kubelet"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let network_plugin = if spec.networking.uses_cni() {
            Some("cni")
        } else if spec.networking.uses_gce_ip_alias() || spec.networking.uses_kubenet() {
            Some("kubenet")
        } else {
            None
        };
        let cloud = spec.cloud_provider;
        let cluster_dns = spec.kube_dns.as_ref().and_then(|d| d.server_ip.clone());
        let cluster_domain = spec.cluster_dns_domain.clone();

        let kubelet = spec.kubelet.get_or_insert_with(KubeletConfigSpec::default);
        if kubelet.network_plugin_name.is_none() {
            kubelet.network_plugin_name = network_plugin.map(str::to_string);
        }
        if kubelet.hostname_override.is_none() {
            kubelet.hostname_override = hostname_override(cloud).map(str::to_string);
        }
        kubelet.eviction_hard.get_or_insert_with(|| EVICTION_HARD.to_string());
        if kubelet.cluster_dns.is_none() {
            kubelet.cluster_dns = cluster_dns;
        }
        if kubelet.cluster_domain.is_none() {
            kubelet.cluster_domain = cluster_domain;
        }
        kubelet.cgroup_driver.get_or_insert_with(|| "systemd".to_string());
        if kubelet.pod_infra_container_image.is_none() {
            kubelet.pod_infra_container_image = Some(self.ctx.remap_image(PAUSE_IMAGE)?);
        }
        kubelet.anonymous_auth.get_or_insert(false);
        kubelet.pod_manifest_path.get_or_insert_with(|| POD_MANIFEST_PATH.to_string());
        if cloud.is_some() {
            kubelet.cloud_provider.get_or_insert_with(|| "external".to_string());
        }

        let base = kubelet.clone();
        let control_plane = spec.control_plane_kubelet.take().unwrap_or_default();
        let mut merged = fill_unset(&control_plane, &base)?;
        merged.register_schedulable.get_or_insert(false);
        spec.control_plane_kubelet = Some(merged);
        Ok(())
    }
}

/// `overlay` with every unset field taken from `base`
fn fill_unset(overlay: &KubeletConfigSpec, base: &KubeletConfigSpec) -> Result<KubeletConfigSpec> {
    let Value::Object(mut fields) = serde_json::to_value(overlay)? else {
        return Err(Error::serialization_for("kubelet config", "not an object"));
    };
    if let Value::Object(defaults) = serde_json::to_value(base)? {
        for (key, value) in defaults {
            fields.entry(key).or_insert(value);
        }
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}
