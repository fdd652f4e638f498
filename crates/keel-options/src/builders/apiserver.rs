use std::sync::Arc;

use keel_common::api::{CloudProviderId, ClusterSpec, KubeApiServerConfig};
use keel_common::{Error, Result};

use super::component_image;
use crate::builder::SpecOptionsBuilder;
use crate::context::OptionsContext;

/// Admission plugins enabled when the user names none
pub const DEFAULT_ADMISSION_PLUGINS: &[&str] = &[
    "NamespaceLifecycle",
    "LimitRanger",
    "ServiceAccount",
    "DefaultStorageClass",
    "DefaultTolerationSeconds",
    "MutatingAdmissionWebhook",
    "ValidatingAdmissionWebhook",
    "NodeRestriction",
    "ResourceQuota",
];

const ETCD_MAIN_SERVER: &str = "https://127.0.0.1:4001";
const ETCD_EVENTS_OVERRIDE: &str = "/events#https://127.0.0.1:4002";

/// kube-apiserver flags
#[derive(Debug)]
pub struct KubeApiServerOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl KubeApiServerOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

impl SpecOptionsBuilder for KubeApiServerOptionsBuilder {
    fn name(&self) -> &'static str {
        "kube-apiserver"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let ipv6 = spec.networking.is_ipv6_only();
        let service_range = spec.networking.service_cluster_ip_range.clone();
        let cloud = spec.cloud_provider;
        let storage_backend = match spec.etcd_clusters.first().and_then(|e| e.version.as_deref()) {
            Some(version) => Some(storage_backend_for(version)?),
            None => None,
        };
        let has_events = spec.etcd_clusters.iter().any(|e| e.name == "events");

        let api = spec.kube_api_server.get_or_insert_with(KubeApiServerConfig::default);

        if api.enable_admission_plugins.is_empty() {
            api.enable_admission_plugins = DEFAULT_ADMISSION_PLUGINS.iter().map(|p| p.to_string()).collect();
        }
        for plugin in &api.append_admission_plugins {
            if !api.enable_admission_plugins.contains(plugin) {
                api.enable_admission_plugins.push(plugin.clone());
            }
        }

        api.anonymous_auth.get_or_insert(false);
        // the insecure port is never served
        api.insecure_bind_address = Some(String::new());
        if api.storage_backend.is_none() {
            api.storage_backend = storage_backend;
        }
        api.bind_address
            .get_or_insert_with(|| if ipv6 { "::" } else { "0.0.0.0" }.to_string());
        api.secure_port.get_or_insert(443);
        if api.service_cluster_ip_range.is_none() {
            api.service_cluster_ip_range = service_range;
        }
        if api.etcd_servers.is_empty() {
            api.etcd_servers = vec![ETCD_MAIN_SERVER.to_string()];
        }
        if api.etcd_servers_overrides.is_empty() && has_events {
            api.etcd_servers_overrides = vec![ETCD_EVENTS_OVERRIDE.to_string()];
        }

        if self.ctx.is_kubernetes_lt("1.23") {
            let gate = match cloud {
                Some(CloudProviderId::Aws) => Some("CSIMigrationAWS"),
                Some(CloudProviderId::Gce) => Some("CSIMigrationGCE"),
                _ => None,
            };
            if let Some(gate) = gate {
                api.feature_gates
                    .entry(gate.to_string())
                    .or_insert_with(|| "true".to_string());
            }
        }

        api.authorization_mode.get_or_insert_with(|| "Node,RBAC".to_string());
        api.allow_privileged.get_or_insert(true);
        api.log_level.get_or_insert(2);
        if cloud.is_some() {
            api.cloud_provider.get_or_insert_with(|| "external".to_string());
        }
        if api.image.is_none() {
            api.image = Some(component_image(
                &self.ctx,
                "kube-apiserver",
                self.ctx.control_plane_version(),
            )?);
        }
        Ok(())
    }
}

fn storage_backend_for(etcd_version: &str) -> Result<String> {
    let major = etcd_version
        .trim_start_matches('v')
        .split('.')
        .next()
        .filter(|m| !m.is_empty() && m.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| {
            Error::invalid_field("spec.etcdClusters[0].version", format!("unexpected etcd version {etcd_version:?}"))
        })?;
    Ok(format!("etcd{major}"))
}
