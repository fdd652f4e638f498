use std::sync::Arc;

use keel_common::api::{ClusterSpec, KubeProxyConfig};
use keel_common::Result;

use super::component_image;
use crate::builder::SpecOptionsBuilder;
use crate::context::OptionsContext;

/// kube-proxy flags; runs on nodes so it follows the node version
#[derive(Debug)]
pub struct KubeProxyOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl KubeProxyOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

impl SpecOptionsBuilder for KubeProxyOptionsBuilder {
    fn name(&self) -> &'static str {
        "kube-proxy"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let pod_cidr = spec.networking.pod_cidr.clone();
        let proxy = spec.kube_proxy.get_or_insert_with(KubeProxyConfig::default);
        if proxy.enabled == Some(false) {
            return Ok(());
        }
        proxy.enabled = Some(true);
        if proxy.image.is_none() {
            proxy.image = Some(component_image(&self.ctx, "kube-proxy", self.ctx.node_version())?);
        }
        if proxy.cluster_cidr.is_none() {
            proxy.cluster_cidr = pod_cidr;
        }
        proxy.cpu_request.get_or_insert_with(|| "100m".to_string());
        Ok(())
    }
}
