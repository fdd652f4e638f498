use std::sync::Arc;

use keel_common::api::ClusterSpec;
use keel_common::version::KubernetesVersion;
use keel_common::Result;

use crate::builder::SpecOptionsBuilder;
use crate::context::OptionsContext;

const AUTOSCALER_IMAGE: &str = "registry.k8s.io/autoscaling/cluster-autoscaler";

fn autoscaler_tag(version: &KubernetesVersion) -> &'static str {
    if version.is_gte("1.28") {
        "v1.28.0"
    } else if version.is_gte("1.27") {
        "v1.27.1"
    } else if version.is_gte("1.26") {
        "v1.26.1"
    } else {
        "v1.25.0"
    }
}

/// Cluster autoscaler defaults, applied only when the addon is enabled
#[derive(Debug)]
pub struct ClusterAutoscalerOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl ClusterAutoscalerOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

impl SpecOptionsBuilder for ClusterAutoscalerOptionsBuilder {
    fn name(&self) -> &'static str {
        "cluster-autoscaler"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let Some(cas) = spec.cluster_autoscaler.as_mut() else {
            return Ok(());
        };
        if cas.enabled != Some(true) {
            return Ok(());
        }
        cas.expander.get_or_insert_with(|| "random".to_string());
        cas.balance_similar_node_groups.get_or_insert(false);
        cas.scale_down_utilization_threshold.get_or_insert_with(|| "0.5".to_string());
        cas.skip_nodes_with_local_storage.get_or_insert(true);
        cas.new_pod_scale_up_delay.get_or_insert_with(|| "0s".to_string());
        if cas.image.is_none() {
            let tag = autoscaler_tag(self.ctx.control_plane_version());
            cas.image = Some(self.ctx.remap_image(&format!("{AUTOSCALER_IMAGE}:{tag}"))?);
        }
        Ok(())
    }
}
