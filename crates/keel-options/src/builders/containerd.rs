use std::sync::Arc;

use tracing::debug;

use keel_common::api::{ClusterSpec, ContainerdConfig, RuncConfig};
use keel_common::version::KubernetesVersion;
use keel_common::Result;

use crate::builder::SpecOptionsBuilder;
use crate::context::OptionsContext;

/// Default containerd socket
pub const CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";

/// `(containerd, runc)` versions for a control plane at `version`
pub fn containerd_versions(version: &KubernetesVersion) -> (&'static str, &'static str) {
    if version.is_gte("1.27") {
        ("1.6.20", "1.1.5")
    } else {
        ("1.7.25", "1.2.4")
    }
}

/// Container runtime defaults
#[derive(Debug)]
pub struct ContainerdOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl ContainerdOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

impl SpecOptionsBuilder for ContainerdOptionsBuilder {
    fn name(&self) -> &'static str {
        "containerd"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        if spec.container_runtime.as_deref().is_some_and(|r| r != "containerd") {
            return Ok(());
        }
        let (containerd, runc) = containerd_versions(self.ctx.control_plane_version());
        let config = spec.containerd.get_or_insert_with(ContainerdConfig::default);

        if config.version.is_none() {
            debug!(version = containerd, "defaulting containerd version");
            config.version = Some(containerd.to_string());
        }
        let runc_config = config.runc.get_or_insert_with(RuncConfig::default);
        runc_config.version.get_or_insert_with(|| runc.to_string());

        config.log_level.get_or_insert_with(|| "info".to_string());
        config.address.get_or_insert_with(|| CONTAINERD_SOCKET.to_string());
        Ok(())
    }
}
