//! The standard options builders, in run order

mod apiserver;
mod autoscaler;
mod containerd;
mod controller_manager;
mod csi;
mod defaults;
mod dns;
mod etcd;
mod kubelet;
mod networking;
mod proxy;
mod scheduler;

pub use apiserver::{KubeApiServerOptionsBuilder, DEFAULT_ADMISSION_PLUGINS};
pub use autoscaler::ClusterAutoscalerOptionsBuilder;
pub use containerd::{containerd_versions, ContainerdOptionsBuilder, CONTAINERD_SOCKET};
pub use controller_manager::KubeControllerManagerOptionsBuilder;
pub use csi::CsiDriverOptionsBuilder;
pub use defaults::DefaultsOptionsBuilder;
pub use dns::{nth_address, KubeDnsOptionsBuilder};
pub use etcd::{etcd_version, EtcdOptionsBuilder};
pub use kubelet::{KubeletOptionsBuilder, EVICTION_HARD};
pub use networking::{
    NetworkingOptionsBuilder, DEFAULT_NON_MASQUERADE_CIDR, DEFAULT_POD_CIDR, DEFAULT_SERVICE_CIDR,
};
pub use proxy::KubeProxyOptionsBuilder;
pub use scheduler::KubeSchedulerOptionsBuilder;

use keel_common::version::KubernetesVersion;
use keel_common::Result;

use crate::context::OptionsContext;

/// Upstream image registry for core components
pub const UPSTREAM_REGISTRY: &str = "registry.k8s.io";

/// `registry.k8s.io/<component>:v<version>` remapped through the asset builder
pub(crate) fn component_image(
    ctx: &OptionsContext,
    component: &str,
    version: &KubernetesVersion,
) -> Result<String> {
    ctx.remap_image(&format!("{UPSTREAM_REGISTRY}/{component}:v{version}"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use keel_common::api::{Cluster, ClusterSpec};

    use crate::context::OptionsContext;

    pub fn cluster(version: &str) -> Cluster {
        Cluster::new(
            "demo.example.com",
            ClusterSpec {
                kubernetes_version: Some(version.into()),
                ..Default::default()
            },
        )
    }

    pub fn ctx(version: &str) -> Arc<OptionsContext> {
        Arc::new(OptionsContext::new(&cluster(version)).unwrap())
    }
}
