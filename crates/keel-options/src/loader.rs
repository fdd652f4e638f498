//! Runs the builders until the spec stops changing

use std::sync::Arc;

use tracing::{debug, info, warn};

use keel_common::api::Cluster;
use keel_common::{Error, Result};

use crate::builder::{ClusterOptionsBuilder, OptionsBuilder, SpecOptionsBuilder};
use crate::builders;
use crate::context::OptionsContext;

/// Passes before the pipeline gives up
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Fixed-point driver over an ordered list of builders
#[derive(Debug)]
pub struct OptionsLoader {
    builders: Vec<OptionsBuilder>,
    max_iterations: usize,
}

impl Default for OptionsLoader {
    fn default() -> Self {
        Self {
            builders: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl OptionsLoader {
    /// Empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard builders in their required order
    pub fn standard(ctx: Arc<OptionsContext>) -> Self {
        let mut loader = Self::new();
        loader
            .add_cluster_builder(builders::DefaultsOptionsBuilder)
            .add_spec_builder(builders::ContainerdOptionsBuilder::new(ctx.clone()))
            .add_spec_builder(builders::EtcdOptionsBuilder::new(ctx.clone()))
            .add_spec_builder(builders::NetworkingOptionsBuilder)
            .add_spec_builder(builders::KubeApiServerOptionsBuilder::new(ctx.clone()))
            .add_cluster_builder(builders::KubeControllerManagerOptionsBuilder::new(ctx.clone()))
            .add_spec_builder(builders::KubeSchedulerOptionsBuilder::new(ctx.clone()))
            .add_spec_builder(builders::KubeProxyOptionsBuilder::new(ctx.clone()))
            .add_spec_builder(builders::KubeDnsOptionsBuilder)
            .add_spec_builder(builders::KubeletOptionsBuilder::new(ctx.clone()))
            .add_spec_builder(builders::CsiDriverOptionsBuilder)
            .add_spec_builder(builders::ClusterAutoscalerOptionsBuilder::new(ctx));
        loader
    }

    /// Append a whole-cluster builder
    pub fn add_cluster_builder(&mut self, builder: impl ClusterOptionsBuilder + 'static) -> &mut Self {
        self.builders.push(OptionsBuilder::Cluster(Box::new(builder)));
        self
    }

    /// Append a spec builder
    pub fn add_spec_builder(&mut self, builder: impl SpecOptionsBuilder + 'static) -> &mut Self {
        self.builders.push(OptionsBuilder::Spec(Box::new(builder)));
        self
    }

    /// Override the iteration limit
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Builder names in run order
    pub fn builder_names(&self) -> Vec<&'static str> {
        self.builders.iter().map(OptionsBuilder::name).collect()
    }

    /// Run every builder over a copy of `cluster` until a pass changes nothing
    pub fn build(&self, cluster: &Cluster) -> Result<Cluster> {
        let mut current = cluster.clone();
        for iteration in 1..=self.max_iterations {
            let before = current.clone();
            for builder in &self.builders {
                builder.apply(&mut current).map_err(|e| {
                    warn!(builder = builder.name(), error = %e, "options builder failed");
                    e
                })?;
            }
            if current == before {
                info!(iteration, cluster = %current.cluster_name(), "options converged");
                return Ok(current);
            }
            debug!(iteration, "options changed, running another pass");
        }
        Err(Error::precondition(format!(
            "options did not converge after {} iterations",
            self.max_iterations
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MockClusterOptionsBuilder, MockSpecOptionsBuilder};
    use keel_common::api::ClusterSpec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cluster() -> Cluster {
        Cluster::new(
            "demo.k8s.local",
            ClusterSpec {
                kubernetes_version: Some("1.27.3".into()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn stable_builders_converge_after_one_confirming_pass() {
        let mut builder = MockSpecOptionsBuilder::new();
        builder.expect_name().return_const("dns-domain");
        builder.expect_build_options().times(2).returning(|spec| {
            spec.cluster_dns_domain.get_or_insert_with(|| "cluster.local".into());
            Ok(())
        });

        let mut loader = OptionsLoader::new();
        loader.add_spec_builder(builder);
        let built = loader.build(&cluster()).unwrap();
        assert_eq!(built.spec.cluster_dns_domain.as_deref(), Some("cluster.local"));
    }

    #[test]
    fn builder_errors_abort_the_pipeline() {
        let mut failing = MockClusterOptionsBuilder::new();
        failing.expect_name().return_const("failing");
        failing
            .expect_build_options()
            .times(1)
            .returning(|_| Err(Error::invalid_input("bad")));
        let mut never = MockSpecOptionsBuilder::new();
        never.expect_name().return_const("never");
        never.expect_build_options().never();

        let mut loader = OptionsLoader::new();
        loader.add_cluster_builder(failing).add_spec_builder(never);
        assert!(loader.build(&cluster()).is_err());
    }

    #[test]
    fn divergent_builders_fail_after_the_limit() {
        let counter = Arc::new(AtomicU32::new(0));
        let seen = counter.clone();
        let mut builder = MockSpecOptionsBuilder::new();
        builder.expect_name().return_const("counter");
        builder.expect_build_options().returning(move |spec| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            spec.cluster_dns_domain = Some(format!("d{n}.local"));
            Ok(())
        });

        let mut loader = OptionsLoader::new();
        loader.add_spec_builder(builder);
        let err = loader.build(&cluster()).unwrap_err();
        assert!(err.to_string().contains("did not converge after 10 iterations"));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn standard_order() {
        let ctx = Arc::new(OptionsContext::new(&cluster()).unwrap());
        assert_eq!(
            OptionsLoader::standard(ctx).builder_names(),
            vec![
                "defaults",
                "containerd",
                "etcd",
                "networking",
                "kube-apiserver",
                "kube-controller-manager",
                "kube-scheduler",
                "kube-proxy",
                "kube-dns",
                "kubelet",
                "csi-driver",
                "cluster-autoscaler",
            ]
        );
    }
}
