use std::sync::Arc;

use keel_common::api::ClusterSpec;
use keel_common::version::KubernetesVersion;
use keel_common::Result;

use crate::builder::SpecOptionsBuilder;
use crate::context::OptionsContext;

/// Etcd release for a control plane at `version`
pub fn etcd_version(version: &KubernetesVersion) -> &'static str {
    if version.is_gte("1.22") {
        "3.5.3"
    } else {
        "3.4.13"
    }
}

/// Etcd cluster versions
#[derive(Debug)]
pub struct EtcdOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl EtcdOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

impl SpecOptionsBuilder for EtcdOptionsBuilder {
    fn name(&self) -> &'static str {
        "etcd"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let version = etcd_version(self.ctx.control_plane_version());
        for etcd in &mut spec.etcd_clusters {
            etcd.version.get_or_insert_with(|| version.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::ctx;
    use keel_common::api::EtcdClusterSpec;

    #[test]
    fn picks_by_control_plane_version() {
        let mut spec = ClusterSpec {
            etcd_clusters: vec![
                EtcdClusterSpec {
                    name: "main".into(),
                    ..Default::default()
                },
                EtcdClusterSpec {
                    name: "events".into(),
                    version: Some("3.5.9".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        EtcdOptionsBuilder::new(ctx("1.21.14")).build_options(&mut spec).unwrap();
        assert_eq!(spec.etcd_clusters[0].version.as_deref(), Some("3.4.13"));
        assert_eq!(spec.etcd_clusters[1].version.as_deref(), Some("3.5.9"));

        spec.etcd_clusters[0].version = None;
        EtcdOptionsBuilder::new(ctx("1.22.0")).build_options(&mut spec).unwrap();
        assert_eq!(spec.etcd_clusters[0].version.as_deref(), Some("3.5.3"));
    }
}
