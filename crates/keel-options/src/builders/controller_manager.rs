use std::sync::Arc;
use std::time::Duration;

use keel_common::api::{parse_duration, Cluster, KubeControllerManagerConfig, LeaderElectionConfiguration};
use keel_common::{Error, Result};

use super::component_image;
use crate::builder::ClusterOptionsBuilder;
use crate::context::OptionsContext;

const DEFAULT_ATTACH_DETACH_PERIOD: &str = "1m0s";

/// kube-controller-manager flags
#[derive(Debug)]
pub struct KubeControllerManagerOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl KubeControllerManagerOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

impl ClusterOptionsBuilder for KubeControllerManagerOptionsBuilder {
    fn name(&self) -> &'static str {
        "kube-controller-manager"
    }

    fn build_options(&self, cluster: &mut Cluster) -> Result<()> {
        let name = cluster.cluster_name().to_string();
        let spec = &mut cluster.spec;
        let pod_cidr = spec.networking.pod_cidr.clone();
        let gce_alias = spec.networking.uses_gce_ip_alias();
        let kubenet = spec.networking.uses_kubenet();
        let cloud = spec.cloud_provider;

        let kcm = spec
            .kube_controller_manager
            .get_or_insert_with(KubeControllerManagerConfig::default);

        kcm.leader_election
            .get_or_insert_with(LeaderElectionConfiguration::default)
            .leader_elect
            .get_or_insert(true);

        match kcm.attach_detach_reconcile_sync_period.as_deref() {
            None => {
                kcm.attach_detach_reconcile_sync_period = Some(DEFAULT_ATTACH_DETACH_PERIOD.to_string());
            }
            Some(raw) => {
                if parse_duration(raw)? < Duration::from_secs(1) {
                    return Err(Error::invalid_field(
                        "spec.kubeControllerManager.attachDetachReconcileSyncPeriod",
                        format!("attachDetachReconcileSyncPeriod {raw} must be at least 1s"),
                    ));
                }
            }
        }

        if kcm.cluster_cidr.is_none() {
            kcm.cluster_cidr = pod_cidr;
        }
        kcm.allocate_node_cidrs.get_or_insert(!gce_alias);
        kcm.configure_cloud_routes.get_or_insert(kubenet);
        kcm.cluster_name.get_or_insert(name);
        if cloud.is_some() {
            kcm.cloud_provider.get_or_insert_with(|| "external".to_string());
        }
        if kcm.image.is_none() {
            kcm.image = Some(component_image(
                &self.ctx,
                "kube-controller-manager",
                self.ctx.control_plane_version(),
            )?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::{cluster, ctx};
    use keel_common::api::CniProviderSpec;

    fn build(c: &mut Cluster) -> Result<()> {
        KubeControllerManagerOptionsBuilder::new(ctx("1.27.3")).build_options(c)
    }

    #[test]
    fn kubenet_clusters_route_through_the_cloud() {
        let mut c = cluster("1.27.3");
        c.spec.networking.kubenet = Some(CniProviderSpec::default());
        c.spec.networking.pod_cidr = Some("100.96.0.0/11".into());
        build(&mut c).unwrap();
        let kcm = c.spec.kube_controller_manager.unwrap();
        assert_eq!(kcm.leader_election.unwrap().leader_elect, Some(true));
        assert_eq!(kcm.attach_detach_reconcile_sync_period.as_deref(), Some("1m0s"));
        assert_eq!(kcm.cluster_cidr.as_deref(), Some("100.96.0.0/11"));
        assert_eq!(kcm.allocate_node_cidrs, Some(true));
        assert_eq!(kcm.configure_cloud_routes, Some(true));
        assert_eq!(kcm.cluster_name.as_deref(), Some("demo.example.com"));
    }

    #[test]
    fn cni_clusters_do_not_configure_routes() {
        let mut c = cluster("1.27.3");
        c.spec.networking.cilium = Some(CniProviderSpec::default());
        build(&mut c).unwrap();
        assert_eq!(c.spec.kube_controller_manager.unwrap().configure_cloud_routes, Some(false));
    }

    #[test]
    fn sub_second_attach_detach_period_is_rejected() {
        let mut c = cluster("1.27.3");
        c.spec.kube_controller_manager = Some(KubeControllerManagerConfig {
            attach_detach_reconcile_sync_period: Some("500ms".into()),
            ..Default::default()
        });
        let err = build(&mut c).unwrap_err();
        assert!(err.to_string().contains("at least 1s"));

        c.spec.kube_controller_manager = Some(KubeControllerManagerConfig {
            attach_detach_reconcile_sync_period: Some("1s".into()),
            ..Default::default()
        });
        assert!(build(&mut c).is_ok());
    }
}
