use std::sync::Arc;

use keel_common::api::{ClusterSpec, KubeSchedulerConfig, LeaderElectionConfiguration};
use keel_common::Result;

use super::component_image;
use crate::builder::SpecOptionsBuilder;
use crate::context::OptionsContext;

/// kube-scheduler flags
#[derive(Debug)]
pub struct KubeSchedulerOptionsBuilder {
    ctx: Arc<OptionsContext>,
}

impl KubeSchedulerOptionsBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<OptionsContext>) -> Self {
        Self { ctx }
    }
}

impl SpecOptionsBuilder for KubeSchedulerOptionsBuilder {
    fn name(&self) -> &'static str {
        "kube-scheduler"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let scheduler = spec.kube_scheduler.get_or_insert_with(KubeSchedulerConfig::default);
        scheduler
            .leader_election
            .get_or_insert_with(LeaderElectionConfiguration::default)
            .leader_elect
            .get_or_insert(true);
        if scheduler.image.is_none() {
            scheduler.image = Some(component_image(
                &self.ctx,
                "kube-scheduler",
                self.ctx.control_plane_version(),
            )?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::ctx;

    #[test]
    fn leader_election_defaults_on_but_respects_opt_out() {
        let mut spec = ClusterSpec::default();
        KubeSchedulerOptionsBuilder::new(ctx("1.27.3")).build_options(&mut spec).unwrap();
        let s = spec.kube_scheduler.clone().unwrap();
        assert_eq!(s.leader_election.unwrap().leader_elect, Some(true));
        assert_eq!(s.image.as_deref(), Some("registry.k8s.io/kube-scheduler:v1.27.3"));

        spec.kube_scheduler = Some(KubeSchedulerConfig {
            leader_election: Some(LeaderElectionConfiguration {
                leader_elect: Some(false),
            }),
            ..Default::default()
        });
        KubeSchedulerOptionsBuilder::new(ctx("1.27.3")).build_options(&mut spec).unwrap();
        assert_eq!(spec.kube_scheduler.unwrap().leader_election.unwrap().leader_elect, Some(false));
    }
}
