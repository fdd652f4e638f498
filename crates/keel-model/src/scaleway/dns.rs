use keel_cloud::scaleway::tasks::DnsRecordTask;
use keel_cloud::ScwCloudHandle;
use keel_common::Result;
use keel_tasks::TaskMapBuilder;

use crate::builder::ModelBuilder;
use crate::context::ModelBuilderContext;

/// Records nodes and clients resolve the control plane through
///
/// Each record starts at the placeholder address and is pointed at the
/// live control-plane servers when rendered. Names served by the API load
/// balancer get no record here.
#[derive(Clone, Copy, Debug, Default)]
pub struct DnsModelBuilder;

impl ModelBuilder<ScwCloudHandle> for DnsModelBuilder {
    fn name(&self) -> &'static str {
        "scaleway-dns"
    }

    fn build(&self, ctx: &ModelBuilderContext, tasks: &mut TaskMapBuilder<ScwCloudHandle>) -> Result<()> {
        if ctx.skip_dns() {
            return Ok(());
        }
        let zone = ctx.dns_zone()?;

        let mut names = Vec::new();
        if !ctx.use_load_balancer_for_api() {
            names.push(ctx.api_name());
        }
        if !ctx.use_load_balancer_for_internal_api() {
            names.push(ctx.api_internal_name());
        }
        names.push(ctx.kops_controller_internal_name());

        for name in names {
            let mut record = DnsRecordTask::placeholder(name, zone);
            record.lifecycle = ctx.lifecycle();
            record.relative_name()?;
            tasks.add(record)?;
        }
        Ok(())
    }
}
