use keel_cloud::scaleway::tasks::{openssh_fingerprint, SshKeyTask};
use keel_cloud::ScwCloudHandle;
use keel_common::Result;
use keel_tasks::TaskMapBuilder;

use crate::builder::ModelBuilder;
use crate::context::ModelBuilderContext;

/// Registers the admin SSH key
///
/// Without a supplied public key nothing is emitted; servers then rely on
/// keys already present in the project.
#[derive(Clone, Copy, Debug, Default)]
pub struct SshKeyModelBuilder;

impl ModelBuilder<ScwCloudHandle> for SshKeyModelBuilder {
    fn name(&self) -> &'static str {
        "scaleway-ssh-key"
    }

    fn build(&self, ctx: &ModelBuilderContext, tasks: &mut TaskMapBuilder<ScwCloudHandle>) -> Result<()> {
        let Some(public_key) = ctx.ssh_public_key() else {
            return Ok(());
        };
        let name = match &ctx.cluster().spec.ssh_key_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => {
                let fingerprint = openssh_fingerprint(public_key)?;
                format!("kubernetes.{}-{}", ctx.cluster_name(), fingerprint.replace(':', ""))
            }
        };
        let mut task = SshKeyTask::new(name, public_key)?;
        task.lifecycle = ctx.lifecycle();
        tasks.add(task)
    }
}
