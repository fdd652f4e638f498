//! The model builder contract

use keel_common::Result;
use keel_tasks::{TaskMap, TaskMapBuilder};
use tracing::debug;

use crate::context::ModelBuilderContext;

/// Adds the tasks for one concern of the cluster
///
/// Builders run in order and may look up tasks added by earlier builders
/// (through [`TaskMapBuilder::get_as`]) to wire references between them.
pub trait ModelBuilder<C>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Add this builder's tasks to `tasks`
    fn build(&self, ctx: &ModelBuilderContext, tasks: &mut TaskMapBuilder<C>) -> Result<()>;
}

/// Run `builders` in order and return the finished task map
pub fn build_tasks<C: Send + Sync + 'static>(
    ctx: &ModelBuilderContext,
    builders: &[Box<dyn ModelBuilder<C>>],
) -> Result<TaskMap<C>> {
    let mut tasks = TaskMapBuilder::new();
    for builder in builders {
        let before = tasks.len();
        builder.build(ctx, &mut tasks)?;
        debug!(
            builder = builder.name(),
            cluster = ctx.cluster_name(),
            added = tasks.len() - before,
            "built model"
        );
    }
    Ok(tasks.build())
}
