//! The find / diff / render cycle shared by most tasks

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use keel_common::{Error, Result};

use crate::changes::Changes;
use crate::context::Context;
use crate::lifecycle::Lifecycle;
use crate::targets::{TargetKind, TerraformTarget};
use crate::task::{Task, TaskKey, TaskMap};

/// An object found to be surplus while running a task
#[async_trait]
pub trait Deletion<C>: fmt::Debug + Send + Sync {
    /// Kind of the task that found the object
    fn task_kind(&self) -> &str;

    /// Description shown in reports
    fn item(&self) -> String;

    /// Delete the object
    async fn delete(&self, ctx: &Context<C>) -> Result<()>;
}

/// A task that reconciles one object by diffing it against the live state
///
/// `Self` is the desired object. [`DeltaTask::find`] returns the live object
/// in the same shape, or `None` if it does not exist.
#[async_trait]
pub trait DeltaTask<C: Send + Sync + 'static>:
    Clone + Serialize + fmt::Debug + Send + Sync + 'static
{
    /// Task kind
    const KIND: &'static str;

    /// Task name
    fn name(&self) -> &str;

    /// Declared lifecycle
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Tasks referenced through [`TaskRef`](crate::TaskRef) fields
    fn references(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Explicit dependencies, overriding [`DeltaTask::references`]
    fn dependencies(&self, _tasks: &TaskMap<C>) -> Option<Vec<TaskKey>> {
        None
    }

    /// The live object, if any
    async fn find(&self, ctx: &Context<C>) -> Result<Option<Self>>;

    /// Validate the desired object and the planned changes
    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        Ok(())
    }

    /// Apply the changes through the cloud API
    async fn render_api(&self, ctx: &Context<C>, actual: Option<&Self>, changes: &Changes) -> Result<()>;

    /// Emit Terraform resources
    async fn render_terraform(
        &self,
        _ctx: &Context<C>,
        _target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        Err(Error::invalid_input(format!(
            "{} does not support the terraform target",
            Self::KIND
        )))
    }

    /// Surplus objects to delete once this task has rendered
    async fn find_deletions(&self, _ctx: &Context<C>) -> Result<Vec<Box<dyn Deletion<C>>>> {
        Ok(Vec::new())
    }
}

/// Run one delta task against the context's target
pub async fn default_delta_run<C, T>(task: &T, ctx: &Context<C>) -> Result<()>
where
    C: Send + Sync + 'static,
    T: DeltaTask<C>,
{
    let kind = <T as DeltaTask<C>>::KIND;
    let key = TaskKey::new(kind, task.name());
    let lifecycle = ctx.lifecycle_for(kind, <T as DeltaTask<C>>::lifecycle(task));
    if lifecycle == Lifecycle::Ignore {
        debug!(task = %key, "lifecycle is Ignore, skipping");
        return Ok(());
    }

    let actual = task.find(ctx).await?;
    if actual.is_none() && lifecycle.requires_existing() {
        return Err(Error::precondition(format!(
            "lifecycle set to {lifecycle} but {key} was not found"
        )));
    }

    let changes = Changes::build(actual.as_ref(), task)?;
    task.check_changes(actual.as_ref(), &changes)?;

    let mut should_render = actual.is_none() || !changes.is_empty();
    if should_render && actual.is_some() {
        match lifecycle {
            Lifecycle::ExistsAndValidates => {
                return Err(Error::precondition(format!(
                    "{key} has changes but lifecycle is {lifecycle}: {}",
                    changes.field_names().join(", ")
                )));
            }
            Lifecycle::ExistsAndWarnIfChanges => {
                warn!(task = %key, fields = ?changes.field_names(), "object differs, leaving it unchanged");
                should_render = false;
            }
            _ => {}
        }
    }

    if should_render {
        let result = render(task, ctx, &key, actual.as_ref(), &changes).await;
        match result {
            Err(e) if lifecycle == Lifecycle::WarnIfInsufficientAccess && !e.is_retryable() => {
                warn!(task = %key, error = %e, "render failed, continuing");
            }
            other => other?,
        }
    } else {
        debug!(task = %key, "no changes");
    }

    if ctx.target().process_deletions() {
        for deletion in task.find_deletions(ctx).await? {
            match ctx.target().as_dry_run() {
                Some(dry_run) => dry_run.record_deletion(deletion.task_kind(), deletion.item()),
                None => {
                    info!(task = %key, item = %deletion.item(), "deleting");
                    deletion.delete(ctx).await?;
                }
            }
        }
    }
    Ok(())
}

async fn render<C, T>(
    task: &T,
    ctx: &Context<C>,
    key: &TaskKey,
    actual: Option<&T>,
    changes: &Changes,
) -> Result<()>
where
    C: Send + Sync + 'static,
    T: DeltaTask<C>,
{
    let target = ctx.target().clone();
    match target.kind() {
        TargetKind::DryRun => {
            if let Some(dry_run) = target.as_dry_run() {
                dry_run.record_change(key.clone(), actual.is_none(), changes);
            }
            Ok(())
        }
        TargetKind::Terraform => {
            let terraform = target
                .as_terraform()
                .ok_or_else(|| Error::fatal("render", "terraform target is not a TerraformTarget"))?;
            task.render_terraform(ctx, terraform, actual, changes).await
        }
        TargetKind::Api => {
            if actual.is_none() {
                info!(task = %key, "creating");
            } else {
                info!(task = %key, fields = ?changes.field_names(), "updating");
            }
            task.render_api(ctx, actual, changes).await
        }
    }
}

#[async_trait]
impl<C, T> Task<C> for T
where
    C: Send + Sync + 'static,
    T: DeltaTask<C>,
{
    fn key(&self) -> TaskKey {
        TaskKey::new(<T as DeltaTask<C>>::KIND, <T as DeltaTask<C>>::name(self))
    }

    fn lifecycle(&self) -> Lifecycle {
        <T as DeltaTask<C>>::lifecycle(self)
    }

    fn references(&self) -> Vec<TaskKey> {
        <T as DeltaTask<C>>::references(self)
    }

    fn dependencies(&self, tasks: &TaskMap<C>) -> Option<Vec<TaskKey>> {
        <T as DeltaTask<C>>::dependencies(self, tasks)
    }

    fn fingerprint(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    async fn run(&self, ctx: &Context<C>) -> Result<()> {
        default_delta_run(self, ctx).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
