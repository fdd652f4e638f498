//! Runs a task map layer by layer

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, info_span, Instrument};

use keel_common::{Error, Result};

use crate::context::Context;
use crate::graph::TaskGraph;
use crate::queue::{warn_dropped, WorkQueue, WorkQueueConfig};
use crate::task::{Task, TaskKey, TaskMap};

/// Upper bound on tasks running at once within a layer
pub const MAX_CONCURRENCY: usize = 8;

/// Runner tuning
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Tasks run concurrently within a layer (1 = sequential), capped at
    /// [`MAX_CONCURRENCY`]
    pub max_concurrency: usize,
    /// Limit on a single task run
    pub task_timeout: Option<Duration>,
    /// Requeue policy for tasks that ask to be retried
    pub queue: WorkQueueConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            task_timeout: None,
            queue: WorkQueueConfig::default(),
        }
    }
}

/// Executes tasks in dependency order
#[derive(Clone, Debug, Default)]
pub struct TaskRunner {
    config: RunnerConfig,
}

impl TaskRunner {
    /// Runner with `config`
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Tasks dispatched together, within `1..=MAX_CONCURRENCY`
    pub fn concurrency(&self) -> usize {
        self.config.max_concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Run every task, then finish the target
    pub async fn run<C: Send + Sync + 'static>(&self, tasks: &TaskMap<C>, ctx: &Context<C>) -> Result<()> {
        let graph = TaskGraph::build(tasks)?;
        info!(
            tasks = graph.len(),
            layers = graph.layers().len(),
            target = %ctx.target().kind(),
            "running tasks"
        );

        for (index, layer) in graph.layers().iter().enumerate() {
            ctx.check_cancelled()?;
            self.run_layer(tasks, layer, ctx)
                .instrument(info_span!("layer", index))
                .await?;
        }

        ctx.target().finish().await
    }

    async fn run_layer<C: Send + Sync + 'static>(
        &self,
        tasks: &TaskMap<C>,
        layer: &[TaskKey],
        ctx: &Context<C>,
    ) -> Result<()> {
        let mut queue = WorkQueue::new(self.config.queue.clone());
        for key in layer {
            queue.add(key.clone());
        }

        let mut completed: BTreeSet<TaskKey> = BTreeSet::new();
        loop {
            let batch = queue
                .get_batch(self.concurrency(), ctx.cancellation())
                .await?;
            if batch.is_empty() {
                break;
            }

            let runs = batch.iter().map(|key| {
                let task = tasks.get(key).cloned();
                async move {
                    let result = match task {
                        Some(task) => self.run_one(task, ctx).await,
                        None => Err(Error::invalid_input(format!("unknown task {key}"))),
                    };
                    (key, result)
                }
            });

            for (key, result) in join_all(runs).await {
                match result {
                    Ok(()) => {
                        queue.forget(key);
                        completed.insert(key.clone());
                    }
                    Err(e) if e.is_try_again_later() => {
                        let retries = queue.num_requeues(key);
                        debug!(task = %key, retries, error = %e, "task asked to be retried");
                        if !queue.add_rate_limited(key.clone()) {
                            warn_dropped(key, retries);
                        }
                    }
                    Err(e) => return Err(Error::task(&key.kind, &key.name, e)),
                }
            }
        }

        if let Some(missing) = layer.iter().find(|k| !completed.contains(*k)) {
            return Err(Error::task(
                &missing.kind,
                &missing.name,
                Error::try_again_later("task did not complete within the retry limit"),
            ));
        }
        Ok(())
    }

    async fn run_one<C: Send + Sync + 'static>(&self, task: Arc<dyn Task<C>>, ctx: &Context<C>) -> Result<()> {
        let key = task.key();
        let run = task.run(ctx).instrument(info_span!("task", task = %key));
        let run = async {
            match self.config.task_timeout {
                Some(limit) => tokio::time::timeout(limit, run)
                    .await
                    .map_err(|_| Error::wait_timeout(format!("task {key}")))?,
                None => run.await,
            }
        };
        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(Error::cancelled(format!("task {key}"))),
            result = run => result,
        }
    }
}
