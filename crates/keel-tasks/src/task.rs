//! Task identity, the object-safe task trait and the task map

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use keel_common::{Error, Result};

use crate::context::Context;
use crate::lifecycle::Lifecycle;

/// Identity of a task: its kind plus a name unique within the kind
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskKey {
    /// Task kind (e.g. "Instance")
    pub kind: String,
    /// Task name
    pub name: String,
}

impl TaskKey {
    /// Key for `kind`/`name`
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A node of the task graph
///
/// Implemented for every [`DeltaTask`](crate::DeltaTask); implement it
/// directly only for tasks that do not follow the find/diff/render cycle.
#[async_trait]
pub trait Task<C>: fmt::Debug + Send + Sync {
    /// Identity
    fn key(&self) -> TaskKey;

    /// Declared lifecycle, before overrides
    fn lifecycle(&self) -> Lifecycle;

    /// Tasks this one holds references to
    fn references(&self) -> Vec<TaskKey>;

    /// Explicit dependencies; `None` falls back to [`Task::references`]
    fn dependencies(&self, tasks: &TaskMap<C>) -> Option<Vec<TaskKey>>;

    /// Canonical form used to detect conflicting duplicates
    fn fingerprint(&self) -> Result<serde_json::Value>;

    /// Bring the target in line with this task
    async fn run(&self, ctx: &Context<C>) -> Result<()>;

    /// For downcasting to the concrete task
    fn as_any(&self) -> &dyn Any;
}

/// Tasks keyed by identity, iterated in key order
pub type TaskMap<C> = BTreeMap<TaskKey, Arc<dyn Task<C>>>;

/// Accumulates tasks from model builders
pub struct TaskMapBuilder<C> {
    tasks: TaskMap<C>,
}

impl<C> Default for TaskMapBuilder<C> {
    fn default() -> Self {
        Self {
            tasks: TaskMap::new(),
        }
    }
}

impl<C: Send + Sync + 'static> TaskMapBuilder<C> {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task
    ///
    /// Adding an identical task twice is a no-op; adding a different task
    /// under an existing key is an error.
    pub fn add<T: Task<C> + 'static>(&mut self, task: T) -> Result<()> {
        self.add_arc(Arc::new(task))
    }

    /// Add a shared task
    pub fn add_arc(&mut self, task: Arc<dyn Task<C>>) -> Result<()> {
        let key = task.key();
        if let Some(existing) = self.tasks.get(&key) {
            if existing.fingerprint()? == task.fingerprint()? {
                debug!(task = %key, "collapsed duplicate task");
                return Ok(());
            }
            return Err(Error::invalid_input(format!(
                "found conflicting tasks with key {key}"
            )));
        }
        self.tasks.insert(key, task);
        Ok(())
    }

    /// The task with `key`
    pub fn get(&self, key: &TaskKey) -> Option<&Arc<dyn Task<C>>> {
        self.tasks.get(key)
    }

    /// The task with `key`, downcast to `T`
    pub fn get_as<T: 'static>(&self, key: &TaskKey) -> Option<&T> {
        self.tasks.get(key)?.as_any().downcast_ref::<T>()
    }

    /// True if a task with `key` exists
    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// No tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Finished task map
    pub fn build(self) -> TaskMap<C> {
        self.tasks
    }
}

/// Keys of every task of `kind` in `tasks`
pub fn keys_of_kind<C>(tasks: &TaskMap<C>, kind: &str) -> Vec<TaskKey> {
    tasks.keys().filter(|k| k.kind == kind).cloned().collect()
}
