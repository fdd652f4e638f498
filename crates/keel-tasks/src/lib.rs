//! Task graph execution for keel
//!
//! A cluster change is expressed as a map of tasks, each describing one
//! desired cloud or state-store object. The runner orders tasks by their
//! dependencies and runs each one against a [`Target`]:
//!
//! ```text
//! TaskMapBuilder ──► TaskMap ──► TaskGraph (layers) ──► TaskRunner
//!                                                          │
//!            find ─► Changes::build ─► check_changes ─► render (api | terraform | dry-run)
//! ```
//!
//! Most tasks implement [`DeltaTask`], which supplies the find/diff/render
//! cycle; the blanket [`Task`] implementation turns them into graph nodes.

#![deny(missing_docs)]

pub mod changes;
pub mod context;
pub mod delta;
pub mod graph;
pub mod lifecycle;
pub mod output;
pub mod queue;
pub mod resource;
pub mod runner;
pub mod task;
pub mod targets;
pub mod tasks;

pub use changes::{Changes, FieldChange};
pub use context::Context;
pub use delta::{default_delta_run, Deletion, DeltaTask};
pub use graph::TaskGraph;
pub use lifecycle::Lifecycle;
pub use output::{Output, TaskRef};
pub use queue::{WorkQueue, WorkQueueConfig};
pub use resource::{resource_sha256, BytesResource, Resource, ResourceRef};
pub use runner::{RunnerConfig, TaskRunner, MAX_CONCURRENCY};
pub use task::{keys_of_kind, Task, TaskKey, TaskMap, TaskMapBuilder};
pub use targets::{ApiTarget, DryRunTarget, Target, TargetKind, TerraformTarget};

pub use keel_common::{Error, Result};
