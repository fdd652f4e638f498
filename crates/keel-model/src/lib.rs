//! Model builders for keel
//!
//! A model builder reads the fully populated cluster and its instance groups
//! and adds the tasks that realise them to a task map:
//!
//! ```text
//! Cluster + InstanceGroups ──► ModelBuilderContext
//!                                     │
//!        NetworkModelBuilder ─► ApiLoadBalancerModelBuilder ─► SshKeyModelBuilder
//!                 ─► InstanceModelBuilder (BootstrapScriptBuilder) ─► DnsModelBuilder
//!                                     │
//!                               TaskMapBuilder ──► TaskRunner
//! ```

#![deny(missing_docs)]

pub mod bootstrap_script;
pub mod builder;
pub mod context;
pub mod scaleway;

pub use bootstrap_script::{BootstrapScript, BootstrapScriptBuilder, NodeupConfig};
pub use builder::{build_tasks, ModelBuilder};
pub use context::ModelBuilderContext;
