//! Cluster spec defaulting for keel
//!
//! An [`OptionsContext`] captures the version facts of one reconcile. The
//! [`OptionsLoader`] runs an ordered list of builders over a copy of the
//! cluster until a full pass leaves it unchanged.

#![deny(missing_docs)]

pub mod builder;
pub mod builders;
pub mod context;
pub mod loader;

pub use builder::{ClusterOptionsBuilder, OptionsBuilder, SpecOptionsBuilder};
pub use context::{OptionsContext, MAX_NODE_SKEW};
pub use loader::{OptionsLoader, DEFAULT_MAX_ITERATIONS};

use std::sync::Arc;

use keel_common::api::Cluster;
use keel_common::Result;

/// Fill every default on `cluster` with the standard builders
pub fn populate_cluster_spec(cluster: &Cluster, ctx: Arc<OptionsContext>) -> Result<Cluster> {
    OptionsLoader::standard(ctx).build(cluster)
}
