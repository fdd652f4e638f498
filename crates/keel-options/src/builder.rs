//! Builder contracts
//!
//! Builders only fill fields that are still unset and consult fields that
//! are already set. Running a builder twice on an unchanged spec writes
//! nothing.

use keel_common::api::{Cluster, ClusterSpec};
use keel_common::Result;

#[cfg(test)]
use mockall::automock;

/// Builder that needs the whole cluster (name, metadata)
#[cfg_attr(test, automock)]
pub trait ClusterOptionsBuilder: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Fill defaults on `cluster`
    fn build_options(&self, cluster: &mut Cluster) -> Result<()>;
}

/// Builder that only needs the spec
#[cfg_attr(test, automock)]
pub trait SpecOptionsBuilder: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Fill defaults on `spec`
    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()>;
}

/// Either builder shape
pub enum OptionsBuilder {
    /// Whole-cluster builder
    Cluster(Box<dyn ClusterOptionsBuilder>),
    /// Spec-only builder
    Spec(Box<dyn SpecOptionsBuilder>),
}

impl OptionsBuilder {
    /// Builder name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cluster(b) => b.name(),
            Self::Spec(b) => b.name(),
        }
    }

    /// Apply the builder to `cluster`
    pub fn apply(&self, cluster: &mut Cluster) -> Result<()> {
        match self {
            Self::Cluster(b) => b.build_options(cluster),
            Self::Spec(b) => b.build_options(&mut cluster.spec),
        }
    }
}

impl std::fmt::Debug for OptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
