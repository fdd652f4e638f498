//! Where task renders go

use std::fmt;

use async_trait::async_trait;

use keel_common::Result;

mod api;
mod dry_run;
mod terraform;

pub use api::ApiTarget;
pub use dry_run::{DryRunTarget, PlannedAction, PlannedChange, PlannedDeletion};
pub use terraform::{sanitize_name, TerraformTarget, TERRAFORM_FILE};

/// Kind of render target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// Live cloud API calls
    Api,
    /// Terraform JSON output
    Terraform,
    /// Record planned changes only
    DryRun,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Api => "direct",
            Self::Terraform => "terraform",
            Self::DryRun => "dryrun",
        })
    }
}

/// A render target
#[async_trait]
pub trait Target: Send + Sync {
    /// Which kind of target this is
    fn kind(&self) -> TargetKind;

    /// Whether deletions found by tasks are acted on
    fn process_deletions(&self) -> bool;

    /// Called once after every task has run
    async fn finish(&self) -> Result<()>;

    /// This target as a Terraform target
    fn as_terraform(&self) -> Option<&TerraformTarget> {
        None
    }

    /// This target as a dry-run target
    fn as_dry_run(&self) -> Option<&DryRunTarget> {
        None
    }
}
