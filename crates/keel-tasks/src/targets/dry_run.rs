//! Records what a run would do without doing it

use std::fmt::Write as _;
use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use keel_common::{Error, Result};

use super::{Target, TargetKind};
use crate::changes::{Changes, FieldChange};
use crate::task::TaskKey;

/// Whether a task would create or modify its object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannedAction {
    /// Object does not exist yet
    Create,
    /// Object exists but differs
    Modify,
}

/// One task that would render
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedChange {
    /// Task identity
    pub key: TaskKey,
    /// Create or modify
    pub action: PlannedAction,
    /// Fields that would be written
    pub fields: Vec<FieldChange>,
}

/// One object that would be deleted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedDeletion {
    /// Kind of the task that found it
    pub kind: String,
    /// Description of the object
    pub item: String,
}

#[derive(Default)]
struct DryRunState {
    changes: Vec<PlannedChange>,
    deletions: Vec<PlannedDeletion>,
}

/// Target that only records planned changes
#[derive(Default)]
pub struct DryRunTarget {
    state: Mutex<DryRunState>,
    process_deletions: bool,
}

impl DryRunTarget {
    /// Dry run; `process_deletions` controls whether deletions are reported
    pub fn new(process_deletions: bool) -> Self {
        Self {
            state: Mutex::default(),
            process_deletions,
        }
    }

    /// Record that `key` would render `changes`
    pub fn record_change(&self, key: TaskKey, created: bool, changes: &Changes) {
        let action = if created {
            PlannedAction::Create
        } else {
            PlannedAction::Modify
        };
        self.state.lock().changes.push(PlannedChange {
            key,
            action,
            fields: changes.fields().to_vec(),
        });
    }

    /// Record that `item` found by a `kind` task would be deleted
    pub fn record_deletion(&self, kind: &str, item: String) {
        self.state.lock().deletions.push(PlannedDeletion {
            kind: kind.to_string(),
            item,
        });
    }

    /// Planned changes sorted by task key
    pub fn changes(&self) -> Vec<PlannedChange> {
        let mut changes = self.state.lock().changes.clone();
        changes.sort_by(|a, b| a.key.cmp(&b.key));
        changes
    }

    /// Planned deletions sorted by kind and item
    pub fn deletions(&self) -> Vec<PlannedDeletion> {
        let mut deletions = self.state.lock().deletions.clone();
        deletions.sort_by(|a, b| (&a.kind, &a.item).cmp(&(&b.kind, &b.item)));
        deletions
    }

    /// True when nothing would change
    pub fn has_no_changes(&self) -> bool {
        let state = self.state.lock();
        state.changes.is_empty() && state.deletions.is_empty()
    }

    /// Human-readable report
    pub fn report(&self) -> String {
        let changes = self.changes();
        let deletions = self.deletions();
        let mut out = String::new();
        if changes.is_empty() && deletions.is_empty() {
            out.push_str("No changes need to be applied\n");
            return out;
        }

        for (action, heading) in [
            (PlannedAction::Create, "Will create resources:"),
            (PlannedAction::Modify, "Will modify resources:"),
        ] {
            let matching: Vec<&PlannedChange> =
                changes.iter().filter(|c| c.action == action).collect();
            if matching.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{heading}");
            for change in matching {
                let _ = writeln!(out, "  {}", change.key);
                for field in &change.fields {
                    match action {
                        PlannedAction::Create => {
                            let _ = writeln!(out, "    \t{}\t{}", field.field, field.expected);
                        }
                        PlannedAction::Modify => {
                            let _ = writeln!(
                                out,
                                "    \t{}\t{} -> {}",
                                field.field, field.actual, field.expected
                            );
                        }
                    }
                }
                out.push('\n');
            }
        }

        if !deletions.is_empty() {
            let _ = writeln!(out, "Will delete items:");
            for deletion in deletions {
                let _ = writeln!(out, "  {}\t{}", deletion.kind, deletion.item);
            }
        }
        out
    }

    /// Write the report to `out`
    pub fn print_report(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(self.report().as_bytes())
            .map_err(|e| Error::io("writing dry-run report", e))
    }
}

#[async_trait]
impl Target for DryRunTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::DryRun
    }

    fn process_deletions(&self) -> bool {
        self.process_deletions
    }

    async fn finish(&self) -> Result<()> {
        let state = self.state.lock();
        info!(
            changes = state.changes.len(),
            deletions = state.deletions.len(),
            "dry run complete"
        );
        Ok(())
    }

    fn as_dry_run(&self) -> Option<&DryRunTarget> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Lb {
        name: String,
        size: u32,
    }

    #[test]
    fn report_is_sorted_by_task_key() {
        let target = DryRunTarget::new(true);
        let lb = Lb {
            name: "api".into(),
            size: 1,
        };
        let changes = Changes::build(None, &lb).unwrap();
        target.record_change(TaskKey::new("LoadBalancer", "api"), true, &changes);
        target.record_change(TaskKey::new("Instance", "nodes"), true, &changes);
        target.record_deletion("Instance", "server nodes-3".into());

        let report = target.report();
        let instance = report.find("Instance/nodes").unwrap();
        let lb_pos = report.find("LoadBalancer/api").unwrap();
        assert!(instance < lb_pos);
        assert!(report.contains("Will create resources:"));
        assert!(report.contains("Will delete items:"));
        assert!(!target.has_no_changes());
    }

    #[test]
    fn empty_report() {
        let target = DryRunTarget::new(false);
        assert!(target.has_no_changes());
        assert_eq!(target.report(), "No changes need to be applied\n");
    }
}
