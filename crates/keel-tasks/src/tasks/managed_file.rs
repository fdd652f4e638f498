use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use keel_common::Result;
use keel_vfs::VfsPath;

use crate::changes::Changes;
use crate::context::Context;
use crate::delta::DeltaTask;
use crate::lifecycle::Lifecycle;
use crate::targets::TerraformTarget;

/// Kind of [`ManagedFile`] tasks
pub const MANAGED_FILE_KIND: &str = "ManagedFile";

/// A file kept in sync under a state-store directory
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFile {
    /// Task name
    pub name: String,
    /// Directory the file lives under
    #[serde(skip)]
    pub base: VfsPath,
    /// Path relative to `base`
    pub location: String,
    /// File contents
    pub contents: Option<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl ManagedFile {
    /// Keep `contents` at `base/location`
    pub fn new(name: impl Into<String>, base: VfsPath, location: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base,
            location: location.into(),
            contents: Some(contents.into()),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn path(&self) -> VfsPath {
        self.base.join(&[&self.location])
    }

    async fn write<C>(&self, ctx: &Context<C>) -> Result<()> {
        let path = self.path();
        let acl = ctx.acl_oracle().get_acl(path.as_ref(), ctx.cluster())?;
        let contents = self.contents.as_deref().unwrap_or_default();
        path.write_file(contents.as_bytes(), acl.as_ref()).await
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> DeltaTask<C> for ManagedFile {
    const KIND: &'static str = MANAGED_FILE_KIND;

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, _ctx: &Context<C>) -> Result<Option<Self>> {
        match self.path().read_file().await {
            Ok(data) => Ok(Some(ManagedFile {
                contents: Some(String::from_utf8_lossy(&data).into_owned()),
                ..self.clone()
            })),
            Err(e) if e.is_not_exist() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn render_api(&self, ctx: &Context<C>, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        self.write(ctx).await
    }

    async fn render_terraform(
        &self,
        ctx: &Context<C>,
        _target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        // State-store files are written directly for every target
        self.write(ctx).await
    }
}

/// Shorthand for a managed file under `base`
pub fn managed_file(name: &str, base: &VfsPath, location: &str, contents: &str) -> ManagedFile {
    ManagedFile::new(name, Arc::clone(base), location, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{ApiTarget, DryRunTarget};
    use crate::task::Task;
    use keel_common::api::{Cluster, ClusterSpec};
    use keel_vfs::backends::memfs::MemFsContext;

    fn cluster() -> Arc<Cluster> {
        Arc::new(Cluster::new("demo.k8s.local", ClusterSpec::default()))
    }

    #[tokio::test]
    async fn writes_then_reports_no_changes() {
        let fs = Arc::new(MemFsContext::default());
        let base: VfsPath = Arc::new(fs.path("state/demo"));
        let file = managed_file("addons", &base, "clusteraddons/default", "kind: Addons\n");

        let ctx = Context::new((), Arc::new(ApiTarget::new()), cluster());
        Task::run(&file, &ctx).await.unwrap();
        let stored = base.join(&["clusteraddons", "default"]).read_file().await.unwrap();
        assert_eq!(stored, b"kind: Addons\n");

        let dry_run = Arc::new(DryRunTarget::new(true));
        let ctx = Context::new((), dry_run.clone(), cluster());
        Task::run(&file, &ctx).await.unwrap();
        assert!(dry_run.has_no_changes());
    }

    #[tokio::test]
    async fn dry_run_records_the_new_contents() {
        let fs = Arc::new(MemFsContext::default());
        let base: VfsPath = Arc::new(fs.path("state/demo"));
        let dry_run = Arc::new(DryRunTarget::new(true));
        let ctx = Context::new((), dry_run.clone(), cluster());

        Task::run(&managed_file("spec", &base, "cluster-completed.spec", "x"), &ctx)
            .await
            .unwrap();
        let changes = dry_run.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key.to_string(), "ManagedFile/spec");
        assert!(base.join(&["cluster-completed.spec"]).read_file().await.is_err());
    }
}
