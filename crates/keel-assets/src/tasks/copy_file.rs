use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use keel_common::hashing::{hash_bytes, Hash, HashAlgorithm};
use keel_common::{Error, Result};
use keel_tasks::{Changes, Context, DeltaTask};
use keel_vfs::{ReadOptions, VfsContext};

/// Kind of [`CopyFile`] tasks
pub const COPY_FILE_KIND: &str = "CopyFile";

/// Copies a file asset into the file repository
///
/// The source is verified against the expected digest before anything is
/// written, and a `.sha1` sidecar is written next to the target.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFile {
    /// Task name
    pub name: String,
    /// URL the file is published at
    pub source_file: String,
    /// URL inside the file repository
    pub target_file: String,
    /// Expected digest, `algo:hex`
    pub sha: String,
    #[serde(skip)]
    vfs: Arc<VfsContext>,
}

impl CopyFile {
    /// Copy `source` to `target`, expecting `hash`
    pub fn new(vfs: Arc<VfsContext>, source: impl Into<String>, target: impl Into<String>, hash: &Hash) -> Self {
        let target = target.into();
        Self {
            name: target.clone(),
            source_file: source.into(),
            target_file: target,
            sha: hash.to_string(),
            vfs,
        }
    }

    fn expected(&self) -> Result<Hash> {
        self.sha.parse()
    }

    async fn target_hash(&self, algorithm: HashAlgorithm) -> Result<Option<Hash>> {
        let target = self.vfs.build_vfs_path(&self.target_file)?;
        if let Some(hash) = target.hash(algorithm).await? {
            return Ok(Some(hash));
        }
        match target.read_file().await {
            Ok(data) => Ok(Some(hash_bytes(algorithm, &data))),
            Err(e) if e.is_not_exist() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> DeltaTask<C> for CopyFile {
    const KIND: &'static str = COPY_FILE_KIND;

    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, _ctx: &Context<C>) -> Result<Option<Self>> {
        let expected = self.expected()?;
        match self.target_hash(expected.algorithm()).await {
            Ok(None) => Ok(None),
            Ok(Some(actual)) => Ok(Some(Self {
                sha: actual.to_string(),
                ..self.clone()
            })),
            Err(e) if e.is_not_exist() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn render_api(&self, ctx: &Context<C>, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        let expected = self.expected()?;
        info!(source = %self.source_file, target = %self.target_file, "copying file asset");
        let data = self.vfs.read_file(&self.source_file, ReadOptions::default()).await?;

        let actual = hash_bytes(expected.algorithm(), &data);
        if actual != expected {
            return Err(Error::invalid_input(format!(
                "hash of {} is {actual}, expected {expected}",
                self.source_file
            )));
        }

        let target = self.vfs.build_vfs_path(&self.target_file)?;
        let acl = ctx.acl_oracle().get_acl(target.as_ref(), ctx.cluster())?;
        target.write_file(&data, acl.as_ref()).await?;

        let sidecar = self.vfs.build_vfs_path(&format!("{}.sha1", self.target_file))?;
        let sha1 = hash_bytes(HashAlgorithm::Sha1, &data);
        let acl = ctx.acl_oracle().get_acl(sidecar.as_ref(), ctx.cluster())?;
        sidecar.write_file(sha1.hex().as_bytes(), acl.as_ref()).await?;
        debug!(target = %self.target_file, sha1 = %sha1.hex(), "wrote hash sidecar");
        Ok(())
    }
}
