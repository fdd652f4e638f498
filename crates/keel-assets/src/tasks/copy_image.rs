use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use keel_common::Result;
use keel_tasks::{Changes, Context, DeltaTask};

/// Kind of [`CopyImage`] tasks
pub const COPY_IMAGE_KIND: &str = "CopyImage";

/// Registry operations needed to mirror images
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// Manifest digest of `image`, None if the registry does not have it
    async fn digest(&self, image: &str) -> Result<Option<String>>;

    /// Copy `source` to `target`, overwriting any existing tag
    async fn copy(&self, source: &str, target: &str) -> Result<()>;
}

/// Copies a container image into the mirror registry
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyImage {
    /// Task name
    pub name: String,
    /// Image as published
    pub source_image: String,
    /// Image inside the mirror registry
    pub target_image: String,
    #[serde(skip)]
    copier: Arc<dyn ImageCopier>,
}

impl fmt::Debug for CopyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyImage")
            .field("source_image", &self.source_image)
            .field("target_image", &self.target_image)
            .finish_non_exhaustive()
    }
}

impl CopyImage {
    /// Copy `source` to `target` through `copier`
    pub fn new(copier: Arc<dyn ImageCopier>, source: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            name: target.clone(),
            source_image: source.into(),
            target_image: target,
            copier,
        }
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> DeltaTask<C> for CopyImage {
    const KIND: &'static str = COPY_IMAGE_KIND;

    fn name(&self) -> &str {
        &self.name
    }

    /// The target counts as present only when it matches the source digest
    async fn find(&self, _ctx: &Context<C>) -> Result<Option<Self>> {
        let Some(target) = self.copier.digest(&self.target_image).await? else {
            return Ok(None);
        };
        let source = self.copier.digest(&self.source_image).await?;
        if source.as_deref() == Some(target.as_str()) {
            return Ok(Some(self.clone()));
        }
        Ok(Some(Self {
            source_image: format!("{}@{target}", self.target_image),
            ..self.clone()
        }))
    }

    async fn render_api(&self, _ctx: &Context<C>, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        info!(source = %self.source_image, target = %self.target_image, "copying image");
        self.copier.copy(&self.source_image, &self.target_image).await
    }
}
