//! Asset resolution for keel
//!
//! Every binary and container image a cluster consumes passes through the
//! [`AssetBuilder`], which remaps it to the configured mirrors and works out
//! its digest. Assets whose download location differs from where they are
//! published become copy tasks:
//!
//! ```text
//! remap_file / remap_image ──► FileAsset / ContainerAsset ──► build_copy_tasks ──► CopyFile / CopyImage
//! ```

#![deny(missing_docs)]

pub mod builder;
pub mod manifest;
pub mod tasks;

use std::sync::Arc;

use tracing::debug;

pub use builder::{AssetBuilder, ContainerAsset, FileAsset};
pub use manifest::{get_hash, HashManifest};
pub use tasks::{CopyFile, CopyImage, ImageCopier};

pub use keel_common::{Error, Result};
use keel_tasks::TaskMapBuilder;
use keel_vfs::VfsContext;

/// Add a copy task for every mirrored asset recorded by `assets`
///
/// Images need a `copier`; asking to mirror an image without one fails.
pub fn build_copy_tasks<C: Send + Sync + 'static>(
    assets: &AssetBuilder,
    vfs: &Arc<VfsContext>,
    copier: Option<Arc<dyn ImageCopier>>,
    tasks: &mut TaskMapBuilder<C>,
) -> Result<()> {
    for file in assets.file_assets() {
        let Some(canonical) = &file.canonical_url else {
            continue;
        };
        if *canonical == file.download_url {
            continue;
        }
        debug!(source = %canonical, target = %file.download_url, "adding file copy");
        tasks.add(CopyFile::new(
            vfs.clone(),
            canonical.as_str(),
            file.download_url.as_str(),
            &file.hash,
        ))?;
    }

    for image in assets.container_assets() {
        let Some(canonical) = &image.canonical_location else {
            continue;
        };
        if *canonical == image.docker_image {
            continue;
        }
        let copier = copier.clone().ok_or_else(|| {
            Error::precondition(format!(
                "image {canonical} must be copied to {} but no image copier is configured",
                image.docker_image
            ))
        })?;
        debug!(source = %canonical, target = %image.docker_image, "adding image copy");
        tasks.add(CopyImage::new(copier, canonical.as_str(), image.docker_image.as_str()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::api::AssetsSpec;
    use keel_common::version::KubernetesVersion;
    use keel_tasks::TaskKey;
    use keel_vfs::{VfsClients, VfsConfig};
    use url::Url;

    fn vfs() -> Arc<VfsContext> {
        Arc::new(VfsContext::new(VfsConfig::default(), VfsClients::default()))
    }

    fn mirrored() -> AssetBuilder {
        AssetBuilder::new(
            vfs(),
            Some(AssetsSpec {
                container_registry: Some("mirror.example.com".into()),
                file_repository: Some("https://files.example.com/".into()),
                container_proxy: None,
            }),
            KubernetesVersion::new(1, 26, 0),
        )
    }

    #[test]
    fn mirrored_assets_become_copy_tasks() {
        let assets = mirrored();
        assets.remap_image("registry.k8s.io/pause:3.9").unwrap();
        assets
            .remap_file_with_hash(
                &Url::parse("https://dl.k8s.io/release/v1.26.0/bin/linux/amd64/kubectl").unwrap(),
                "d".repeat(64).parse().unwrap(),
            )
            .unwrap();

        let mut map: TaskMapBuilder<()> = TaskMapBuilder::new();
        let copier: Arc<dyn ImageCopier> = Arc::new(tasks::MockImageCopier::new());
        build_copy_tasks(&assets, &vfs(), Some(copier), &mut map).unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.contains(&TaskKey::new(
            tasks::COPY_FILE_KIND,
            "https://files.example.com/release/v1.26.0/bin/linux/amd64/kubectl"
        )));
        assert!(map.contains(&TaskKey::new(
            tasks::COPY_IMAGE_KIND,
            "mirror.example.com/registry.k8s.io-pause:3.9"
        )));
    }

    #[test]
    fn unmirrored_assets_need_no_copies() {
        let assets = AssetBuilder::new(vfs(), None, KubernetesVersion::new(1, 26, 0));
        assets.remap_image("registry.k8s.io/pause:3.9").unwrap();
        let mut map: TaskMapBuilder<()> = TaskMapBuilder::new();
        build_copy_tasks(&assets, &vfs(), None, &mut map).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn mirrored_images_require_a_copier() {
        let assets = mirrored();
        assets.remap_image("registry.k8s.io/pause:3.9").unwrap();
        let mut map: TaskMapBuilder<()> = TaskMapBuilder::new();
        let err = build_copy_tasks(&assets, &vfs(), None, &mut map).unwrap_err();
        assert!(err.to_string().contains("no image copier"));
    }
}
