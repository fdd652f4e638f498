//! Access-control decisions for files written to object stores
//!
//! Staged assets must be world-readable so nodes can fetch them anonymously,
//! while everything under the cluster state store must stay private. The
//! [`AclOracle`] decides per destination.

use std::fmt;

use tracing::{debug, warn};

use keel_common::api::Cluster;
use keel_common::env::EnvSource;
use keel_common::Result;

use crate::backends::s3::{split_aws_s3_url, S3Path, S3_SCHEME};
use crate::path::{downcast, Path};
use crate::util::{is_within, split_bucket};

/// Environment variable holding the canned ACL for S3 state-store writes
pub const S3_ACL_ENV: &str = "KOPS_STATE_S3_ACL";

/// Canned ACL granting anonymous read
pub const S3_PUBLIC_READ: &str = "public-read";

/// Backend-specific access control
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acl {
    /// S3 canned ACL
    S3(S3Acl),
    /// GCS predefined ACL
    Gcs(GcsAcl),
    /// OSS canned ACL
    Oss(OssAcl),
}

/// S3 canned ACL (`public-read`, `bucket-owner-full-control`, ...)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Acl {
    /// Canned ACL name
    pub canned: String,
}

/// GCS predefined ACL (`publicRead`, ...)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GcsAcl {
    /// Predefined ACL name
    pub predefined: String,
}

/// OSS canned ACL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OssAcl {
    /// Canned ACL name
    pub canned: String,
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3(a) => write!(f, "s3:{}", a.canned),
            Self::Gcs(a) => write!(f, "gcs:{}", a.predefined),
            Self::Oss(a) => write!(f, "oss:{}", a.canned),
        }
    }
}

/// Decides the ACL for a destination path
pub trait AclOracle: Send + Sync {
    /// ACL for `path` in `cluster`, or None for the backend default
    fn get_acl(&self, path: &dyn Path, cluster: &Cluster) -> Result<Option<Acl>>;
}

/// Strategy chain over the known backends
///
/// For S3: a destination inside the cluster's file repository (same bucket,
/// key under the repository prefix) gets `public-read`, unless it also lies
/// inside the state store. Anything else gets the canned ACL from
/// `KOPS_STATE_S3_ACL`, or none. Other backends keep their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultAclOracle {
    s3_canned_acl: Option<String>,
}

impl DefaultAclOracle {
    /// Oracle with an explicit state-store canned ACL
    pub fn new(s3_canned_acl: Option<String>) -> Self {
        Self { s3_canned_acl }
    }

    /// Oracle configured from the environment
    pub fn from_env(env: &dyn EnvSource) -> Self {
        Self::new(env.get(S3_ACL_ENV))
    }

    fn s3_acl(&self, dest: &S3Path, cluster: &Cluster) -> Option<Acl> {
        let repository = cluster
            .spec
            .assets
            .as_ref()
            .and_then(|a| a.file_repository.as_deref())
            .and_then(parse_s3_location);

        if let Some((bucket, prefix)) = repository {
            if bucket == dest.bucket() && is_within(&prefix, dest.key()) {
                if inside_state_store(dest, cluster) {
                    warn!(
                        path = %dest.path(),
                        "file repository overlaps the state store; not granting public-read"
                    );
                } else {
                    debug!(path = %dest.path(), "granting public-read to staged asset");
                    return Some(Acl::S3(S3Acl {
                        canned: S3_PUBLIC_READ.to_string(),
                    }));
                }
            }
        }

        self.s3_canned_acl.as_ref().map(|canned| {
            Acl::S3(S3Acl {
                canned: canned.clone(),
            })
        })
    }
}

impl AclOracle for DefaultAclOracle {
    fn get_acl(&self, path: &dyn Path, cluster: &Cluster) -> Result<Option<Acl>> {
        if let Some(s3) = downcast::<S3Path>(path) {
            return Ok(self.s3_acl(s3, cluster));
        }
        Ok(None)
    }
}

/// Bucket and key prefix of an `s3://` or AWS HTTPS location
fn parse_s3_location(location: &str) -> Option<(String, String)> {
    if let Some(rest) = location.strip_prefix(S3_SCHEME) {
        return Some(split_bucket(rest));
    }
    split_aws_s3_url(location).ok()
}

fn inside_state_store(dest: &S3Path, cluster: &Cluster) -> bool {
    cluster
        .spec
        .config_store
        .base
        .as_deref()
        .and_then(parse_s3_location)
        .map(|(bucket, prefix)| bucket == dest.bucket() && is_within(&prefix, dest.key()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backends::s3::{S3Config, S3Context};
    use crate::testing::{FakeS3, FakeS3Factory};
    use keel_common::api::{AssetsSpec, ClusterSpec, ConfigStoreSpec};

    fn s3(url: &str) -> S3Path {
        let ctx = Arc::new(S3Context::new(
            Arc::new(FakeS3Factory::new(Arc::new(FakeS3::default()))),
            S3Config::default(),
        ));
        let (bucket, key) = split_bucket(url.strip_prefix(S3_SCHEME).unwrap());
        ctx.path(&bucket, &key)
    }

    fn cluster(file_repository: &str) -> Cluster {
        Cluster::new(
            "c.example.com",
            ClusterSpec {
                config_store: ConfigStoreSpec {
                    base: Some("s3://my_state_store/cluster".into()),
                    ..Default::default()
                },
                assets: Some(AssetsSpec {
                    file_repository: Some(file_repository.into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    #[test]
    fn state_store_destination_outside_repository_gets_no_acl() {
        let oracle = DefaultAclOracle::default();
        let acl = oracle
            .get_acl(
                &s3("s3://my_state_store/cluster/anything"),
                &cluster("https://s3.amazonaws.com/my_state_store/opps"),
            )
            .unwrap();
        assert_eq!(acl, None);
    }

    #[test]
    fn staged_asset_in_repository_is_public_read() {
        let oracle = DefaultAclOracle::default();
        let acl = oracle
            .get_acl(&s3("s3://test/foo"), &cluster("https://s3.amazonaws.com/test"))
            .unwrap();
        assert_eq!(
            acl,
            Some(Acl::S3(S3Acl {
                canned: "public-read".into()
            }))
        );
    }

    #[test]
    fn repository_overlapping_state_store_is_never_public() {
        let oracle = DefaultAclOracle::default();
        let acl = oracle
            .get_acl(
                &s3("s3://my_state_store/cluster/secrets/admin"),
                &cluster("s3://my_state_store"),
            )
            .unwrap();
        assert_eq!(acl, None);
    }

    #[test]
    fn prefix_match_is_segment_aware() {
        let oracle = DefaultAclOracle::default();
        let acl = oracle
            .get_acl(&s3("s3://test/optsx/file"), &cluster("s3://test/opts"))
            .unwrap();
        assert_eq!(acl, None);
    }

    #[test]
    fn env_canned_acl_applies_elsewhere() {
        let env = keel_common::env::StaticEnv::new([(S3_ACL_ENV, "bucket-owner-full-control")]);
        let oracle = DefaultAclOracle::from_env(&env);
        let acl = oracle
            .get_acl(
                &s3("s3://my_state_store/cluster/config"),
                &cluster("https://s3.amazonaws.com/other"),
            )
            .unwrap();
        assert_eq!(
            acl,
            Some(Acl::S3(S3Acl {
                canned: "bucket-owner-full-control".into()
            }))
        );
    }

    #[test]
    fn non_s3_paths_get_backend_default() {
        let mem = Arc::new(crate::backends::memfs::MemFsContext::default()).path("x");
        let oracle = DefaultAclOracle::new(Some("private".into()));
        assert_eq!(oracle.get_acl(&mem, &cluster("s3://test")).unwrap(), None);
    }
}
