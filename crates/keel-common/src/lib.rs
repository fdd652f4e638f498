//! Common types for keel: errors, hashing, retry, telemetry and the cluster API

#![deny(missing_docs)]

pub mod api;
pub mod env;
pub mod error;
pub mod hashing;
pub mod retry;
pub mod telemetry;
pub mod version;

pub use error::{Error, ErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Tag key carrying the cluster name on cloud resources
pub const TAG_CLUSTER_NAME: &str = "kops.k8s.io/cluster";

/// Tag key carrying the instance group name on cloud resources
pub const TAG_INSTANCE_GROUP: &str = "instance-group";

/// Tag prefix carrying the node role on cloud resources
pub const TAG_ROLE_PREFIX: &str = "k8s.io/role/";
