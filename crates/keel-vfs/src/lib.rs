//! Virtual file system for keel
//!
//! Every piece of cluster state (specs, secrets, keysets, addons, staged
//! assets) is addressed by URL and accessed through the [`Path`] trait. A
//! [`VfsContext`] turns a URL into a concrete backend path.
//!
//! Supported schemes:
//!
//! | URL                         | Backend                                     |
//! |-----------------------------|---------------------------------------------|
//! | `/abs/path`, `file:///...`  | local filesystem                            |
//! | `memfs://...`               | in-process tree (tests)                     |
//! | `s3://bucket/key`           | S3 and S3-compatible stores                 |
//! | `gs://bucket/key`           | Google Cloud Storage                        |
//! | `azureblob://container/key` | Azure Blob Storage                          |
//! | `swift://container/key`     | OpenStack Swift                             |
//! | `oss://bucket/key`          | Aliyun OSS                                  |
//! | `vault://host:port/mount/k` | Vault KV v2                                 |
//! | `ssh://user@host/path`      | SFTP                                        |
//! | `k8s://namespace/key`       | Kubernetes Secrets                          |
//! | `metadata://gce/...`        | cloud instance metadata (read-only)         |
//! | `http(s)://...`             | plain HTTP (read-only)                      |

#![deny(missing_docs)]

pub mod acl;
pub mod backends;
pub mod client;
pub mod context;
pub mod path;
pub mod testing;
pub mod util;

pub use acl::{Acl, AclOracle, DefaultAclOracle};
pub use context::{ReadOptions, VfsClients, VfsConfig, VfsContext};
pub use keel_common::{Error, Result};
pub use path::{Path, VfsPath};
