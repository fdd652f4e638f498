//! Secrets, keysets and the state-store clientset
//!
//! Secrets are opaque byte payloads addressed by name. Keysets hold
//! versioned key material (certificates and private keys, or secret
//! versions) with exactly one primary item. Both live in the cluster state
//! store, either as files under the VFS or as `Keyset` custom resources.

#![deny(missing_docs)]

pub mod clientset;
pub mod keyset;
pub mod keystore;
pub mod kube_store;
pub mod secret;
pub mod vfs_store;

pub use clientset::VfsClientset;
pub use keyset::{Keyset, KeysetItem, KeysetSpec, KeysetType};
pub use keystore::{Keystore, VfsKeystore};
pub use kube_store::{KeysetApi, KubeKeysetApi, KubernetesSecretStore};
pub use secret::{Secret, SecretStore};
pub use vfs_store::VfsSecretStore;

pub use keel_common::{Error, Result};
