//! Everything a running task can reach

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use keel_common::api::Cluster;
use keel_common::{Error, Result};
use keel_secrets::{Keystore, SecretStore};
use keel_vfs::{AclOracle, DefaultAclOracle};

use crate::lifecycle::Lifecycle;
use crate::targets::Target;

/// Execution context shared by all tasks of one run
///
/// `C` is the cloud handle (for example a provider API client).
pub struct Context<C> {
    cloud: C,
    target: Arc<dyn Target>,
    cluster: Arc<Cluster>,
    keystore: Option<Arc<dyn Keystore>>,
    secrets: Option<Arc<dyn SecretStore>>,
    acl_oracle: Arc<dyn AclOracle>,
    lifecycle_overrides: BTreeMap<String, Lifecycle>,
    cancel: CancellationToken,
}

impl<C> Context<C> {
    /// Context rendering to `target` for `cluster`
    pub fn new(cloud: C, target: Arc<dyn Target>, cluster: Arc<Cluster>) -> Self {
        Self {
            cloud,
            target,
            cluster,
            keystore: None,
            secrets: None,
            acl_oracle: Arc::new(DefaultAclOracle::new(None)),
            lifecycle_overrides: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the keystore
    pub fn with_keystore(mut self, keystore: Arc<dyn Keystore>) -> Self {
        self.keystore = Some(keystore);
        self
    }

    /// Attach the secret store
    pub fn with_secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Use `oracle` for ACLs on state-store writes
    pub fn with_acl_oracle(mut self, oracle: Arc<dyn AclOracle>) -> Self {
        self.acl_oracle = oracle;
        self
    }

    /// Override the lifecycle of every task of the given kinds
    pub fn with_lifecycle_overrides(mut self, overrides: BTreeMap<String, Lifecycle>) -> Self {
        self.lifecycle_overrides = overrides;
        self
    }

    /// Stop the run when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cloud handle
    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Render target
    pub fn target(&self) -> &Arc<dyn Target> {
        &self.target
    }

    /// Cluster being built
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Shared cluster handle
    pub fn cluster_arc(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Keystore, failing if none was attached
    pub fn keystore(&self) -> Result<&Arc<dyn Keystore>> {
        self.keystore
            .as_ref()
            .ok_or_else(|| Error::precondition("no keystore configured"))
    }

    /// Secret store, failing if none was attached
    pub fn secret_store(&self) -> Result<&Arc<dyn SecretStore>> {
        self.secrets
            .as_ref()
            .ok_or_else(|| Error::precondition("no secret store configured"))
    }

    /// ACL oracle
    pub fn acl_oracle(&self) -> &dyn AclOracle {
        self.acl_oracle.as_ref()
    }

    /// Lifecycle for a task of `kind` that declares `declared`
    pub fn lifecycle_for(&self, kind: &str, declared: Lifecycle) -> Lifecycle {
        self.lifecycle_overrides
            .get(kind)
            .copied()
            .unwrap_or(declared)
    }

    /// Cancellation token of the run
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail if the run was cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled("task run"));
        }
        Ok(())
    }
}
