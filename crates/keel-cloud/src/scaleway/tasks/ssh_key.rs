//! Project SSH key

use async_trait::async_trait;
use base64::Engine;
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::json;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, Output, TerraformTarget};

use crate::scaleway::{ScwCloudHandle, ScwContext};

/// Colon-separated MD5 fingerprint of an OpenSSH public key
///
/// Only the key blob is hashed, so comments and surrounding whitespace do
/// not change the result.
pub fn openssh_fingerprint(public_key: &str) -> Result<String> {
    let mut fields = public_key.split_whitespace();
    let blob = match (fields.next(), fields.next()) {
        (Some(_algorithm), Some(blob)) => blob,
        _ => return Err(Error::invalid_input("public key is not in OpenSSH format")),
    };
    let raw = base64::engine::general_purpose::STANDARD
        .decode(blob)
        .map_err(|e| Error::invalid_input(format!("decoding public key: {e}")))?;
    let digest = Md5::digest(&raw);
    Ok(digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":"))
}

/// A public key registered with the project
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyTask {
    /// Key name
    pub name: String,
    /// Backend ID
    pub id: Output<String>,
    /// OpenSSH public key
    #[serde(skip)]
    pub public_key: String,
    /// MD5 fingerprint of `public_key`
    pub fingerprint: Option<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl SshKeyTask {
    /// Register `public_key` as `name`
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Result<Self> {
        let public_key = public_key.into();
        let fingerprint = openssh_fingerprint(&public_key)?;
        Ok(Self {
            name: name.into(),
            id: Output::new(),
            public_key,
            fingerprint: Some(fingerprint),
            lifecycle: Lifecycle::Sync,
        })
    }
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for SshKeyTask {
    const KIND: &'static str = "SSHKey";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let Some(fingerprint) = &self.fingerprint else {
            return Ok(None);
        };
        let keys = ctx.cloud().list_ssh_keys().await?;
        // The backend prefixes the fingerprint with the key size and appends
        // the comment, so only containment is checked.
        let Some(key) = keys.into_iter().find(|k| k.fingerprint.contains(fingerprint.as_str())) else {
            return Ok(None);
        };
        self.id.set(key.id.clone());
        Ok(Some(Self {
            name: self.name.clone(),
            id: Output::with_value(key.id),
            public_key: key.public_key,
            fingerprint: Some(fingerprint.clone()),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        if actual.is_none() && self.public_key.trim().is_empty() {
            return Err(Error::required_field("PublicKey"));
        }
        Ok(())
    }

    async fn render_api(&self, ctx: &ScwContext, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        let key = ctx.cloud().create_ssh_key(&self.name, &self.public_key).await?;
        self.id.set(key.id);
        Ok(())
    }

    async fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "scaleway_iam_ssh_key",
            &self.name,
            json!({ "name": self.name, "public_key": self.public_key }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scaleway::tasks::test_support::{api, dry_run};
    use crate::scaleway::testing::FakeScwCloud;
    use crate::scaleway::ScwCloud;
    use keel_tasks::Task;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGJyb2tlbi1rZXktZm9yLXRlc3Rz admin@example.com";

    #[test]
    fn fingerprint_ignores_the_comment() {
        let a = openssh_fingerprint(KEY).unwrap();
        let b = openssh_fingerprint("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGJyb2tlbi1rZXktZm9yLXRlc3Rz").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.split(':').count(), 16);
        assert!(a.chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(openssh_fingerprint("not-a-key").is_err());
        assert!(openssh_fingerprint("ssh-rsa !!!").is_err());
    }

    #[tokio::test]
    async fn registered_key_is_matched_by_fingerprint() {
        let cloud = Arc::new(FakeScwCloud::default());
        cloud.create_ssh_key("someone-else-named-it", KEY).await.unwrap();

        let task = SshKeyTask::new("kubernetes.demo.example.com", KEY).unwrap();
        let (ctx, target) = dry_run(&cloud);
        Task::run(&task, &ctx).await.unwrap();
        assert!(target.has_no_changes());
        assert!(task.id.is_set());
    }

    #[tokio::test]
    async fn missing_key_is_created_once() {
        let cloud = Arc::new(FakeScwCloud::default());
        let ctx = api(&cloud);
        let task = SshKeyTask::new("kubernetes.demo.example.com", KEY).unwrap();
        Task::run(&task, &ctx).await.unwrap();
        Task::run(&task, &ctx).await.unwrap();
        assert_eq!(cloud.call_count("create_ssh_key"), 1);
        assert_eq!(task.id.get().as_deref(), Some("key-0001"));
    }
}
