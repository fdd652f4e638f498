//! Keysets: versioned key material with one primary item

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use keel_common::{Error, Result};

/// A named set of key versions
///
/// Stored as YAML at `pki/private/<name>/keyset.yaml` in the VFS keystore,
/// or as a custom resource in the Kubernetes secret store.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kops.k8s.io",
    version = "v1alpha2",
    kind = "Keyset",
    plural = "keysets",
    namespaced,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct KeysetSpec {
    /// What the items hold
    #[serde(rename = "type")]
    pub keyset_type: KeysetType,
    /// Id of the item used for new signatures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<String>,
    /// All versions, oldest first
    #[serde(default)]
    pub keys: Vec<KeysetItem>,
}

/// Kind of material in a keyset
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum KeysetType {
    /// PEM certificate plus PEM private key
    #[default]
    Keypair,
    /// Opaque secret bytes, base64 in `privateMaterial`
    Secret,
}

/// One version of key material
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeysetItem {
    /// Version id (certificate serial for keypairs)
    pub id: String,
    /// Certificate PEM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_material: Option<String>,
    /// Private key PEM, or base64 secret data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_material: Option<String>,
    /// Marks a retired version that is still trusted
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub distrusted: bool,
}

impl KeysetItem {
    /// Keypair item
    pub fn keypair(id: impl Into<String>, certificate_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_material: Some(certificate_pem.into()),
            private_material: Some(key_pem.into()),
            distrusted: false,
        }
    }
}

impl Keyset {
    /// Empty keyset of `keyset_type`
    pub fn empty(name: &str, keyset_type: KeysetType) -> Self {
        Keyset::new(
            name,
            KeysetSpec {
                keyset_type,
                ..Default::default()
            },
        )
    }

    /// Keyset name (metadata.name)
    pub fn keyset_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The primary item
    pub fn primary(&self) -> Option<&KeysetItem> {
        let id = self.spec.primary_id.as_deref()?;
        self.spec.keys.iter().find(|k| k.id == id)
    }

    /// Item with `id`
    pub fn item(&self, id: &str) -> Option<&KeysetItem> {
        self.spec.keys.iter().find(|k| k.id == id)
    }

    /// Add `item`, replacing any item with the same id
    pub fn add_item(&mut self, item: KeysetItem, make_primary: bool) {
        if make_primary {
            self.spec.primary_id = Some(item.id.clone());
        }
        match self.spec.keys.iter_mut().find(|k| k.id == item.id) {
            Some(existing) => *existing = item,
            None => self.spec.keys.push(item),
        }
    }

    /// Copy with all private material removed
    pub fn public_only(&self) -> Keyset {
        let mut public = self.clone();
        for key in &mut public.spec.keys {
            key.private_material = None;
        }
        public.metadata.resource_version = None;
        public
    }

    /// Check that the primary id names an existing item
    pub fn validate(&self) -> Result<()> {
        let name = self.keyset_name();
        if name.is_empty() {
            return Err(Error::required_field("metadata.name"));
        }
        if self.spec.keys.is_empty() {
            return Ok(());
        }
        let Some(primary) = self.spec.primary_id.as_deref() else {
            return Err(Error::required_field(format!("keyset {name} spec.primaryId")));
        };
        if self.item(primary).is_none() {
            return Err(Error::invalid_field(
                "spec.primaryId",
                format!("keyset {name} has no item with id {primary}"),
            ));
        }
        let mut ids: Vec<&str> = self.spec.keys.iter().map(|k| k.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::invalid_field(
                "spec.keys",
                format!("keyset {name} has duplicate item ids"),
            ));
        }
        Ok(())
    }
}
