//! Secret payloads and the secret store contract

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use keel_common::api::Cluster;
use keel_common::{Error, Result};
use keel_vfs::{AclOracle, VfsPath};

/// Length of generated secrets
pub const GENERATED_SECRET_LEN: usize = 32;

/// Opaque secret bytes
///
/// Serialized as `{"Data": "<base64>"}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Payload
    #[serde(rename = "Data", serialize_with = "encode", deserialize_with = "decode")]
    pub data: Vec<u8>,
}

fn encode<S: Serializer>(data: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

fn decode<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(d)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(serde::de::Error::custom)
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes)", self.data.len())
    }
}

impl Secret {
    /// Secret holding `data`
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Random alphanumeric secret suitable for tokens and passwords
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_SECRET_LEN)
            .map(char::from)
            .collect();
        Self::new(token)
    }

    /// Payload as UTF-8
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.data)
            .map_err(|e| Error::invalid_input(format!("secret is not valid utf-8: {e}")))
    }

    /// JSON document stored in the state store
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored JSON document
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::serialization_for("Secret", format!("parsing secret: {e}")))
    }
}

/// Reject names that would escape the store directory
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::required_field("secret name"));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(Error::invalid_field(
            "secret name",
            format!("invalid secret name {name:?}"),
        ));
    }
    Ok(())
}

/// Named secrets belonging to one cluster
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The secret called `name`, if present
    async fn find_secret(&self, name: &str) -> Result<Option<Secret>>;

    /// The stored secret, creating it from `candidate` if absent
    ///
    /// Returns the secret actually stored and whether this call created it.
    /// Concurrent creators converge on a single value.
    async fn get_or_create_secret(&self, name: &str, candidate: &Secret) -> Result<(Secret, bool)>;

    /// Overwrite the secret called `name`
    async fn replace_secret(&self, name: &str, secret: &Secret) -> Result<Secret>;

    /// Names of all secrets, sorted
    async fn list_secrets(&self) -> Result<Vec<String>>;

    /// Delete the secret called `name`
    async fn delete_secret(&self, name: &str) -> Result<()>;

    /// Copy every secret into the VFS store rooted at `base`
    async fn mirror_to(&self, base: &VfsPath, oracle: &dyn AclOracle, cluster: &Cluster) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_format_is_base64_data_field() {
        let s = Secret::new("hunter2");
        let json = String::from_utf8(s.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"Data":"aHVudGVyMg=="}"#);
        assert_eq!(Secret::from_json(json.as_bytes()).unwrap(), s);
    }

    #[test]
    fn generated_secrets_are_alphanumeric() {
        let s = Secret::generate();
        assert_eq!(s.data.len(), GENERATED_SECRET_LEN);
        assert!(s.as_str().unwrap().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s, Secret::generate());
    }

    #[test]
    fn names_cannot_escape_the_store() {
        assert!(validate_secret_name("admin").is_ok());
        assert!(validate_secret_name("").is_err());
        assert!(validate_secret_name("../config").is_err());
        assert!(validate_secret_name("..").is_err());
    }

    #[test]
    fn debug_does_not_leak_payload() {
        assert_eq!(format!("{:?}", Secret::new("hunter2")), "Secret(7 bytes)");
    }
}
