//! Blobs a task uploads (user data, manifests) rendered on demand

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use keel_common::Result;

/// Content produced when a task renders
#[async_trait]
pub trait Resource: fmt::Debug + Send + Sync {
    /// The full content
    async fn bytes(&self) -> Result<Vec<u8>>;
}

/// Shared resource handle
pub type ResourceRef = Arc<dyn Resource>;

/// A resource with fixed content
#[derive(Clone, PartialEq, Eq)]
pub struct BytesResource(Vec<u8>);

impl BytesResource {
    /// Resource holding `data`
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }
}

impl fmt::Debug for BytesResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BytesResource({} bytes)", self.0.len())
    }
}

#[async_trait]
impl Resource for BytesResource {
    async fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Lowercase hex SHA-256 of a resource
pub async fn resource_sha256(resource: &dyn Resource) -> Result<String> {
    Ok(hex::encode(Sha256::digest(resource.bytes().await?)))
}
