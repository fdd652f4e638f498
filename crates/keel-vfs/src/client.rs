//! Errors reported by remote storage clients and their translation

use keel_common::Error;
use thiserror::Error as ThisError;

/// Failure reported by an object-store, SFTP or Vault client
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{code} (status {status:?}): {message}")]
pub struct ClientError {
    /// HTTP-like status code, None for transport failures
    pub status: Option<u16>,
    /// Provider error code (e.g. `NoSuchKey`)
    pub code: String,
    /// Human-readable message
    pub message: String,
}

const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchKey",
    "NotFound",
    "NoSuchBucket",
    "NoSuchVersion",
    "BlobNotFound",
    "ContainerNotFound",
    "ResourceNotFound",
];

const CONFLICT_CODES: &[&str] = &["PreconditionFailed", "BlobAlreadyExists", "AlreadyExists"];

const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "RequestTimeout",
    "Throttling",
    "ThrottlingException",
    "InternalError",
    "ServiceUnavailable",
];

impl ClientError {
    /// Build from a status and provider code
    pub fn new(status: Option<u16>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// A 404 with the given provider code
    pub fn not_found(code: impl Into<String>) -> Self {
        Self::new(Some(404), code, "not found")
    }

    /// Transport failure with no response
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, "Transport", message)
    }

    /// True if the object (or its container) does not exist
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404) || NOT_FOUND_CODES.contains(&self.code.as_str())
    }

    /// True if a conditional write lost a race
    pub fn is_conflict(&self) -> bool {
        matches!(self.status, Some(409) | Some(412)) || CONFLICT_CODES.contains(&self.code.as_str())
    }

    /// True if repeating the request may succeed
    pub fn is_transient(&self) -> bool {
        match self.status {
            None => true,
            Some(s) if s == 429 || s >= 500 => true,
            _ => TRANSIENT_CODES.contains(&self.code.as_str()),
        }
    }

    /// Translate into the crate error for `path`
    pub fn into_error(self, backend: &str, path: &str) -> Error {
        if self.is_not_found() {
            Error::not_exist(path)
        } else if self.is_conflict() {
            Error::already_exists(path)
        } else if self.is_transient() {
            Error::transient(backend, format!("{path}: {self}"))
        } else {
            Error::fatal(backend, format!("{path}: {self}"))
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::new(
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("Unknown"),
                e.to_string(),
            ),
            None => Self::transport(e.to_string()),
        }
    }
}
