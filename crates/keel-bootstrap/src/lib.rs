//! Node identity for keel bootstrap requests
//!
//! A booting node calls kops-controller with an `Authorization` header built
//! by an [`Authenticator`]. The controller hands that header to a
//! [`Verifier`], which checks it against the cloud and returns the names the
//! node may hold certificates for.
//!
//! ```text
//! node:        Authenticator::create_token(body) ──► "x-scaleway-instance-server-id <id>"
//! controller:  Verifier::verify_token(token, body) ──► VerifyResult
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod scaleway;
pub mod verifier;

pub use error::{Result, VerifyError};
pub use verifier::{Authenticator, ChainVerifier, Verifier, VerifyResult, CHALLENGE_PORT};
