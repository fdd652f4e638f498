//! Why a bootstrap request was refused

/// Result of verifier operations
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Verification failure
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The token belongs to another provider; the next verifier may accept it
    #[error("incorrect authorization type")]
    NotThisVerifier,

    /// The token names a server the cloud does not know
    #[error("server not found: {0}")]
    UnknownServer(String),

    /// The server exists but may not join this cluster
    #[error("verification rejected: {0}")]
    Rejected(String),

    /// Cloud or metadata lookups failed
    #[error(transparent)]
    Cloud(#[from] keel_common::Error),
}

impl VerifyError {
    /// Rejection with `message`
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// True when another verifier should be tried
    pub fn is_not_this_verifier(&self) -> bool {
        matches!(self, Self::NotThisVerifier)
    }
}
