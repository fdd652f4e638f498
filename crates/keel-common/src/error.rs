//! Error types for keel
//!
//! Every storage backend, secret store and task translates its native failure
//! idiom into one of these variants at its boundary. Callers branch on
//! [`Error::kind`] and never on provider error codes.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Coarse classification used by callers to decide how to react to a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The addressed object does not exist
    NotExist,
    /// A write-if-absent found the object already present
    AlreadyExists,
    /// Malformed input: bad URL, hash, version or an inadmissible change
    InvalidInput,
    /// A precondition of the operation does not hold
    PreconditionFailed,
    /// A failure the retry policy is willing to retry
    Transient,
    /// Everything else; aborts the current reconcile
    Fatal,
}

/// Main error type for keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Canonical not-found
    #[error("file does not exist: {path}")]
    NotExist {
        /// Location that was not found
        path: String,
    },

    /// Write-if-absent collision
    #[error("file already exists: {path}")]
    AlreadyExists {
        /// Location that already exists
        path: String,
    },

    /// Malformed input or an inadmissible change
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what's invalid
        message: String,
        /// The offending field (e.g. "Zone"), if known
        field: Option<String>,
    },

    /// Precondition of the operation does not hold
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the unmet precondition
        message: String,
    },

    /// Dependency cycle in the task graph
    #[error("dependency cycle detected: {from} -> {to}")]
    DependencyCycle {
        /// Task that depends on `to`
        from: String,
        /// Task that closes the cycle
        to: String,
    },

    /// Retryable failure from a remote service
    #[error("transient error [{context}]: {message}")]
    Transient {
        /// Where the error occurred (backend or service name)
        context: String,
        /// Description of what failed
        message: String,
    },

    /// A polling operation completed without error but never reached its goal
    #[error("timed out waiting for {operation}")]
    WaitTimeout {
        /// Operation that was being waited on
        operation: String,
    },

    /// Task asked to be retried later (e.g. an upstream resource is not ready)
    #[error("try again later: {message}")]
    TryAgainLater {
        /// Why the task could not complete yet
        message: String,
    },

    /// The operation was cancelled
    #[error("operation cancelled: {context}")]
    Cancelled {
        /// Operation that was cancelled
        context: String,
    },

    /// A task failed; wraps the underlying failure with the task identity
    #[error("error running task {kind}/{name}: {source}")]
    Task {
        /// Task kind (e.g. "Instance")
        kind: String,
        /// Task name
        name: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Local I/O failure
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Unrecoverable failure
    #[error("fatal error [{context}]: {message}")]
    Fatal {
        /// Where the error occurred
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a not-exist error for the given location
    pub fn not_exist(path: impl Into<String>) -> Self {
        Self::NotExist { path: path.into() }
    }

    /// Create an already-exists error for the given location
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Create an invalid-input error with the given message
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-input error naming the offending field
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Error returned when an update tries to change an immutable field
    pub fn cannot_change_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::InvalidInput {
            message: format!("field cannot be changed: {field}"),
            field: Some(field),
        }
    }

    /// Error returned when a create is missing a required field
    pub fn required_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::InvalidInput {
            message: format!("field is required: {field}"),
            field: Some(field),
        }
    }

    /// Create a precondition-failed error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: msg.into(),
        }
    }

    /// Create a transient error with context
    pub fn transient(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a wait-timeout error
    pub fn wait_timeout(operation: impl Into<String>) -> Self {
        Self::WaitTimeout {
            operation: operation.into(),
        }
    }

    /// Create a try-again-later error
    pub fn try_again_later(msg: impl Into<String>) -> Self {
        Self::TryAgainLater {
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Wrap an error with the identity of the task that produced it
    pub fn task(kind: impl Into<String>, name: impl Into<String>, source: Error) -> Self {
        Self::Task {
            kind: kind.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific document kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a fatal error with context
    pub fn fatal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fatal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist { .. } => ErrorKind::NotExist,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidInput { .. } | Self::Serialization { .. } => ErrorKind::InvalidInput,
            Self::PreconditionFailed { .. } | Self::DependencyCycle { .. } => {
                ErrorKind::PreconditionFailed
            }
            Self::Transient { .. } | Self::WaitTimeout { .. } | Self::TryAgainLater { .. } => {
                ErrorKind::Transient
            }
            Self::Task { source, .. } => source.kind(),
            Self::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotExist,
                std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut => {
                    ErrorKind::Transient
                }
                _ => ErrorKind::Fatal,
            },
            Self::Kube { source } => match source {
                kube::Error::Api(resp) if resp.code == 404 => ErrorKind::NotExist,
                kube::Error::Api(resp) if resp.code == 409 => ErrorKind::AlreadyExists,
                kube::Error::Api(resp) if resp.code == 429 || resp.code >= 500 => {
                    ErrorKind::Transient
                }
                kube::Error::Api(_) => ErrorKind::Fatal,
                _ => ErrorKind::Transient,
            },
            Self::Cancelled { .. } | Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns true if this is the canonical not-found condition
    pub fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::NotExist
    }

    /// Returns true if this is a write-if-absent collision
    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Returns true if the task asked to be requeued
    pub fn is_try_again_later(&self) -> bool {
        match self {
            Self::TryAgainLater { .. } => true,
            Self::Task { source, .. } => source.is_try_again_later(),
            _ => false,
        }
    }

    /// Returns true if this error is retryable
    ///
    /// Not-exist and invalid-input errors are terminal; wait timeouts are not
    /// retried by the caller that produced them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WaitTimeout { .. } => false,
            _ => self.kind() == ErrorKind::Transient,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
