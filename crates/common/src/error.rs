//! Error types for the block storage service

use thiserror::Error;

/// Result type alias using the block storage Error
pub type Result<T> = std::result::Result<T, Error>;

/// Block storage error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Service error {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`].
///
/// Callers branch on the kind instead of on transport details such as HTTP
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Timeout,
    /// Throttling or server-side failures that may succeed on retry
    Transient,
    Internal,
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Service {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict(_)
            | Error::InvalidStateTransition { .. } => ErrorKind::Conflict,
            Error::InvalidConfig(_) => ErrorKind::InvalidInput,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Service { status, .. } => match status {
                404 => ErrorKind::NotFound,
                409 | 412 => ErrorKind::Conflict,
                400 | 401 | 403 => ErrorKind::InvalidInput,
                429 | 500..=599 => ErrorKind::Transient,
                _ => ErrorKind::Internal,
            },
            Error::Io(_) | Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::not_found("volume_backup", "ocid1.x").is_not_found());
        assert!(Error::service(404, "NotAuthorizedOrNotFound", "gone").is_not_found());
        assert!(!Error::service(500, "InternalError", "boom").is_not_found());
    }

    #[test]
    fn test_retryable_only_for_transient() {
        assert!(Error::service(429, "TooManyRequests", "slow down").is_retryable());
        assert!(Error::service(503, "ServiceUnavailable", "later").is_retryable());
        assert!(!Error::service(409, "Conflict", "busy").is_retryable());
        assert!(!Error::Timeout { seconds: 5 }.is_retryable());
        assert_eq!(
            Error::InvalidStateTransition {
                from: "TERMINATED".into(),
                to: "AVAILABLE".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
    }
}
