//! Error taxonomy shared by the cache, the transport and the coordinator.

use std::fmt;

use thiserror::Error;

/// Failure reported by the remote store or the transport reaching it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn unexpected_shape(message: impl Into<String>) -> Self {
        Self::UnexpectedShape(message.into())
    }

    /// Authentication failures end the session.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Auth(_) => ErrorKind::Auth,
            Self::UnexpectedShape(_) => ErrorKind::UnexpectedShape,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network(message)
            | Self::Validation(message)
            | Self::NotFound(message)
            | Self::Auth(message)
            | Self::UnexpectedShape(message) => message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Validation,
    NotFound,
    Auth,
    UnexpectedShape,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Auth => "auth",
            Self::UnexpectedShape => "unexpected_shape",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a cache entry after a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&RemoteError> for ErrorInfo {
    fn from(error: &RemoteError) -> Self {
        Self {
            kind: error.kind(),
            message: error.message().to_string(),
        }
    }
}

impl From<RemoteError> for ErrorInfo {
    fn from(error: RemoteError) -> Self {
        Self::from(&error)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Failure of a mutation submitted through the coordinator.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("unknown content family `{0}`")]
    UnknownFamily(String),
    #[error("{operation} on `{family}` requires a target id")]
    MissingTarget {
        family: String,
        operation: &'static str,
    },
}

/// Failure while deriving or applying cache post-conditions of a write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("written entity has no `{0}` field")]
    MissingId(String),
    #[error("write returned no entity to reconcile")]
    EmptyResponse,
    #[error("write response could not be read: {0}")]
    UnreadableResponse(String),
    #[error("cached view `{0}` does not hold a collection")]
    NotAList(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_info_keeps_kind_and_message() {
        let info = ErrorInfo::from(RemoteError::not_found("news 9"));
        assert_eq!(info.kind, ErrorKind::NotFound);
        assert_eq!(info.message, "news 9");
        assert_eq!(info.to_string(), "not_found: news 9");
    }

    #[test]
    fn only_auth_errors_end_the_session() {
        assert!(RemoteError::auth("expired").is_auth());
        assert!(!RemoteError::network("reset").is_auth());
    }
}
