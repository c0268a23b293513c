use thiserror::Error;

use crate::cache::{ErrorInfo, MutationError, RemoteError};
use crate::config::LoadError;
use crate::infra::error::InfraError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("loading `{key}` failed: {error}")]
    Fetch { key: String, error: ErrorInfo },
    #[error("unknown content family `{0}`")]
    UnknownFamily(String),
    #[error("`{family}` has no {view} view")]
    UnsupportedView { family: String, view: &'static str },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("cache session ended while watching `{key}`; the backend rejected the credentials")]
    SessionEnded { key: String },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the backend rejected the session's credentials.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Remote(error) | Self::Mutation(MutationError::Remote(error)) => error.is_auth(),
            Self::Fetch { error, .. } => error.kind == crate::cache::ErrorKind::Auth,
            Self::SessionEnded { .. } => true,
            _ => false,
        }
    }
}
