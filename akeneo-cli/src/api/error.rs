//! Error taxonomy for Akeneo API calls

use thiserror::Error;

/// Errors surfaced by the Akeneo REST client.
///
/// `NotFound` is part of the normal control flow (type probing, orphan
/// detection); everything else is either a rejected payload or a failure of
/// the transport/auth layer itself.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested resource does not exist on the instance (HTTP 404)
    #[error("{resource} '{key}' not found")]
    NotFound { resource: &'static str, key: String },

    /// The instance rejected a write payload (HTTP 422), with field-level
    /// detail where the response carried any
    #[error("validation failed for '{key}': {message}")]
    Validation { key: String, message: String },

    /// Network failure, authentication failure, or an unexpected status code
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn not_found(resource: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
