//! Error taxonomy shared by every provider.
//!
//! Document stores, embedders, and vector indexes all report failures as
//! [`ProviderError`] so the orchestrator can apply one retry policy and one
//! classification (fatal for the run vs. fatal for a single file).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Credential exchange failed or the provider rejected the token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The caller is authenticated but may not access this resource.
    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// The change-feed cursor is expired or was never valid.
    #[error("change-feed cursor is no longer valid: {0}")]
    InvalidCursor(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Server { .. }
                | ProviderError::Transport(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }

    /// Minimum delay the provider asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status code into the matching variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => ProviderError::Auth(format!("HTTP {}: {}", status, message)),
            403 => ProviderError::Forbidden(message),
            404 => ProviderError::NotFound(message),
            410 => ProviderError::InvalidCursor(message),
            429 => ProviderError::RateLimited { retry_after: None },
            s if s >= 500 => ProviderError::Server { status: s, message },
            s => ProviderError::Client { status: s, message },
        }
    }
}
