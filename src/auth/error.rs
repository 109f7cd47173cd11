use thiserror::Error;

use crate::util::retry::RetryDecision;

/// Failures from the link-code endpoints and the credential sinks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Service error (status {status}): {message}")]
    Service { status: u16, message: String },
    #[error("Invalid response: {0}")]
    Parse(String),
    #[error("Invalid client identity: {0}")]
    InvalidClient(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Transport failures and server-side hiccups are retried; anything that
    /// points at our own request or identity is not.
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            Self::Network(_) => RetryDecision::Retryable,
            Self::Service { status, .. } if matches!(status, 408 | 429 | 500..=599) => {
                RetryDecision::Retryable
            }
            _ => RetryDecision::Fatal,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Parse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
