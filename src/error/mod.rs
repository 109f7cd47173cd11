//! Error types for tidalauth.

pub mod unified;

pub use unified::{ErrorCategory, ExitCode, RecoverySuggestion};

use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthError;
use crate::browser::BrowserError;

/// Primary error type surfaced by the device-linking flow.
///
/// Transport and browser-driver errors never leak through this type: they are
/// flattened into [`AuthError`] and [`BrowserError`] at the adapter boundary.
#[derive(Error, Debug)]
pub enum TidalauthError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("{operation} failed after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    #[error("Approval polling exceeded the {0:?} ceiling")]
    PollTimeout(Duration),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TidalauthError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Auth(error) => match error {
                AuthError::InvalidClient(_) => ErrorCategory::Authentication,
                AuthError::Network(_) => ErrorCategory::Network,
                AuthError::Service { status, .. } => match status {
                    401 | 403 => ErrorCategory::Authentication,
                    408 => ErrorCategory::Timeout,
                    429 => ErrorCategory::RateLimit,
                    500..=599 => ErrorCategory::Server,
                    _ => ErrorCategory::Api,
                },
                AuthError::Parse(_) | AuthError::Serialization(_) => ErrorCategory::Serialization,
                AuthError::Io(_) => ErrorCategory::Unknown,
            },
            Self::Browser(error) => match error {
                BrowserError::NavigationTimeout { .. } => ErrorCategory::Timeout,
                _ => ErrorCategory::Browser,
            },
            Self::RetryExhausted { .. } => ErrorCategory::Exhausted,
            Self::PollTimeout(_) => ErrorCategory::Timeout,
            Self::InvalidState(_) | Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable by the invoking automation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
                | ErrorCategory::Exhausted
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::RateLimit
            | ErrorCategory::Network
            | ErrorCategory::Server
            | ErrorCategory::Exhausted => RecoverySuggestion::RetryLater,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Browser => match self {
                Self::Browser(BrowserError::Launch(_)) => RecoverySuggestion::CheckBrowserInstall,
                _ => RecoverySuggestion::CheckSelectors,
            },
            _ => RecoverySuggestion::ContactSupport,
        }
    }

    /// Process exit code for the invoking automation.
    pub fn exit_code(&self) -> ExitCode {
        match self.category() {
            ErrorCategory::Authentication => ExitCode::AuthFailure,
            ErrorCategory::Configuration => ExitCode::Configuration,
            _ => ExitCode::Infrastructure,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TidalauthError>;
