use std::time::Duration;

use thiserror::Error;

use crate::util::retry::RetryDecision;

/// Browser-level failures, flattened from the driver's own error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),
    #[error("Navigation to {url} failed after {elapsed:?}: {reason}")]
    NavigationTimeout {
        url: String,
        elapsed: Duration,
        reason: String,
    },
    #[error("Element {selector} not found after {elapsed:?}")]
    ElementNotFound { selector: String, elapsed: Duration },
    #[error("Interaction with {selector} failed after {elapsed:?}: {message}")]
    Interaction {
        selector: String,
        elapsed: Duration,
        message: String,
    },
    #[error("Browser session is closed")]
    Closed,
}

impl BrowserError {
    /// UI timing flakiness is retried; a dead browser is not.
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            Self::NavigationTimeout { .. } | Self::ElementNotFound { .. } | Self::Interaction { .. } => {
                RetryDecision::Retryable
            }
            Self::Launch(_) | Self::Closed => RetryDecision::Fatal,
        }
    }
}
