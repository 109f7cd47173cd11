//! Error classification, recovery hints and process exit codes.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Browser,
    Exhausted,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryLater,
    CheckCredentials,
    CheckConfiguration,
    CheckBrowserInstall,
    CheckSelectors,
    IncreaseTimeout,
    ContactSupport,
}

/// Exit codes the binary reports so callers can branch on the failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// The service refused the link: code expired, user denied, or the client
    /// identity is invalid.
    AuthFailure,
    /// Network, browser or timeout trouble; worth retrying later.
    Infrastructure,
    Configuration,
    Cancelled,
}

impl ExitCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::AuthFailure => 2,
            Self::Infrastructure => 3,
            Self::Configuration => 4,
            Self::Cancelled => 130,
        }
    }
}
