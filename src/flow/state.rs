use strum::Display;

use crate::auth::Credential;
use crate::error::ExitCode;

/// Position of a run in the linking state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FlowState {
    Init,
    CodeRequested,
    CodePresented,
    AwaitingApproval,
    Succeeded,
    Failed,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Forward edges of the state machine. Any live state may fail.
    pub fn can_transition_to(self, next: FlowState) -> bool {
        use FlowState::*;
        match (self, next) {
            (Init, CodeRequested)
            | (CodeRequested, CodePresented)
            | (CodePresented, AwaitingApproval)
            | (AwaitingApproval, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Named steps whose attempts are counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FlowStep {
    RequestCode,
    PresentCode,
    Poll,
}

/// How a run ended, when it did not end in an error.
///
/// Expiry and denial are expected endings, not faults.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    Succeeded(Credential),
    Expired,
    Denied,
    Cancelled,
}

impl FlowOutcome {
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Succeeded(credential) => Some(credential),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Succeeded(_) => ExitCode::Success,
            Self::Expired | Self::Denied => ExitCode::AuthFailure,
            Self::Cancelled => ExitCode::Cancelled,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Expired => "expired",
            Self::Denied => "denied",
            Self::Cancelled => "cancelled",
        }
    }
}
