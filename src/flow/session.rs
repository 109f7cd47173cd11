use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::state::{FlowOutcome, FlowState, FlowStep};
use crate::auth::{Credential, LinkCode};
use crate::error::TidalauthError;

/// Terminal record kept on the session once a run ends.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Succeeded(Credential),
    Expired,
    Denied,
    Cancelled,
    Failed(String),
}

/// Bookkeeping for one run of the linking flow.
///
/// Owned by the caller and lent mutably to
/// [`DeviceAuthOrchestrator::run`](super::DeviceAuthOrchestrator::run) for the
/// duration of the run, so it can be inspected afterwards.
#[derive(Debug)]
pub struct AuthSession {
    run_id: Uuid,
    state: FlowState,
    history: Vec<FlowState>,
    link_code: Option<LinkCode>,
    attempts: HashMap<FlowStep, u32>,
    polls: u32,
    outcome: Option<SessionOutcome>,
    started: Instant,
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: FlowState::Init,
            history: vec![FlowState::Init],
            link_code: None,
            attempts: HashMap::new(),
            polls: 0,
            outcome: None,
            started: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Every state the run has been in, in order.
    pub fn history(&self) -> &[FlowState] {
        &self.history
    }

    pub fn link_code(&self) -> Option<&LinkCode> {
        self.link_code.as_ref()
    }

    /// Attempts made so far for `step`, summed across every retried call.
    pub fn attempts(&self, step: FlowStep) -> u32 {
        self.attempts.get(&step).copied().unwrap_or(0)
    }

    /// Approval checks issued (each may have taken several attempts).
    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn transition(&mut self, next: FlowState) -> Result<(), TidalauthError> {
        if !self.state.can_transition_to(next) {
            return Err(TidalauthError::InvalidState(format!(
                "cannot move from {} to {next}",
                self.state
            )));
        }
        tracing::debug!(run_id = %self.run_id, from = %self.state, to = %next, "Flow transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    pub(crate) fn set_link_code(&mut self, code: LinkCode) {
        self.link_code = Some(code);
    }

    pub(crate) fn record_attempts(&mut self, step: FlowStep, attempts: u32) {
        *self.attempts.entry(step).or_insert(0) += attempts;
    }

    pub(crate) fn count_poll(&mut self) {
        self.polls += 1;
    }

    /// Move to the matching terminal state and drop the link code.
    pub(crate) fn finish(&mut self, outcome: SessionOutcome) {
        let terminal = match outcome {
            SessionOutcome::Succeeded(_) => FlowState::Succeeded,
            _ => FlowState::Failed,
        };
        if !self.state.is_terminal() && self.transition(terminal).is_err() {
            self.state = FlowState::Failed;
            self.history.push(FlowState::Failed);
        }
        self.link_code = None;
        self.outcome = Some(outcome);
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&FlowOutcome> for SessionOutcome {
    fn from(outcome: &FlowOutcome) -> Self {
        match outcome {
            FlowOutcome::Succeeded(credential) => Self::Succeeded(credential.clone()),
            FlowOutcome::Expired => Self::Expired,
            FlowOutcome::Denied => Self::Denied,
            FlowOutcome::Cancelled => Self::Cancelled,
        }
    }
}
