//! Convenience re-exports for common use.

pub use crate::auth::{Credential, CredentialSink, LinkCode, LinkCodeClient, PollResult};
pub use crate::browser::{BrowserEngine, BrowserLauncher, BrowserSession, BrowserSettings};
pub use crate::config::TidalauthConfig;
pub use crate::error::{ExitCode, Result, TidalauthError};
pub use crate::flow::{AuthSession, DeviceAuthOrchestrator, FlowOutcome, FlowSettings, FlowState};
pub use crate::util::retry::{RetryDecision, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
