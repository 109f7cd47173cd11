use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::login::{LoginCredentials, LoginScript};
use super::session::{AuthSession, SessionOutcome};
use super::state::{FlowOutcome, FlowState, FlowStep};
use crate::auth::{AuthError, HttpLinkCodeClient, LinkCode, LinkCodeClient, PollResult};
use crate::browser::{BrowserError, BrowserLauncher, BrowserSession};
use crate::config::TidalauthConfig;
use crate::error::TidalauthError;
use crate::util::retry::{RetryError, RetryPolicy, RetryState};

/// Added to the poll interval each time the service asks us to slow down.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Knobs for one [`DeviceAuthOrchestrator`].
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Overall bound on the approval polling phase, on top of code expiry.
    pub poll_timeout_ceiling: Duration,
    /// Policy for link-code requests and each approval check.
    pub retry: RetryPolicy,
    /// Policy for each browser step.
    pub ui_retry: RetryPolicy,
    /// How long to look for the optional consent button.
    pub action_timeout: Duration,
    pub script: LoginScript,
    pub login: LoginCredentials,
}

impl FlowSettings {
    pub fn new(login: LoginCredentials) -> Self {
        Self {
            poll_timeout_ceiling: DEFAULT_POLL_TIMEOUT,
            retry: RetryPolicy::default(),
            ui_retry: RetryPolicy::for_ui(),
            action_timeout: Duration::from_millis(5_000),
            script: LoginScript::default(),
            login,
        }
    }

    pub fn with_poll_timeout_ceiling(mut self, ceiling: Duration) -> Self {
        self.poll_timeout_ceiling = ceiling;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ui_retry(mut self, retry: RetryPolicy) -> Self {
        self.ui_retry = retry;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_script(mut self, script: LoginScript) -> Self {
        self.script = script;
        self
    }
}

/// Why the flow stopped before reaching a [`FlowOutcome`] of its own.
enum Halt {
    Cancelled,
    Failed(TidalauthError),
}

impl From<TidalauthError> for Halt {
    fn from(error: TidalauthError) -> Self {
        Self::Failed(error)
    }
}

/// Clears the single-run flag however the run ends.
struct ActiveRun<'a>(&'a AtomicBool);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives one device-linking run end to end: request a link code, approve it
/// in the browser, then poll until the service reports an outcome.
///
/// The browser session is acquired at the start of [`run`](Self::run) and
/// closed exactly once before it returns, whichever way the run ends.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use tidalauth::browser::BrowserEngine;
/// use tidalauth::config::TidalauthConfig;
/// use tidalauth::flow::{AuthSession, DeviceAuthOrchestrator};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TidalauthConfig::from_env()?;
/// let engine = Arc::new(BrowserEngine::launch(config.browser.clone()).await?);
/// let orchestrator = DeviceAuthOrchestrator::from_config(&config, engine.clone())?;
///
/// let mut session = AuthSession::new();
/// let outcome = orchestrator.run(&mut session, &CancellationToken::new()).await?;
/// println!("{}", outcome.label());
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct DeviceAuthOrchestrator {
    client: Arc<dyn LinkCodeClient>,
    launcher: Arc<dyn BrowserLauncher>,
    settings: FlowSettings,
    active: AtomicBool,
}

impl fmt::Debug for DeviceAuthOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAuthOrchestrator")
            .field("settings", &self.settings)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl DeviceAuthOrchestrator {
    pub fn new(
        client: Arc<dyn LinkCodeClient>,
        launcher: Arc<dyn BrowserLauncher>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            client,
            launcher,
            settings,
            active: AtomicBool::new(false),
        }
    }

    /// Orchestrator talking to the configured TIDAL service.
    pub fn from_config(
        config: &TidalauthConfig,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self, TidalauthError> {
        let client = HttpLinkCodeClient::new(&config.service_base_url, config.client_identity.clone())?;
        Ok(Self::new(Arc::new(client), launcher, config.flow_settings()))
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Run the flow once on a fresh `session`.
    ///
    /// Expiry, denial and cancellation come back as [`FlowOutcome`] values;
    /// `Err` is reserved for faults (invalid client, exhausted retries, a dead
    /// browser, the poll ceiling). Either way `session` holds the final state.
    #[instrument(skip_all, fields(run_id = %session.run_id()))]
    pub async fn run(
        &self,
        session: &mut AuthSession,
        cancel: &CancellationToken,
    ) -> Result<FlowOutcome, TidalauthError> {
        if session.state() != FlowState::Init {
            return Err(TidalauthError::InvalidState(format!(
                "session {} has already run (state {})",
                session.run_id(),
                session.state()
            )));
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(TidalauthError::InvalidState(
                "another linking run is already active".to_string(),
            ));
        }
        let _active = ActiveRun(&self.active);

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            acquired = self.launcher.acquire() => Some(acquired),
        };
        let browser = match acquired {
            None => return self.conclude(session, Err(Halt::Cancelled)),
            Some(Err(error)) => return self.conclude(session, Err(Halt::Failed(error.into()))),
            Some(Ok(browser)) => browser,
        };

        let result = self.drive(session, browser.as_ref(), cancel).await;
        browser.close().await;
        self.conclude(session, result)
    }

    /// Record the terminal state on the session and map to the caller's result.
    fn conclude(
        &self,
        session: &mut AuthSession,
        result: Result<FlowOutcome, Halt>,
    ) -> Result<FlowOutcome, TidalauthError> {
        match result {
            Ok(outcome) => {
                session.finish(SessionOutcome::from(&outcome));
                match &outcome {
                    FlowOutcome::Succeeded(credential) => info!(
                        polls = session.polls(),
                        user_id = credential.user_id.as_deref().unwrap_or("unknown"),
                        "Device linked"
                    ),
                    other => info!(outcome = other.label(), polls = session.polls(), "Linking ended"),
                }
                Ok(outcome)
            }
            Err(Halt::Cancelled) => {
                let state = session.state();
                session.finish(SessionOutcome::Cancelled);
                info!(state = %state, "Linking cancelled");
                Ok(FlowOutcome::Cancelled)
            }
            Err(Halt::Failed(error)) => {
                session.finish(SessionOutcome::Failed(error.to_string()));
                warn!(error = %error, category = ?error.category(), "Linking failed");
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut AuthSession,
        browser: &dyn BrowserSession,
        cancel: &CancellationToken,
    ) -> Result<FlowOutcome, Halt> {
        session.transition(FlowState::CodeRequested)?;
        let code = self.request_code(session, cancel).await?;
        session.set_link_code(code.clone());

        self.present_code(session, browser, &code, cancel).await?;
        session.transition(FlowState::CodePresented)?;

        session.transition(FlowState::AwaitingApproval)?;
        self.await_approval(session, &code, cancel).await
    }

    async fn request_code(
        &self,
        session: &mut AuthSession,
        cancel: &CancellationToken,
    ) -> Result<LinkCode, Halt> {
        let client = self.client.as_ref();
        let mut state = RetryState::new();
        let result = self
            .settings
            .retry
            .run(&mut state, cancel, move || client.request_code(), AuthError::retry_decision)
            .await;
        session.record_attempts(FlowStep::RequestCode, state.attempts);
        result.map_err(|error| halt("Link code request", &state, error))
    }

    /// Walk the verification pages: code entry (unless pre-filled), login,
    /// and consent when it is shown.
    async fn present_code(
        &self,
        session: &mut AuthSession,
        browser: &dyn BrowserSession,
        code: &LinkCode,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        let script = &self.settings.script;
        let login = &self.settings.login;
        info!(code = %code.code, url = %code.presentation_url(), "Presenting link code");

        let url = code.presentation_url();
        self.ui_step(session, cancel, "Open verification page", move || browser.open(url))
            .await?;

        if code.verification_url_complete.is_none() {
            self.ui_step(session, cancel, "Enter link code", move || async move {
                browser.fill(&script.code_input, &code.code).await?;
                browser.click(&script.code_submit).await
            })
            .await?;
        }

        self.ui_step(session, cancel, "Enter email", move || async move {
            browser.fill(&script.email_input, &login.email).await?;
            browser.click(&script.email_submit).await
        })
        .await?;

        self.ui_step(session, cancel, "Enter password", move || async move {
            browser
                .fill(&script.password_input, login.password.expose())
                .await?;
            browser.click(&script.password_submit).await
        })
        .await?;

        let action_timeout = self.settings.action_timeout;
        let consented = self
            .ui_step(session, cancel, "Confirm consent", move || async move {
                match browser.wait_for_selector(&script.consent_button, action_timeout).await {
                    Ok(()) => browser.click(&script.consent_button).await.map(|()| true),
                    Err(BrowserError::ElementNotFound { .. }) => Ok(false),
                    Err(error) => Err(error),
                }
            })
            .await?;
        if !consented {
            debug!("No consent page shown");
        }
        Ok(())
    }

    async fn ui_step<T, F, Fut>(
        &self,
        session: &mut AuthSession,
        cancel: &CancellationToken,
        step: &str,
        operation: F,
    ) -> Result<T, Halt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrowserError>>,
    {
        debug!(step, "Browser step");
        let mut state = RetryState::new();
        let result = self
            .settings
            .ui_retry
            .run(&mut state, cancel, operation, BrowserError::retry_decision)
            .await;
        session.record_attempts(FlowStep::PresentCode, state.attempts);
        result.map_err(|error| halt(step, &state, error))
    }

    async fn await_approval(
        &self,
        session: &mut AuthSession,
        code: &LinkCode,
        cancel: &CancellationToken,
    ) -> Result<FlowOutcome, Halt> {
        let ceiling = self.settings.poll_timeout_ceiling;
        let deadline = Instant::now().checked_add(ceiling).unwrap_or(code.expires_at);
        let mut interval = code.poll_interval;
        let client = self.client.as_ref();

        loop {
            if code.is_expired() {
                return Ok(FlowOutcome::Expired);
            }
            if Instant::now() >= deadline {
                return Err(Halt::Failed(TidalauthError::PollTimeout(ceiling)));
            }

            session.count_poll();
            // Retries of one poll share the time left before the ceiling.
            let budget = deadline.saturating_duration_since(Instant::now());
            let capped = budget < self.settings.retry.max_elapsed;
            let policy = RetryPolicy {
                max_elapsed: budget.min(self.settings.retry.max_elapsed),
                ..self.settings.retry.clone()
            };
            let mut state = RetryState::new();
            let result = policy
                .run(
                    &mut state,
                    cancel,
                    move || async move {
                        // Retries may run into the expiry deadline.
                        if code.is_expired() {
                            return Ok(PollResult::Expired);
                        }
                        client.poll_status(code).await
                    },
                    AuthError::retry_decision,
                )
                .await;
            session.record_attempts(FlowStep::Poll, state.attempts);

            let result = match result {
                Err(RetryError::Exhausted { attempts, .. })
                    if capped && attempts < policy.max_attempts =>
                {
                    warn!(
                        attempts,
                        last_error = state.last_error.as_deref().unwrap_or("none"),
                        "Poll ceiling reached while retrying"
                    );
                    return Err(Halt::Failed(TidalauthError::PollTimeout(ceiling)));
                }
                other => other,
            };

            match result.map_err(|error| halt("Approval poll", &state, error))? {
                PollResult::Pending => {
                    debug!(poll = session.polls(), remaining = ?code.remaining(), "Approval pending");
                }
                PollResult::SlowDown => {
                    interval += SLOW_DOWN_STEP;
                    info!(interval = ?interval, "Service asked to slow down");
                }
                PollResult::Approved(credential) => return Ok(FlowOutcome::Succeeded(credential)),
                PollResult::Expired => return Ok(FlowOutcome::Expired),
                PollResult::Denied => return Ok(FlowOutcome::Denied),
            }

            let wake = (Instant::now() + interval).min(code.expires_at).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Halt::Cancelled),
                _ = sleep_until(wake) => {}
            }
        }
    }
}

fn halt<E>(operation: &str, state: &RetryState, error: RetryError<E>) -> Halt
where
    E: Into<TidalauthError>,
{
    match error {
        RetryError::Fatal(error) => Halt::Failed(error.into()),
        RetryError::Exhausted {
            attempts, elapsed, ..
        } => Halt::Failed(TidalauthError::RetryExhausted {
            operation: operation.to_string(),
            attempts,
            elapsed,
            last_error: state
                .last_error
                .clone()
                .unwrap_or_else(|| "no attempt completed".to_string()),
        }),
        RetryError::Cancelled => Halt::Cancelled,
    }
}
