#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tidalauth::auth::{AuthError, Credential, LinkCode, LinkCodeClient, PollResult};
use tidalauth::browser::{BrowserError, BrowserLauncher, BrowserSession, Selector};
use tidalauth::flow::{DeviceAuthOrchestrator, FlowSettings, LoginCredentials};
use tidalauth::util::retry::RetryPolicy;
use tokio::time::Instant;

pub const VERIFICATION_URL: &str = "https://link.tidal.com";

/// Shape of the link code the scripted client hands out.
#[derive(Debug, Clone)]
pub struct CodeTemplate {
    pub code: String,
    pub expires_in: Duration,
    pub poll_interval: Duration,
    pub prefilled: bool,
}

impl CodeTemplate {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            expires_in: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            prefilled: true,
        }
    }

    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn without_prefilled_url(mut self) -> Self {
        self.prefilled = false;
        self
    }

    fn issue(&self) -> LinkCode {
        let code = LinkCode::new(
            self.code.clone(),
            format!("device-{}", self.code),
            VERIFICATION_URL,
            self.expires_in,
            self.poll_interval,
        );
        if self.prefilled {
            code.with_complete_url(format!("{VERIFICATION_URL}/{}", self.code))
        } else {
            code
        }
    }
}

/// [`LinkCodeClient`] replaying queued responses. Polls past the queue
/// report `Pending`.
pub struct ScriptedLinkClient {
    template: CodeTemplate,
    request_failures: Mutex<VecDeque<AuthError>>,
    polls: Mutex<VecDeque<Result<PollResult, AuthError>>>,
    request_calls: AtomicU32,
    poll_calls: Mutex<Vec<Instant>>,
    issued: Mutex<Option<LinkCode>>,
}

impl ScriptedLinkClient {
    pub fn new(template: CodeTemplate) -> Self {
        Self {
            template,
            request_failures: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            request_calls: AtomicU32::new(0),
            poll_calls: Mutex::new(Vec::new()),
            issued: Mutex::new(None),
        }
    }

    pub fn fail_requests(self, errors: impl IntoIterator<Item = AuthError>) -> Self {
        self.request_failures
            .lock()
            .expect("lock poisoned")
            .extend(errors);
        self
    }

    pub fn with_polls(self, polls: impl IntoIterator<Item = Result<PollResult, AuthError>>) -> Self {
        self.polls.lock().expect("lock poisoned").extend(polls);
        self
    }

    pub fn request_calls(&self) -> u32 {
        self.request_calls.load(Ordering::SeqCst)
    }

    /// Instants at which the service was actually contacted for a poll.
    pub fn poll_calls(&self) -> Vec<Instant> {
        self.poll_calls.lock().expect("lock poisoned").clone()
    }

    pub fn issued(&self) -> Option<LinkCode> {
        self.issued.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl LinkCodeClient for ScriptedLinkClient {
    async fn request_code(&self) -> Result<LinkCode, AuthError> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.request_failures.lock().expect("lock poisoned").pop_front() {
            return Err(error);
        }
        let code = self.template.issue();
        *self.issued.lock().expect("lock poisoned") = Some(code.clone());
        Ok(code)
    }

    async fn poll_status(&self, code: &LinkCode) -> Result<PollResult, AuthError> {
        if code.is_expired() {
            return Ok(PollResult::Expired);
        }
        self.poll_calls.lock().expect("lock poisoned").push(Instant::now());
        self.polls
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or(Ok(PollResult::Pending))
    }
}

/// Browser double recording every action as `"<action> <target>"`.
pub struct RecordingBrowser {
    actions: Mutex<Vec<String>>,
    closes: AtomicU32,
    failures: Mutex<HashMap<String, VecDeque<BrowserError>>>,
    consent_shown: AtomicBool,
}

impl RecordingBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(Vec::new()),
            closes: AtomicU32::new(0),
            failures: Mutex::new(HashMap::new()),
            consent_shown: AtomicBool::new(true),
        })
    }

    /// Make the next `times` calls of `action` (e.g. `"fill #email"`) fail.
    pub fn fail(&self, action: &str, error: BrowserError, times: usize) {
        self.failures
            .lock()
            .expect("lock poisoned")
            .entry(action.to_string())
            .or_default()
            .extend(std::iter::repeat(error).take(times));
    }

    pub fn hide_consent(&self) {
        self.consent_shown.store(false, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().expect("lock poisoned").clone()
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, action: &str, target: &str) -> Result<(), BrowserError> {
        let key = format!("{action} {target}");
        self.actions.lock().expect("lock poisoned").push(key.clone());
        if self.closes() > 0 {
            return Err(BrowserError::Closed);
        }
        match self
            .failures
            .lock()
            .expect("lock poisoned")
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct BrowserHandle(Arc<RecordingBrowser>);

#[async_trait]
impl BrowserSession for BrowserHandle {
    async fn open(&self, url: &str) -> Result<(), BrowserError> {
        self.0.record("open", url)
    }

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.0.record("wait", &selector.to_string())?;
        if self.0.consent_shown.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
                elapsed: timeout,
            })
        }
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        self.0.record("fill", &selector.to_string())?;
        self.0
            .actions
            .lock()
            .expect("lock poisoned")
            .push(format!("type {text}"));
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        self.0.record("click", &selector.to_string())
    }

    async fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Launcher handing out the shared [`RecordingBrowser`].
pub struct FakeLauncher {
    browser: Arc<RecordingBrowser>,
    launch_error: Option<BrowserError>,
    acquisitions: AtomicU32,
}

impl FakeLauncher {
    pub fn new(browser: Arc<RecordingBrowser>) -> Self {
        Self {
            browser,
            launch_error: None,
            acquisitions: AtomicU32::new(0),
        }
    }

    pub fn failing(error: BrowserError) -> Self {
        Self {
            browser: RecordingBrowser::new(),
            launch_error: Some(error),
            acquisitions: AtomicU32::new(0),
        }
    }

    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn acquire(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        if let Some(error) = &self.launch_error {
            return Err(error.clone());
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BrowserHandle(self.browser.clone())))
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter_fraction: 0.0,
        max_elapsed: Duration::from_secs(30),
    }
}

pub fn settings() -> FlowSettings {
    FlowSettings::new(LoginCredentials::new("listener@example.com", "correct-horse"))
        .with_retry(fast_retry(3))
        .with_ui_retry(fast_retry(3))
        .with_action_timeout(Duration::from_secs(1))
}

pub fn orchestrator(
    client: &Arc<ScriptedLinkClient>,
    launcher: &Arc<FakeLauncher>,
    settings: FlowSettings,
) -> DeviceAuthOrchestrator {
    DeviceAuthOrchestrator::new(client.clone(), launcher.clone(), settings)
}

pub fn credential(access_token: &str) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: Some("refresh-1".to_string()),
        token_type: "Bearer".to_string(),
        expires_at: None,
        scope: Some("r_usr w_usr w_sub".to_string()),
        user_id: Some("4242".to_string()),
        country_code: Some("NO".to_string()),
        issued_at: Utc::now(),
    }
}
