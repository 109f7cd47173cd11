mod flow_support;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tidalauth::auth::{AuthError, PollResult};
use tidalauth::browser::{BrowserError, Selector};
use tidalauth::config::TidalauthConfig;
use tidalauth::error::{ExitCode, TidalauthError};
use tidalauth::flow::{AuthSession, DeviceAuthOrchestrator, FlowOutcome, FlowState, FlowStep, SessionOutcome};
use tidalauth::util::retry::RetryPolicy;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use flow_support::{
    credential, orchestrator, settings, CodeTemplate, FakeLauncher, RecordingBrowser,
    ScriptedLinkClient,
};

struct Harness {
    client: Arc<ScriptedLinkClient>,
    browser: Arc<RecordingBrowser>,
    launcher: Arc<FakeLauncher>,
}

impl Harness {
    fn new(client: ScriptedLinkClient) -> Self {
        let browser = RecordingBrowser::new();
        Self {
            client: Arc::new(client),
            launcher: Arc::new(FakeLauncher::new(browser.clone())),
            browser,
        }
    }

    async fn run(&self) -> (Result<FlowOutcome, TidalauthError>, AuthSession) {
        self.run_with(&CancellationToken::new()).await
    }

    async fn run_with(
        &self,
        cancel: &CancellationToken,
    ) -> (Result<FlowOutcome, TidalauthError>, AuthSession) {
        let orchestrator = orchestrator(&self.client, &self.launcher, settings());
        let mut session = AuthSession::new();
        let result = orchestrator.run(&mut session, cancel).await;
        (result, session)
    }

    fn assert_released_once(&self) {
        assert_eq!(self.launcher.acquisitions(), 1, "browser acquired once");
        assert_eq!(self.browser.closes(), 1, "browser released once");
    }
}

#[tokio::test(start_paused = true)]
async fn approval_after_three_pending_polls_yields_credential() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123")).with_polls([
            Ok(PollResult::Pending),
            Ok(PollResult::Pending),
            Ok(PollResult::Pending),
            Ok(PollResult::Approved(credential("tok_xyz"))),
        ]),
    );

    let (result, session) = harness.run().await;

    let outcome = result.expect("flow succeeds");
    assert_eq!(outcome.credential().map(|c| c.access_token.as_str()), Some("tok_xyz"));
    assert_eq!(outcome.exit_code(), ExitCode::Success);
    assert_eq!(
        session.history(),
        &[
            FlowState::Init,
            FlowState::CodeRequested,
            FlowState::CodePresented,
            FlowState::AwaitingApproval,
            FlowState::Succeeded,
        ]
    );
    assert_eq!(session.polls(), 4);
    assert!(matches!(session.outcome(), Some(SessionOutcome::Succeeded(_))));
    assert!(session.link_code().is_none(), "code is dropped after the run");
    harness.assert_released_once();

    let calls = harness.client.poll_calls();
    assert_eq!(calls.len(), 4);
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(5), "polls respect the interval");
    }
}

#[tokio::test(start_paused = true)]
async fn browser_walks_login_pages_before_polling() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123"))
            .with_polls([Ok(PollResult::Approved(credential("tok_xyz")))]),
    );

    let (result, _) = harness.run().await;
    assert!(result.is_ok());

    assert_eq!(
        harness.browser.actions(),
        vec![
            "open https://link.tidal.com/ABC-123",
            "fill #email",
            "type listener@example.com",
            r#"click button[type="submit"]"#,
            "fill #password",
            "type correct-horse",
            r#"click button[type="submit"]"#,
            "wait xpath=//button[contains(., 'Continue') or contains(., 'Yes')]",
            "click xpath=//button[contains(., 'Continue') or contains(., 'Yes')]",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn code_is_typed_when_no_prefilled_url_is_given() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123").without_prefilled_url())
            .with_polls([Ok(PollResult::Approved(credential("tok_xyz")))]),
    );

    let (result, _) = harness.run().await;
    assert!(result.is_ok());

    let actions = harness.browser.actions();
    assert_eq!(
        &actions[..4],
        &[
            "open https://link.tidal.com".to_string(),
            r#"fill input[name="code"]"#.to_string(),
            "type ABC-123".to_string(),
            r#"click button[type="submit"]"#.to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_consent_page_is_not_an_error() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123"))
            .with_polls([Ok(PollResult::Approved(credential("tok_xyz")))]),
    );
    harness.browser.hide_consent();

    let (result, _) = harness.run().await;

    assert!(matches!(result, Ok(FlowOutcome::Succeeded(_))));
    assert!(!harness
        .browser
        .actions()
        .iter()
        .any(|action| action.starts_with("click xpath=")));
}

#[tokio::test(start_paused = true)]
async fn pending_until_expiry_ends_expired_without_late_polls() {
    let harness = Harness::new(ScriptedLinkClient::new(
        CodeTemplate::new("ABC-123").expires_in(Duration::from_secs(20)),
    ));

    let (result, session) = harness.run().await;

    let outcome = result.expect("expiry is an outcome, not an error");
    assert!(matches!(outcome, FlowOutcome::Expired));
    assert_eq!(outcome.exit_code(), ExitCode::AuthFailure);
    assert_eq!(session.state(), FlowState::Failed);
    assert!(matches!(session.outcome(), Some(SessionOutcome::Expired)));

    let expires_at = harness.client.issued().expect("code issued").expires_at;
    let calls = harness.client.poll_calls();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|at| *at < expires_at), "no poll at or after expiry");
    harness.assert_released_once();
}

#[tokio::test(start_paused = true)]
async fn transient_request_failures_are_retried() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123"))
            .fail_requests([
                AuthError::Network("connection reset".to_string()),
                AuthError::Service {
                    status: 503,
                    message: "unavailable".to_string(),
                },
            ])
            .with_polls([Ok(PollResult::Approved(credential("tok_xyz")))]),
    );

    let (result, session) = harness.run().await;

    assert!(matches!(result, Ok(FlowOutcome::Succeeded(_))));
    assert_eq!(harness.client.request_calls(), 3);
    assert_eq!(session.attempts(FlowStep::RequestCode), 3);
    harness.assert_released_once();
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_awaiting_approval_releases_browser_first() {
    let harness = Harness::new(ScriptedLinkClient::new(
        CodeTemplate::new("ABC-123").expires_in(Duration::from_secs(600)),
    ));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let (result, session) = harness.run_with(&cancel).await;

    let outcome = result.expect("cancellation is an outcome");
    assert!(matches!(outcome, FlowOutcome::Cancelled));
    assert_eq!(outcome.exit_code(), ExitCode::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(13), "poll sleep aborted promptly");
    assert!(matches!(session.outcome(), Some(SessionOutcome::Cancelled)));
    assert_eq!(session.state(), FlowState::Failed);
    assert_eq!(
        session.history()[session.history().len() - 2],
        FlowState::AwaitingApproval
    );
    harness.assert_released_once();
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_start_acquires_nothing() {
    let harness = Harness::new(ScriptedLinkClient::new(CodeTemplate::new("ABC-123")));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (result, session) = harness.run_with(&cancel).await;

    assert!(matches!(result, Ok(FlowOutcome::Cancelled)));
    assert_eq!(harness.launcher.acquisitions(), 0);
    assert_eq!(harness.browser.closes(), 0);
    assert_eq!(harness.client.request_calls(), 0);
    assert_eq!(session.state(), FlowState::Failed);
}

#[tokio::test(start_paused = true)]
async fn denied_code_fails_with_auth_exit_code() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123"))
            .with_polls([Ok(PollResult::Pending), Ok(PollResult::Denied)]),
    );

    let (result, session) = harness.run().await;

    let outcome = result.expect("denial is an outcome");
    assert!(matches!(outcome, FlowOutcome::Denied));
    assert_eq!(outcome.exit_code(), ExitCode::AuthFailure);
    assert!(matches!(session.outcome(), Some(SessionOutcome::Denied)));
    harness.assert_released_once();
}

#[tokio::test(start_paused = true)]
async fn slow_down_widens_the_poll_interval() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123")).with_polls([
            Ok(PollResult::SlowDown),
            Ok(PollResult::Approved(credential("tok_xyz"))),
        ]),
    );

    let (result, _) = harness.run().await;
    assert!(result.is_ok());

    let calls = harness.client.poll_calls();
    assert_eq!(calls.len(), 2);
    let gap = calls[1] - calls[0];
    assert!(gap >= Duration::from_secs(10) && gap < Duration::from_secs(11), "gap {gap:?}");
}

#[tokio::test(start_paused = true)]
async fn flaky_ui_step_is_retried() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123"))
            .with_polls([Ok(PollResult::Approved(credential("tok_xyz")))]),
    );
    harness.browser.fail(
        "fill #email",
        BrowserError::ElementNotFound {
            selector: "#email".to_string(),
            elapsed: Duration::from_secs(5),
        },
        2,
    );

    let (result, session) = harness.run().await;

    assert!(matches!(result, Ok(FlowOutcome::Succeeded(_))));
    // open, email x3, password, consent
    assert_eq!(session.attempts(FlowStep::PresentCode), 6);
}

#[tokio::test(start_paused = true)]
async fn poll_ceiling_bounds_the_approval_phase() {
    let harness = Harness::new(ScriptedLinkClient::new(
        CodeTemplate::new("ABC-123").expires_in(Duration::from_secs(600)),
    ));
    let orchestrator = orchestrator(
        &harness.client,
        &harness.launcher,
        settings().with_poll_timeout_ceiling(Duration::from_secs(12)),
    );
    let mut session = AuthSession::new();

    let result = orchestrator.run(&mut session, &CancellationToken::new()).await;

    let error = result.expect_err("ceiling is a fault");
    assert!(matches!(error, TidalauthError::PollTimeout(_)));
    assert_eq!(error.exit_code(), ExitCode::Infrastructure);
    assert_eq!(harness.client.poll_calls().len(), 3);
    assert!(matches!(session.outcome(), Some(SessionOutcome::Failed(_))));
    harness.assert_released_once();
}

#[tokio::test(start_paused = true)]
async fn poll_ceiling_holds_while_a_poll_is_being_retried() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123").expires_in(Duration::from_secs(600)))
            .with_polls(
                std::iter::repeat_with(|| {
                    Err(AuthError::Service {
                        status: 503,
                        message: "unavailable".to_string(),
                    })
                })
                .take(4),
            ),
    );
    let retry = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(60),
        jitter_fraction: 0.0,
        max_elapsed: Duration::from_secs(120),
    };
    let orchestrator = orchestrator(
        &harness.client,
        &harness.launcher,
        settings()
            .with_retry(retry)
            .with_poll_timeout_ceiling(Duration::from_secs(12)),
    );
    let mut session = AuthSession::new();
    let started = Instant::now();

    let result = orchestrator.run(&mut session, &CancellationToken::new()).await;

    let error = result.expect_err("ceiling is a fault");
    assert!(matches!(error, TidalauthError::PollTimeout(_)), "unexpected error {error:?}");
    assert!(started.elapsed() < Duration::from_secs(13), "elapsed {:?}", started.elapsed());

    let calls = harness.client.poll_calls();
    assert_eq!(calls.len(), 2);
    let ceiling = started + Duration::from_secs(12);
    assert!(calls.iter().all(|at| *at < ceiling), "no poll after the ceiling");
    assert_eq!(session.attempts(FlowStep::Poll), 2);
    harness.assert_released_once();
}

#[tokio::test(start_paused = true)]
async fn cancellation_releases_browser_once_in_every_live_state() {
    struct Case {
        name: &'static str,
        client: ScriptedLinkClient,
        browser_failure: Option<(&'static str, BrowserError)>,
        cancel_after: Duration,
        interrupted: FlowState,
    }

    let cases = vec![
        Case {
            name: "backing off between link code requests",
            client: ScriptedLinkClient::new(CodeTemplate::new("ABC-123")).fail_requests(
                std::iter::repeat(AuthError::Network("connection reset".to_string())).take(3),
            ),
            browser_failure: None,
            cancel_after: Duration::from_millis(50),
            interrupted: FlowState::CodeRequested,
        },
        Case {
            name: "retrying a browser step",
            client: ScriptedLinkClient::new(CodeTemplate::new("ABC-123")),
            browser_failure: Some((
                "fill #email",
                BrowserError::ElementNotFound {
                    selector: "#email".to_string(),
                    elapsed: Duration::from_secs(1),
                },
            )),
            cancel_after: Duration::from_millis(150),
            interrupted: FlowState::CodeRequested,
        },
        Case {
            name: "sleeping between approval polls",
            client: ScriptedLinkClient::new(
                CodeTemplate::new("ABC-123").expires_in(Duration::from_secs(600)),
            ),
            browser_failure: None,
            cancel_after: Duration::from_secs(12),
            interrupted: FlowState::AwaitingApproval,
        },
    ];

    for case in cases {
        let harness = Harness::new(case.client);
        if let Some((action, error)) = case.browser_failure {
            harness.browser.fail(action, error, 10);
        }
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let cancel_after = case.cancel_after;
        tokio::spawn(async move {
            tokio::time::sleep(cancel_after).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let (result, session) = harness.run_with(&cancel).await;

        assert!(matches!(result, Ok(FlowOutcome::Cancelled)), "{}: {result:?}", case.name);
        assert!(
            started.elapsed() < case.cancel_after + Duration::from_secs(1),
            "{}: cancellation took {:?}",
            case.name,
            started.elapsed()
        );
        let history = session.history();
        assert_eq!(history[history.len() - 2], case.interrupted, "{}", case.name);
        assert!(
            matches!(session.outcome(), Some(SessionOutcome::Cancelled)),
            "{}",
            case.name
        );
        assert_eq!(
            harness.client.poll_calls().is_empty(),
            case.interrupted != FlowState::AwaitingApproval,
            "{}",
            case.name
        );
        assert_eq!(harness.launcher.acquisitions(), 1, "{}", case.name);
        assert_eq!(harness.browser.closes(), 1, "{}", case.name);
    }
}

#[tokio::test(start_paused = true)]
async fn orchestrator_from_config_carries_configured_settings() {
    let config = TidalauthConfig::from_lookup(|key: &str| {
        let value = match key {
            "TIDALAUTH_CLIENT_ID" => "client-abc",
            "TIDALAUTH_USER_EMAIL" => "listener@example.com",
            "TIDALAUTH_USER_PASSWORD" => "correct-horse",
            "TIDALAUTH_SERVICE_URL" => "http://127.0.0.1:9",
            "TIDALAUTH_POLL_TIMEOUT_SECS" => "45",
            "TIDALAUTH_EMAIL_INPUT_SELECTOR" => "id=username",
            _ => return None,
        };
        Some(value.to_string())
    })
    .expect("valid config");
    let launcher = Arc::new(FakeLauncher::new(RecordingBrowser::new()));

    let orchestrator =
        DeviceAuthOrchestrator::from_config(&config, launcher).expect("orchestrator builds");

    assert_eq!(orchestrator.settings().poll_timeout_ceiling, Duration::from_secs(45));
    assert_eq!(orchestrator.settings().script.email_input, Selector::id("username"));
    assert_eq!(orchestrator.settings().login.email, "listener@example.com");
}

#[tokio::test(start_paused = true)]
async fn browser_is_released_once_whichever_step_fails() {
    struct Case {
        name: &'static str,
        client: ScriptedLinkClient,
        browser_failure: Option<(&'static str, BrowserError)>,
        expect: fn(&TidalauthError) -> bool,
    }

    let cases = vec![
        Case {
            name: "invalid client while requesting code",
            client: ScriptedLinkClient::new(CodeTemplate::new("ABC-123"))
                .fail_requests([AuthError::InvalidClient("unknown client".to_string())]),
            browser_failure: None,
            expect: |e| matches!(e, TidalauthError::Auth(AuthError::InvalidClient(_))),
        },
        Case {
            name: "request retries exhausted",
            client: ScriptedLinkClient::new(CodeTemplate::new("ABC-123")).fail_requests(
                std::iter::repeat(AuthError::Network("unreachable".to_string())).take(3),
            ),
            browser_failure: None,
            expect: |e| matches!(e, TidalauthError::RetryExhausted { attempts: 3, .. }),
        },
        Case {
            name: "browser crashed while presenting code",
            client: ScriptedLinkClient::new(CodeTemplate::new("ABC-123")),
            browser_failure: Some(("open https://link.tidal.com/ABC-123", BrowserError::Closed)),
            expect: |e| matches!(e, TidalauthError::Browser(BrowserError::Closed)),
        },
        Case {
            name: "login form never appears",
            client: ScriptedLinkClient::new(CodeTemplate::new("ABC-123")),
            browser_failure: Some((
                "fill #password",
                BrowserError::ElementNotFound {
                    selector: "#password".to_string(),
                    elapsed: Duration::from_secs(5),
                },
            )),
            expect: |e| matches!(e, TidalauthError::RetryExhausted { attempts: 3, .. }),
        },
        Case {
            name: "poll rejected by service",
            client: ScriptedLinkClient::new(CodeTemplate::new("ABC-123")).with_polls([Err(
                AuthError::Service {
                    status: 400,
                    message: "invalid_grant".to_string(),
                },
            )]),
            browser_failure: None,
            expect: |e| matches!(e, TidalauthError::Auth(AuthError::Service { status: 400, .. })),
        },
    ];

    for case in cases {
        let harness = Harness::new(case.client);
        if let Some((action, error)) = case.browser_failure {
            harness.browser.fail(action, error, 10);
        }

        let (result, session) = harness.run().await;

        let error = result.expect_err(case.name);
        assert!((case.expect)(&error), "{}: unexpected error {error:?}", case.name);
        assert_eq!(session.state(), FlowState::Failed, "{}", case.name);
        assert!(
            matches!(session.outcome(), Some(SessionOutcome::Failed(_))),
            "{}",
            case.name
        );
        assert_eq!(harness.launcher.acquisitions(), 1, "{}", case.name);
        assert_eq!(harness.browser.closes(), 1, "{}", case.name);
    }
}

#[tokio::test(start_paused = true)]
async fn launch_failure_surfaces_without_a_session_to_release() {
    let client = Arc::new(ScriptedLinkClient::new(CodeTemplate::new("ABC-123")));
    let launcher = Arc::new(FakeLauncher::failing(BrowserError::Launch(
        "chrome not found".to_string(),
    )));
    let orchestrator = orchestrator(&client, &launcher, settings());
    let mut session = AuthSession::new();

    let error = orchestrator
        .run(&mut session, &CancellationToken::new())
        .await
        .expect_err("launch failure is fatal");

    assert!(matches!(error, TidalauthError::Browser(BrowserError::Launch(_))));
    assert_eq!(error.exit_code(), ExitCode::Infrastructure);
    assert_eq!(client.request_calls(), 0);
    assert_eq!(session.state(), FlowState::Failed);
}

#[tokio::test(start_paused = true)]
async fn a_session_cannot_be_run_twice() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123"))
            .with_polls([Ok(PollResult::Approved(credential("tok_xyz")))]),
    );
    let orchestrator = orchestrator(&harness.client, &harness.launcher, settings());
    let mut session = AuthSession::new();

    orchestrator
        .run(&mut session, &CancellationToken::new())
        .await
        .expect("first run succeeds");
    let error = orchestrator
        .run(&mut session, &CancellationToken::new())
        .await
        .expect_err("second run is rejected");

    assert!(matches!(error, TidalauthError::InvalidState(_)));
    assert_eq!(harness.client.request_calls(), 1);
    harness.assert_released_once();
}

#[tokio::test(start_paused = true)]
async fn only_one_run_is_active_at_a_time() {
    let harness = Harness::new(
        ScriptedLinkClient::new(CodeTemplate::new("ABC-123")).with_polls([
            Ok(PollResult::Pending),
            Ok(PollResult::Approved(credential("tok_xyz"))),
        ]),
    );
    let orchestrator = Arc::new(orchestrator(&harness.client, &harness.launcher, settings()));

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut session = AuthSession::new();
            orchestrator.run(&mut session, &CancellationToken::new()).await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut second = AuthSession::new();
    let error = orchestrator
        .run(&mut second, &CancellationToken::new())
        .await
        .expect_err("concurrent run is rejected");
    assert!(matches!(error, TidalauthError::InvalidState(_)));
    assert_eq!(second.state(), FlowState::Init);

    let outcome = first.await.expect("task joins").expect("first run succeeds");
    assert!(matches!(outcome, FlowOutcome::Succeeded(_)));
}
