//! Configuration loaded from the environment (optionally via a `.env` file).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::client::{ClientIdentity, DEFAULT_SCOPE, DEFAULT_SERVICE_URL};
use crate::browser::{BrowserSettings, Selector};
use crate::error::TidalauthError;
use crate::flow::{FlowSettings, LoginCredentials, LoginScript};
use crate::util::retry::RetryPolicy;

/// Desktop Chrome user agent sent by both the HTTP client and the browser.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const ENV_PREFIX: &str = "TIDALAUTH_";
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Everything a linking run needs, resolved from `TIDALAUTH_*` variables.
#[derive(Debug, Clone)]
pub struct TidalauthConfig {
    pub service_base_url: String,
    pub client_identity: ClientIdentity,
    /// Overall bound on the approval polling phase.
    pub poll_timeout_ceiling: Duration,
    pub retry: RetryPolicy,
    pub browser: BrowserSettings,
    pub login: LoginCredentials,
    /// Selectors for the verification pages; each can be overridden with a
    /// `TIDALAUTH_*_SELECTOR` variable.
    pub script: LoginScript,
}

impl TidalauthConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, TidalauthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. `lookup` receives full
    /// variable names such as `TIDALAUTH_CLIENT_ID`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TidalauthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let mut client_identity = ClientIdentity::new(vars.required("CLIENT_ID")?)
            .with_scope(vars.string("SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_string()));
        if let Some(secret) = vars.string("CLIENT_SECRET") {
            client_identity = client_identity.with_secret(secret);
        }

        let login = LoginCredentials::new(
            vars.required("USER_EMAIL")?,
            Secret::from(vars.required("USER_PASSWORD")?),
        );

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: vars.parse("RETRY_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            base_delay: vars.millis("RETRY_BASE_DELAY_MS")?.unwrap_or(defaults.base_delay),
            max_delay: vars.millis("RETRY_MAX_DELAY_MS")?.unwrap_or(defaults.max_delay),
            jitter_fraction: vars
                .parse::<f64>("RETRY_JITTER")?
                .unwrap_or(defaults.jitter_fraction)
                .clamp(0.0, 1.0),
            max_elapsed: vars.secs("RETRY_MAX_ELAPSED_SECS")?.unwrap_or(defaults.max_elapsed),
        };
        if retry.max_attempts == 0 {
            return Err(TidalauthError::Configuration(format!(
                "{ENV_PREFIX}RETRY_MAX_ATTEMPTS must be at least 1"
            )));
        }

        let browser = BrowserSettings::builder()
            .headless(vars.parse_bool("HEADLESS")?.unwrap_or(true))
            .viewport_width(vars.parse("VIEWPORT_WIDTH")?.unwrap_or(1920))
            .viewport_height(vars.parse("VIEWPORT_HEIGHT")?.unwrap_or(1080))
            .action_timeout(vars.millis("TIMEOUT_MS")?.unwrap_or(Duration::from_millis(5_000)))
            .settle_delay(vars.millis("SLEEP_MS")?.unwrap_or(Duration::from_millis(1_000)))
            .maybe_executable(vars.string("BROWSER_PATH").map(PathBuf::from))
            .build();

        let default_script = LoginScript::default();
        let script = LoginScript {
            code_input: vars.selector("CODE_INPUT_SELECTOR", default_script.code_input)?,
            code_submit: vars.selector("CODE_SUBMIT_SELECTOR", default_script.code_submit)?,
            email_input: vars.selector("EMAIL_INPUT_SELECTOR", default_script.email_input)?,
            email_submit: vars.selector("EMAIL_SUBMIT_SELECTOR", default_script.email_submit)?,
            password_input: vars.selector("PASSWORD_INPUT_SELECTOR", default_script.password_input)?,
            password_submit: vars.selector("PASSWORD_SUBMIT_SELECTOR", default_script.password_submit)?,
            consent_button: vars.selector("CONSENT_BUTTON_SELECTOR", default_script.consent_button)?,
        };

        Ok(Self {
            service_base_url: vars
                .string("SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            client_identity,
            poll_timeout_ceiling: vars
                .secs("POLL_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_POLL_TIMEOUT),
            retry,
            browser,
            login,
            script,
        })
    }

    pub fn headless(&self) -> bool {
        self.browser.headless
    }

    /// Orchestrator settings derived from this configuration.
    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings::new(self.login.clone())
            .with_script(self.script.clone())
            .with_retry(self.retry.clone())
            .with_poll_timeout_ceiling(self.poll_timeout_ceiling)
            .with_action_timeout(self.browser.action_timeout)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, TidalauthError> {
        self.string(name).ok_or_else(|| {
            TidalauthError::Configuration(format!("{ENV_PREFIX}{name} is required but not set"))
        })
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, TidalauthError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.string(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    TidalauthError::Configuration(format!(
                        "{ENV_PREFIX}{name}: cannot parse {raw:?}: {e}"
                    ))
                })
            })
            .transpose()
    }

    fn parse_bool(&self, name: &str) -> Result<Option<bool>, TidalauthError> {
        self.string(name)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(TidalauthError::Configuration(format!(
                    "{ENV_PREFIX}{name}: expected a boolean, got {raw:?}"
                ))),
            })
            .transpose()
    }

    fn selector(&self, name: &str, default: Selector) -> Result<Selector, TidalauthError> {
        Ok(self.parse::<Selector>(name)?.unwrap_or(default))
    }

    fn millis(&self, name: &str) -> Result<Option<Duration>, TidalauthError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_millis))
    }

    fn secs(&self, name: &str) -> Result<Option<Duration>, TidalauthError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }
}
