use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::Credential;

const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A pairing code issued by the service for one linking attempt.
///
/// `expires_at` is a monotonic deadline and is what every expiry check uses;
/// `expires_at_utc` is the same moment on the wall clock, for display.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use tidalauth::auth::LinkCode;
///
/// let code = LinkCode::new(
///     "ABC-123",
///     "device-code-1",
///     "https://link.tidal.com",
///     Duration::from_secs(300),
///     Duration::from_secs(5),
/// )
/// .with_complete_url("https://link.tidal.com/ABC-123");
/// assert!(!code.is_expired());
/// ```
#[derive(Debug, Clone)]
pub struct LinkCode {
    pub code: String,
    pub device_code: String,
    pub verification_url: String,
    pub verification_url_complete: Option<String>,
    pub expires_at: Instant,
    pub expires_at_utc: DateTime<Utc>,
    pub poll_interval: Duration,
}

impl LinkCode {
    pub fn new(
        code: impl Into<String>,
        device_code: impl Into<String>,
        verification_url: impl Into<String>,
        expires_in: Duration,
        poll_interval: Duration,
    ) -> Self {
        let expires_at_utc = chrono::Duration::from_std(expires_in)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            code: code.into(),
            device_code: device_code.into(),
            verification_url: verification_url.into(),
            verification_url_complete: None,
            expires_at: Instant::now()
                .checked_add(expires_in)
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE),
            expires_at_utc,
            poll_interval,
        }
    }

    pub fn with_complete_url(mut self, url: impl Into<String>) -> Self {
        self.verification_url_complete = Some(url.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// URL to open in the browser: the pre-filled one when the service sent it.
    pub fn presentation_url(&self) -> &str {
        self.verification_url_complete
            .as_deref()
            .unwrap_or(&self.verification_url)
    }
}

/// Result of one approval check.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// Not approved yet; wait `poll_interval` and ask again.
    Pending,
    /// Polling too fast; widen the interval before asking again.
    SlowDown,
    Approved(Credential),
    Expired,
    Denied,
}

impl PollResult {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved(_) | Self::Expired | Self::Denied)
    }
}
