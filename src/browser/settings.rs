use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;

use crate::config::DEFAULT_USER_AGENT;

/// Launch and interaction settings for the automated browser.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tidalauth::browser::BrowserSettings;
///
/// let settings = BrowserSettings::builder()
///     .headless(false)
///     .action_timeout(Duration::from_secs(10))
///     .build();
/// assert_eq!(settings.viewport_width, 1920);
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct BrowserSettings {
    #[builder(default = true)]
    pub headless: bool,
    #[builder(default = 1920)]
    pub viewport_width: u32,
    #[builder(default = 1080)]
    pub viewport_height: u32,
    /// Upper bound for a single element lookup or interaction.
    #[builder(default = Duration::from_millis(5_000))]
    pub action_timeout: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub navigation_timeout: Duration,
    /// Pause after clicks; navigations wait three times as long.
    #[builder(default = Duration::from_millis(1_000))]
    pub settle_delay: Duration,
    #[builder(into, default = DEFAULT_USER_AGENT.to_string())]
    pub user_agent: String,
    #[builder(into, default = "en-US".to_string())]
    pub locale: String,
    #[builder(default = true)]
    pub ignore_https_errors: bool,
    pub executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BrowserSettings {
    pub fn navigation_settle_delay(&self) -> Duration {
        self.settle_delay * 3
    }
}
