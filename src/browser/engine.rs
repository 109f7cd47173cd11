//! Chromium-backed browser sessions over the DevTools protocol.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use super::error::BrowserError;
use super::selector::Selector;
use super::settings::BrowserSettings;
use super::{reported, BrowserAction, BrowserLauncher, BrowserSession};
use crate::util::timeout::with_timeout;

const LOOKUP_INTERVAL: Duration = Duration::from_millis(100);

const IS_VISIBLE_JS: &str = r#"
    function() {
        const rect = this.getBoundingClientRect();
        const style = window.getComputedStyle(this);
        return rect.width > 0 && rect.height > 0
            && style.visibility !== 'hidden' && style.display !== 'none';
    }
"#;

const CLEAR_VALUE_JS: &str = r#"
    function() {
        if ('value' in this) {
            this.value = '';
            this.dispatchEvent(new Event('input', { bubbles: true }));
        }
    }
"#;

/// Handle to one running browser process.
///
/// Created with [`BrowserEngine::launch`] and torn down with
/// [`BrowserEngine::shutdown`]. Sessions handed out by the engine are pages in
/// this process; the engine itself is passed around explicitly, never global.
pub struct BrowserEngine {
    settings: BrowserSettings,
    browser: Mutex<Option<Browser>>,
    handler: StdMutex<Option<JoinHandle<()>>>,
}

impl BrowserEngine {
    #[instrument(skip_all, fields(headless = settings.headless))]
    pub async fn launch(settings: BrowserSettings) -> Result<Self, BrowserError> {
        let config = browser_config(&settings)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        info!("Browser launched");
        Ok(Self {
            settings,
            browser: Mutex::new(Some(browser)),
            handler: StdMutex::new(Some(handler_task)),
        })
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    /// Open a fresh page configured with the engine's user agent and locale.
    pub async fn open_session(&self) -> Result<ChromiumSession, BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(format!("failed to open page: {e}")))?;
        drop(guard);

        let mut user_agent = SetUserAgentOverrideParams::new(self.settings.user_agent.clone());
        user_agent.accept_language = Some(self.settings.locale.clone());
        if let Err(e) = page.set_user_agent(user_agent).await {
            warn!(error = %e, "Failed to override user agent");
        }

        Ok(ChromiumSession {
            page: StdMutex::new(Some(page)),
            settings: self.settings.clone(),
        })
    }

    /// Close the browser process. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Browser close failed");
            }
            if let Err(e) = browser.wait().await {
                warn!(error = %e, "Waiting for browser exit failed");
            }
            info!("Browser shut down");
        }
        let handler = self.handler.lock().ok().and_then(|mut handler| handler.take());
        if let Some(handler) = handler {
            handler.abort();
        }
    }
}

impl Drop for BrowserEngine {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.get_mut().ok().and_then(|handler| handler.take()) {
            handler.abort();
        }
    }
}

#[async_trait]
impl BrowserLauncher for BrowserEngine {
    async fn acquire(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        Ok(Box::new(self.open_session().await?))
    }
}

fn browser_config(settings: &BrowserSettings) -> Result<BrowserConfig, BrowserError> {
    let mut builder = BrowserConfig::builder()
        .window_size(settings.viewport_width, settings.viewport_height)
        .viewport(Viewport {
            width: settings.viewport_width,
            height: settings.viewport_height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: false,
            has_touch: false,
        })
        .request_timeout(settings.navigation_timeout)
        .arg(format!("--lang={}", settings.locale));
    if !settings.headless {
        builder = builder.with_head();
    }
    if settings.ignore_https_errors {
        builder = builder.arg("--ignore-certificate-errors");
    }
    if let Some(path) = &settings.executable {
        builder = builder.chrome_executable(path);
    }
    builder.build().map_err(BrowserError::Launch)
}

/// One page in a [`BrowserEngine`].
pub struct ChromiumSession {
    page: StdMutex<Option<Page>>,
    settings: BrowserSettings,
}

impl ChromiumSession {
    fn page(&self) -> Result<Page, BrowserError> {
        self.page
            .lock()
            .ok()
            .and_then(|page| page.clone())
            .ok_or(BrowserError::Closed)
    }

    /// Single lookup. When several elements match, the first visible one wins.
    async fn locate(&self, page: &Page, selector: &Selector) -> Option<Element> {
        let found = if selector.is_xpath() {
            page.find_xpaths(selector.value.as_str()).await
        } else {
            page.find_elements(selector.query()).await
        };
        let mut elements = match found {
            Ok(elements) => elements,
            Err(e) => {
                debug!(selector = %selector, error = %e, "Lookup failed");
                return None;
            }
        };

        match elements.len() {
            0 => None,
            1 => elements.pop(),
            count => {
                warn!(selector = %selector, count, "Multiple elements found, selecting the first visible");
                for element in elements {
                    if is_visible(&element).await {
                        return Some(element);
                    }
                }
                None
            }
        }
    }

    async fn wait_for(&self, selector: &Selector, timeout: Duration) -> Result<Element, BrowserError> {
        let page = self.page()?;
        let started = Instant::now();
        loop {
            if let Some(element) = self.locate(&page, selector).await {
                return Ok(element);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(BrowserError::ElementNotFound {
                    selector: selector.to_string(),
                    elapsed,
                });
            }
            sleep(LOOKUP_INTERVAL.min(timeout - elapsed)).await;
        }
    }
}

async fn is_visible(element: &Element) -> bool {
    element
        .call_js_fn(IS_VISIBLE_JS, false)
        .await
        .ok()
        .and_then(|returns| returns.result.value)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

fn interaction_error(selector: &Selector, started: Instant, error: impl std::fmt::Display) -> BrowserError {
    BrowserError::Interaction {
        selector: selector.to_string(),
        elapsed: started.elapsed(),
        message: error.to_string(),
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn open(&self, url: &str) -> Result<(), BrowserError> {
        reported(BrowserAction::Open, url, async {
            let page = self.page()?;
            let started = Instant::now();
            with_timeout(
                self.settings.navigation_timeout,
                async {
                    page.goto(url)
                        .await
                        .map(|_| ())
                        .map_err(|e| BrowserError::NavigationTimeout {
                            url: url.to_string(),
                            elapsed: started.elapsed(),
                            reason: e.to_string(),
                        })
                },
                |elapsed| BrowserError::NavigationTimeout {
                    url: url.to_string(),
                    elapsed,
                    reason: "timed out".to_string(),
                },
            )
            .await?;
            sleep(self.settings.navigation_settle_delay()).await;
            Ok(())
        })
        .await
    }

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        reported(BrowserAction::WaitForSelector, &selector.to_string(), async {
            self.wait_for(selector, timeout).await.map(|_| ())
        })
        .await
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        reported(BrowserAction::Fill, &selector.to_string(), async {
            let element = self.wait_for(selector, self.settings.action_timeout).await?;
            let started = Instant::now();
            element
                .click()
                .await
                .map_err(|e| interaction_error(selector, started, e))?;
            element
                .call_js_fn(CLEAR_VALUE_JS, false)
                .await
                .map_err(|e| interaction_error(selector, started, e))?;
            element
                .type_str(text)
                .await
                .map_err(|e| interaction_error(selector, started, e))?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        reported(BrowserAction::Click, &selector.to_string(), async {
            let element = self.wait_for(selector, self.settings.action_timeout).await?;
            let started = Instant::now();
            element
                .click()
                .await
                .map_err(|e| interaction_error(selector, started, e))?;
            sleep(self.settings.settle_delay).await;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        let page = self.page.lock().ok().and_then(|mut page| page.take());
        if let Some(page) = page {
            if let Err(e) = page.close().await {
                warn!(error = %e, "Page close failed");
            }
            debug!("Browser page closed");
        }
    }
}
