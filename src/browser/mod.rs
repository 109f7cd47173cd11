//! Browser automation: the session contract the flow drives, and the
//! Chromium implementation behind it.

pub mod engine;
pub mod error;
pub mod selector;
pub mod settings;

pub use engine::{BrowserEngine, ChromiumSession};
pub use error::BrowserError;
pub use selector::{Selector, SelectorKind};
pub use settings::BrowserSettings;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use strum::Display;
use tracing::Level;

/// A single page in a running browser.
///
/// Every primitive is bounded by a timeout and reports one of the
/// [`BrowserError`] kinds; callers decide whether to retry.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), BrowserError>;

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError>;

    /// Tear down the page. Safe to call more than once.
    async fn close(&self);
}

/// Hands out browser sessions; the flow acquires exactly one per run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Browser primitive being reported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum BrowserAction {
    Open,
    WaitForSelector,
    Fill,
    Click,
}

/// A selector wait that runs out is an answer to "is it there?", not a fault.
fn failure_level(action: BrowserAction, error: &BrowserError) -> Level {
    match (action, error) {
        (BrowserAction::WaitForSelector, BrowserError::ElementNotFound { .. }) => Level::DEBUG,
        _ => Level::WARN,
    }
}

/// Log the start and outcome of a browser action.
pub(crate) async fn reported<T>(
    action: BrowserAction,
    target: &str,
    future: impl Future<Output = Result<T, BrowserError>>,
) -> Result<T, BrowserError> {
    tracing::debug!(%action, target, "Calling browser action");
    match future.await {
        Ok(value) => {
            tracing::debug!(%action, target, "Browser action succeeded");
            Ok(value)
        }
        Err(error) => {
            if failure_level(action, &error) == Level::DEBUG {
                tracing::debug!(%action, target, error = %error, "Browser action found nothing");
            } else {
                tracing::warn!(%action, target, error = %error, "Browser action failed");
            }
            Err(error)
        }
    }
}
