//! tidalauth: unattended TIDAL device linking.
//!
//! Requests a link code from the TIDAL authorization service, approves it by
//! driving a headless browser through the login pages, and polls until the
//! service hands back an access token.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidalauth::prelude::*;
//!
//! # async fn example() -> tidalauth::error::Result<()> {
//! let config = TidalauthConfig::from_env()?;
//! let engine = Arc::new(BrowserEngine::launch(config.browser.clone()).await?);
//! let orchestrator = DeviceAuthOrchestrator::from_config(&config, engine.clone())?;
//!
//! let mut session = AuthSession::new();
//! let outcome = orchestrator.run(&mut session, &CancellationToken::new()).await;
//! engine.shutdown().await;
//!
//! if let Some(credential) = outcome?.credential() {
//!     println!("linked user {:?}", credential.user_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod browser;
pub mod config;
pub mod error;
pub mod flow;
pub mod prelude;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
