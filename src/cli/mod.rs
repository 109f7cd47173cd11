//! CLI entry point for tidalauth.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::auth::{CredentialSink, FileSink, StdoutSink};
use crate::browser::BrowserEngine;
use crate::config::TidalauthConfig;
use crate::error::{ExitCode, TidalauthError};
use crate::flow::{AuthSession, DeviceAuthOrchestrator, FlowOutcome};

/// Link a device to a TIDAL account without a human at the keyboard.
///
/// Settings come from `TIDALAUTH_*` environment variables (or a `.env` file);
/// the flags below override them.
#[derive(Parser, Debug)]
#[command(name = "tidalauth", version, about)]
pub struct Cli {
    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headful: bool,

    /// Abort the whole run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Write the credential to this TOML file instead of printing JSON
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Base URL of the authorization service
    #[arg(long, value_name = "URL")]
    pub service_url: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut TidalauthConfig) {
        if self.headful {
            config.browser.headless = false;
        }
        if let Some(url) = &self.service_url {
            config.service_base_url = url.clone();
        }
    }

    fn sink(&self) -> Box<dyn CredentialSink> {
        match &self.output {
            Some(path) => Box::new(FileSink::new(path)),
            None => Box::new(StdoutSink),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins, then `LOG_LEVEL`, then `info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            tracing_subscriber::EnvFilter::try_new(
                std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            )
        })
        .unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration, run one linking flow and deliver the credential.
pub async fn execute(cli: Cli) -> ExitCode {
    let mut config = match TidalauthConfig::from_env() {
        Ok(config) => config,
        Err(e) => return report(e),
    };
    cli.apply(&mut config);

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&cancel, cli.timeout.map(Duration::from_secs));

    let engine = match BrowserEngine::launch(config.browser.clone()).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => return report(e.into()),
    };
    let orchestrator = match DeviceAuthOrchestrator::from_config(&config, engine.clone()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            engine.shutdown().await;
            return report(e);
        }
    };

    let mut session = AuthSession::new();
    let result = orchestrator.run(&mut session, &cancel).await;
    engine.shutdown().await;
    cancel.cancel();

    match result {
        Ok(FlowOutcome::Succeeded(credential)) => match cli.sink().deliver(&credential) {
            Ok(()) => ExitCode::Success,
            Err(e) => report(e.into()),
        },
        Ok(outcome) => {
            eprintln!("Linking {}", outcome.label());
            outcome.exit_code()
        }
        Err(e) => report(e),
    }
}

fn spawn_cancel_triggers(cancel: &CancellationToken, timeout: Option<Duration>) {
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::info!("Interrupted, cancelling");
                    token.cancel();
                }
            }
        }
    });

    if let Some(timeout) = timeout {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    tracing::warn!(timeout = ?timeout, "Overall timeout reached, cancelling");
                    token.cancel();
                }
            }
        });
    }
}

fn report(error: TidalauthError) -> ExitCode {
    eprintln!("Error: {error}");
    eprintln!("Hint: {:?}", error.recovery_suggestion());
    error.exit_code()
}
