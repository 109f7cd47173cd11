use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::credential::Credential;
use super::error::AuthError;

/// Destination for the credential produced by a successful link.
pub trait CredentialSink: Send + Sync {
    fn deliver(&self, credential: &Credential) -> Result<(), AuthError>;
}

/// Prints the credential as JSON on stdout so a parent process can capture it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl CredentialSink for StdoutSink {
    fn deliver(&self, credential: &Credential) -> Result<(), AuthError> {
        let serialized = serde_json::to_string_pretty(credential)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{serialized}")?;
        stdout.flush()?;
        Ok(())
    }
}

/// Writes the credential to a TOML file readable only by the current user.
///
/// # Example
/// ```no_run
/// use tidalauth::auth::{CredentialSink, FileSink};
///
/// let sink = FileSink::new("/var/lib/tidalauth/credential.toml");
/// # let credential: tidalauth::auth::Credential = unimplemented!();
/// sink.deliver(&credential)?;
/// # Ok::<(), tidalauth::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl CredentialSink for FileSink {
    fn deliver(&self, credential: &Credential) -> Result<(), AuthError> {
        Self::ensure_parent(&self.path)?;
        let file = CredentialFile {
            version: 1,
            saved_at: Utc::now(),
            credential,
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&self.path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        tracing::info!(path = %self.path.display(), "Credential written");
        Ok(())
    }
}

#[derive(Serialize)]
struct CredentialFile<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    credential: &'a Credential,
}
