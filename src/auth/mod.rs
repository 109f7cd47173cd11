//! Link-code issuance, approval polling and credential output.

pub mod client;
pub mod credential;
pub mod error;
pub mod link_code;
pub mod sink;

pub use client::{ClientIdentity, HttpLinkCodeClient, LinkCodeClient};
pub use credential::Credential;
pub use error::AuthError;
pub use link_code::{LinkCode, PollResult};
pub use sink::{CredentialSink, FileSink, StdoutSink};
