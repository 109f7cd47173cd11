use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;

use super::credential::Credential;
use super::error::AuthError;
use super::link_code::{LinkCode, PollResult};
use crate::config::{Secret, DEFAULT_USER_AGENT};

pub const DEFAULT_SERVICE_URL: &str = "https://auth.tidal.com";
pub const DEFAULT_SCOPE: &str = "r_usr w_usr w_sub";

const DEVICE_AUTHORIZATION_PATH: &str = "/v1/oauth2/device_authorization";
const TOKEN_PATH: &str = "/v1/oauth2/token";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const MAX_ERROR_BODY: usize = 200;

/// Issues link codes and reports whether they have been approved.
#[async_trait]
pub trait LinkCodeClient: Send + Sync {
    async fn request_code(&self) -> Result<LinkCode, AuthError>;

    /// Never contacts the service once `code` has expired.
    async fn poll_status(&self, code: &LinkCode) -> Result<PollResult, AuthError>;
}

/// OAuth client registration used for the device flow.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_secret: Option<Secret>,
    pub scope: String,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            scope: DEFAULT_SCOPE.to_string(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<Secret>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

/// [`LinkCodeClient`] backed by the TIDAL device-authorization endpoints.
///
/// # Example
/// ```no_run
/// use tidalauth::auth::{ClientIdentity, HttpLinkCodeClient, LinkCodeClient};
///
/// # async fn example() -> Result<(), tidalauth::auth::AuthError> {
/// let client = HttpLinkCodeClient::new("https://auth.tidal.com", ClientIdentity::new("client-id"))?;
/// let code = client.request_code().await?;
/// println!("Visit {} and enter {}", code.verification_url, code.code);
/// # Ok(())
/// # }
/// ```
pub struct HttpLinkCodeClient {
    client: reqwest::Client,
    identity: ClientIdentity,
    device_authorization_url: String,
    token_url: String,
}

impl HttpLinkCodeClient {
    /// Fails only when the HTTP client cannot be built (TLS backend setup).
    pub fn new(base_url: &str, identity: ClientIdentity) -> Result<Self, AuthError> {
        let base_url = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AuthError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            identity,
            device_authorization_url: format!("{base_url}{DEVICE_AUTHORIZATION_PATH}"),
            token_url: format!("{base_url}{TOKEN_PATH}"),
        })
    }
}

#[async_trait]
impl LinkCodeClient for HttpLinkCodeClient {
    #[tracing::instrument(skip(self), fields(client_id = %self.identity.client_id))]
    async fn request_code(&self) -> Result<LinkCode, AuthError> {
        let resp = self
            .client
            .post(&self.device_authorization_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.identity.client_id.as_str()),
                ("scope", self.identity.scope.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let error = ErrorBody::parse(&body);
            return Err(match error.error.as_deref() {
                Some("invalid_client" | "unauthorized_client") => {
                    AuthError::InvalidClient(error.describe(&body))
                }
                _ if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                    AuthError::InvalidClient(error.describe(&body))
                }
                _ => AuthError::Service {
                    status: status.as_u16(),
                    message: error.describe(&body),
                },
            });
        }

        let payload: DeviceAuthorizationResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::Parse(format!("Device authorization response: {e}")))?;
        let code = LinkCode::new(
            payload.user_code,
            payload.device_code,
            absolute_url(&payload.verification_uri),
            Duration::from_secs(payload.expires_in),
            Duration::from_secs(payload.interval.max(1)),
        );
        let code = match payload.verification_uri_complete {
            Some(url) => code.with_complete_url(absolute_url(&url)),
            None => code,
        };
        tracing::info!(
            code = %code.code,
            verification_url = %code.presentation_url(),
            expires_at = %code.expires_at_utc,
            "Link code issued"
        );
        Ok(code)
    }

    #[tracing::instrument(skip(self, code), fields(code = %code.code))]
    async fn poll_status(&self, code: &LinkCode) -> Result<PollResult, AuthError> {
        if code.is_expired() {
            return Ok(PollResult::Expired);
        }

        let mut form = vec![
            ("client_id", self.identity.client_id.as_str()),
            ("device_code", code.device_code.as_str()),
            ("grant_type", DEVICE_CODE_GRANT),
            ("scope", self.identity.scope.as_str()),
        ];
        if let Some(secret) = &self.identity.client_secret {
            form.push(("client_secret", secret.expose()));
        }

        let resp = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        let payload: TokenEndpointResponse = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(e) if status.is_success() => {
                return Err(AuthError::Parse(format!("Token response: {e}")));
            }
            Err(_) => {
                return Err(AuthError::Service {
                    status: status.as_u16(),
                    message: truncate(&body),
                })
            }
        };

        if status.is_success() {
            if let Some(access_token) = payload.access_token {
                let issued_at = Utc::now();
                let credential = Credential {
                    access_token,
                    refresh_token: payload.refresh_token,
                    token_type: payload.token_type.unwrap_or_else(|| "Bearer".to_string()),
                    expires_at: payload.expires_in.and_then(|secs| {
                        issued_at.checked_add_signed(chrono::Duration::seconds(secs as i64))
                    }),
                    scope: payload.scope,
                    user_id: payload
                        .user_id
                        .or_else(|| payload.user.as_ref().and_then(|u| u.user_id.clone()))
                        .map(id_to_string),
                    country_code: payload.user.and_then(|u| u.country_code),
                    issued_at,
                };
                return Ok(PollResult::Approved(credential));
            }
        }

        let description = payload
            .error_description
            .clone()
            .unwrap_or_else(|| truncate(&body));
        match payload.error.as_deref() {
            Some("authorization_pending") => Ok(PollResult::Pending),
            Some("slow_down") => Ok(PollResult::SlowDown),
            Some("expired_token") => Ok(PollResult::Expired),
            Some("access_denied") => Ok(PollResult::Denied),
            Some("invalid_client" | "unauthorized_client") => {
                Err(AuthError::InvalidClient(description))
            }
            Some(other) => Err(AuthError::Service {
                status: status.as_u16(),
                message: format!("{other}: {description}"),
            }),
            None if status.is_success() => Err(AuthError::Parse(
                "Token response missing token and error".to_string(),
            )),
            None => Err(AuthError::Service {
                status: status.as_u16(),
                message: description,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthorizationResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: Option<String>,
    expires_in: u64,
    interval: u64,
}

#[derive(Debug, Default, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
    user_id: Option<serde_json::Value>,
    user: Option<TokenUser>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenUser {
    user_id: Option<serde_json::Value>,
    country_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

impl ErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn describe(&self, body: &str) -> String {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => truncate(body),
        }
    }
}

/// The service reports bare hosts such as `link.tidal.com`.
fn absolute_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

fn id_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
