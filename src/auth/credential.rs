use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session credentials issued once the link code is approved.
///
/// # Example
/// ```no_run
/// use tidalauth::auth::Credential;
/// use chrono::Utc;
///
/// let credential = Credential {
///     access_token: "tok_xyz".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     token_type: "Bearer".to_string(),
///     expires_at: None,
///     scope: Some("r_usr w_usr".to_string()),
///     user_id: Some("12345".to_string()),
///     country_code: Some("NO".to_string()),
///     issued_at: Utc::now(),
/// };
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub user_id: Option<String>,
    pub country_code: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"..")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("user_id", &self.user_id)
            .field("country_code", &self.country_code)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}
