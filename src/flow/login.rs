use crate::browser::Selector;
use crate::config::Secret;

/// Account used to approve the link code in the browser.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub email: String,
    pub password: Secret,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Selectors for the pages the browser walks through to approve a code.
///
/// Defaults target link.tidal.com and the TIDAL login form.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginScript {
    /// Only used when the service gives no pre-filled verification URL.
    pub code_input: Selector,
    pub code_submit: Selector,
    pub email_input: Selector,
    pub email_submit: Selector,
    pub password_input: Selector,
    pub password_submit: Selector,
    /// Clicked when present; some accounts skip the consent page.
    pub consent_button: Selector,
}

impl Default for LoginScript {
    fn default() -> Self {
        Self {
            code_input: Selector::css(r#"input[name="code"]"#),
            code_submit: Selector::css(r#"button[type="submit"]"#),
            email_input: Selector::id("email"),
            email_submit: Selector::css(r#"button[type="submit"]"#),
            password_input: Selector::id("password"),
            password_submit: Selector::css(r#"button[type="submit"]"#),
            consent_button: Selector::xpath(
                "//button[contains(., 'Continue') or contains(., 'Yes')]",
            ),
        }
    }
}
