use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString};

/// How a selector string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SelectorKind {
    Css,
    Id,
    Xpath,
}

/// Element locator used by the login script.
///
/// Parses from strings with an optional `kind=` prefix: `xpath=//button`,
/// `id=email`, `css=input[name=code]`. Bare strings are CSS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub kind: SelectorKind,
    pub value: String,
}

impl Selector {
    pub fn css(value: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::Css,
            value: value.into(),
        }
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::Id,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::Xpath,
            value: value.into(),
        }
    }

    pub fn is_xpath(&self) -> bool {
        self.kind == SelectorKind::Xpath
    }

    /// Query string for the driver: CSS for css/id selectors, the raw
    /// expression for XPath.
    pub fn query(&self) -> String {
        match self.kind {
            SelectorKind::Css | SelectorKind::Xpath => self.value.clone(),
            SelectorKind::Id => format!("#{}", self.value),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SelectorKind::Xpath => write!(f, "xpath={}", self.value),
            _ => f.write_str(&self.query()),
        }
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("selector is empty".to_string());
        }
        if let Some((prefix, value)) = raw.split_once('=') {
            if let Ok(kind) = prefix.parse::<SelectorKind>() {
                if value.is_empty() {
                    return Err(format!("selector '{raw}' has no value"));
                }
                return Ok(Self {
                    kind,
                    value: value.to_string(),
                });
            }
        }
        Ok(Self::css(raw))
    }
}
