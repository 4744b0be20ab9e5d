//! Selector, element, page-state and launch configuration types.

use std::{fmt, str::FromStr};

use {
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    serde::{Deserialize, Serialize},
};

use crate::error::BrowserError;

const XPATH_PREFIX: &str = "xpath:";

/// Describes which elements to look up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "expr", rename_all = "lowercase")]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn css(expr: impl Into<String>) -> Self {
        Self::Css(expr.into())
    }

    pub fn expr(&self) -> &str {
        match self {
            Self::Css(e) | Self::XPath(e) => e,
        }
    }
}

impl FromStr for Selector {
    type Err = BrowserError;

    /// `xpath:` prefix selects XPath, anything else is CSS.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BrowserError::InvalidSelector("empty selector".into()));
        }
        match s.strip_prefix(XPATH_PREFIX) {
            Some(expr) if expr.trim().is_empty() => {
                Err(BrowserError::InvalidSelector("empty XPath expression".into()))
            },
            Some(expr) => Ok(Self::XPath(expr.trim().to_string())),
            None => Ok(Self::Css(s.to_string())),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(e) => f.write_str(e),
            Self::XPath(e) => write!(f, "{XPATH_PREFIX}{e}"),
        }
    }
}

/// A live element on the page, addressed by the ref the driver stamped on it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ElementHandle {
    pub ref_: u32,
    pub tag: String,
    /// Index of the same-origin iframe holding the element, `None` for the top document.
    #[serde(default)]
    pub frame: Option<u32>,
}

/// Snapshot of one element matched by a watched selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub visible: bool,
}

/// Elements matched by one watched selector, in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectorMatch {
    pub selector: Selector,
    pub elements: Vec<ElementInfo>,
}

/// Point-in-time view of the page used for signal classification and
/// image extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    /// Visible text of the top document and same-origin frames.
    pub text: String,
    pub watched: Vec<SelectorMatch>,
}

impl PageState {
    /// Elements matched by `selector`, empty if it was not watched.
    pub fn matches(&self, selector: &Selector) -> &[ElementInfo] {
        self.watched
            .iter()
            .find(|p| &p.selector == selector)
            .map(|p| p.elements.as_slice())
            .unwrap_or_default()
    }

    /// Case-insensitive search of the page text.
    pub fn contains_text(&self, needle: &str) -> bool {
        !needle.is_empty() && self.text.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// Bytes fetched through the browser.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedResource {
    /// Decode a `data:` URL (`data:image/png;base64,...`).
    pub fn from_data_url(data_url: &str) -> Result<Self, BrowserError> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| BrowserError::FetchFailed("not a data URL".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| BrowserError::FetchFailed("data URL without payload".into()))?;

        let mut parts = header.split(';');
        let content_type = parts
            .next()
            .filter(|m| !m.is_empty())
            .map(|m| m.to_ascii_lowercase());
        let is_base64 = parts.any(|p| p.eq_ignore_ascii_case("base64"));

        let bytes = if is_base64 {
            BASE64
                .decode(payload.trim())
                .map_err(|e| BrowserError::FetchFailed(format!("invalid base64 payload: {e}")))?
        } else {
            payload.as_bytes().to_vec()
        };

        Ok(Self {
            bytes,
            content_type,
        })
    }
}

/// Browser launch configuration.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_ms: u64,
    pub user_agent: Option<String>,
    pub chrome_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self::from(&mirage_config::BrowserConfig::default())
    }
}

impl From<&mirage_config::BrowserConfig> for BrowserConfig {
    fn from(cfg: &mirage_config::BrowserConfig) -> Self {
        Self {
            chrome_path: cfg.chrome_path.clone(),
            headless: cfg.headless,
            viewport_width: cfg.viewport_width,
            viewport_height: cfg.viewport_height,
            navigation_timeout_ms: cfg.navigation_timeout_ms,
            user_agent: cfg.user_agent.clone(),
            chrome_args: cfg.chrome_args.clone(),
        }
    }
}
