//! Browser error types.

use thiserror::Error;

/// Errors that can occur during browser operations.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser not available: {0}")]
    BrowserNotAvailable(String),

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("element not found: ref {0}")]
    ElementNotFound(u32),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("JavaScript evaluation failed: {0}")]
    JsEvalFailed(String),

    #[error("in-page fetch failed: {0}")]
    FetchFailed(String),

    #[error("session injection failed: {0}")]
    SessionRejected(String),

    #[error("browser request timed out")]
    Timeout,

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),
}

impl BrowserError {
    /// Whether the browser or its connection is gone, so retrying on the same
    /// driver cannot help.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::ConnectionClosed(_) => true,
            Self::Cdp(msg) => msg.contains("AlreadyClosed") || msg.contains("ConnectionClosed"),
            _ => false,
        }
    }
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        match err {
            chromiumoxide::error::CdpError::Timeout => BrowserError::Timeout,
            other => BrowserError::Cdp(other.to_string()),
        }
    }
}
