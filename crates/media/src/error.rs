use mirage_browser::BrowserError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    #[error("verification failed: {message}")]
    Verification { message: String },

    #[error("unsupported reference {reference}: {reason}")]
    UnsupportedReference { reference: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl Error {
    #[must_use]
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Whether another attempt at the same reference might succeed.
    ///
    /// Verification failures count as transient: a truncated or interstitial
    /// response often turns into the real image on the next request.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Verification { .. } => true,
            Self::Http { status, .. } => matches!(status, 408 | 425 | 429 | 500..=599),
            Self::Browser(e) => !e.is_connection_lost() && !matches!(e, BrowserError::InvalidAction(_)),
            Self::UnsupportedReference { .. } | Self::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
