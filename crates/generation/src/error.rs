use {mirage_browser::BrowserError, thiserror::Error};

/// Errors that stop a run before it can produce an outcome.
///
/// Upstream conditions (expired session, rate limiting, moderation, ...) are
/// not errors: they end up in the outcome's status.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("invalid surface configuration for {field}: {source}")]
    Surface {
        field: &'static str,
        #[source]
        source: BrowserError,
    },

    #[error(transparent)]
    Session(#[from] mirage_session::Error),

    #[error(transparent)]
    Media(#[from] mirage_media::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
