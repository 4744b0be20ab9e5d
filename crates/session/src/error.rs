use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no session found at {}", path.display())]
    NoSessionFound { path: PathBuf },

    #[error("session record at {} is corrupt: {message}", path.display())]
    SessionCorrupt { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SessionCorrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Missing and corrupt records both mean the login flow has to run again.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::NoSessionFound { .. } | Self::SessionCorrupt { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
