use std::path::PathBuf;

use serde::Serialize;

/// One image produced by a generation request.
///
/// Starts as a reference-only stub from extraction and is completed by the
/// downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageArtifact {
    /// Remote locator the image was fetched from.
    pub source: String,
    /// Hex SHA-256 of the downloaded bytes, empty until downloaded.
    pub content_hash: String,
    pub local_path: Option<PathBuf>,
    pub byte_size: u64,
    pub verified: bool,
    /// Last error for an artifact that exhausted its attempts.
    pub failure: Option<String>,
}

impl ImageArtifact {
    pub fn reference(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content_hash: String::new(),
            local_path: None,
            byte_size: 0,
            verified: false,
            failure: None,
        }
    }

    #[must_use]
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.verified = false;
        self.failure = Some(reason.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.verified && self.byte_size > 0 && !self.content_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_is_not_valid() {
        let a = ImageArtifact::reference("https://th.bing.com/a");
        assert!(!a.is_valid());
        assert!(a.failure.is_none());
    }

    #[test]
    fn verified_needs_hash_and_size() {
        let mut a = ImageArtifact::reference("x");
        a.verified = true;
        assert!(!a.is_valid());
        a.byte_size = 10;
        a.content_hash = "ab".into();
        assert!(a.is_valid());
        assert!(!a.failed("boom").is_valid());
    }
}
