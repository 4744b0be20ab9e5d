use std::fmt;

use {mirage_media::ImageArtifact, serde::Serialize, uuid::Uuid};

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No usable session, or the upstream service dropped it mid-run.
    AuthExpired,
    /// The upstream service refused the prompt.
    ContentPolicyViolation,
    /// Upstream throttling; a later run may succeed.
    RateLimited,
    /// The page no longer looks the way the extractor expects.
    ParseError(String),
    /// Every artifact failed to download.
    DownloadFailed,
    /// The browser could not be launched or stopped responding.
    Browser(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthExpired => f.write_str("session expired, log in again"),
            Self::ContentPolicyViolation => f.write_str("prompt rejected by content policy"),
            Self::RateLimited => f.write_str("rate limited by the service"),
            Self::ParseError(detail) => write!(f, "unrecognised page structure: {detail}"),
            Self::DownloadFailed => f.write_str("no image could be downloaded"),
            Self::Browser(detail) => write!(f, "browser failure: {detail}"),
        }
    }
}

/// Terminal status of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum GenerationStatus {
    Succeeded,
    Failed(FailureReason),
    TimedOut,
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Controller lifecycle states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    SessionReady,
    Submitting,
    Polling,
    Extracting,
    Downloading,
    Completed,
}

/// The result of one generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub request_id: Uuid,
    pub status: GenerationStatus,
    /// Artifacts in on-page order, failed ones included.
    pub artifacts: Vec<ImageArtifact>,
}

impl GenerationOutcome {
    pub fn new(request_id: Uuid, status: GenerationStatus) -> Self {
        Self {
            request_id,
            status,
            artifacts: Vec::new(),
        }
    }

    pub fn failed(request_id: Uuid, reason: FailureReason) -> Self {
        Self::new(request_id, GenerationStatus::Failed(reason))
    }

    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<ImageArtifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn verified(&self) -> impl Iterator<Item = &ImageArtifact> {
        self.artifacts.iter().filter(|a| a.is_valid())
    }

    pub fn unverified(&self) -> impl Iterator<Item = &ImageArtifact> {
        self.artifacts.iter().filter(|a| !a.is_valid())
    }

    /// Succeeded with at least one verified artifact.
    pub fn is_success(&self) -> bool {
        self.status == GenerationStatus::Succeeded && self.verified().next().is_some()
    }
}
