//! Semantic checks on a loaded configuration.
//!
//! Parsing already rejects type errors; this catches values that parse but
//! would make a run impossible or pointless (zero concurrency, empty selectors).

use crate::schema::MirageConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "download.concurrency"
    pub path: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    fn warning(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

impl MirageConfig {
    /// Validate values that the schema alone cannot express.
    #[must_use]
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut out = Vec::new();

        match url::Url::parse(&self.generation.surface_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {},
            Ok(u) => out.push(Diagnostic::error(
                "generation.surface_url",
                format!("unsupported scheme '{}'", u.scheme()),
            )),
            Err(e) => out.push(Diagnostic::error(
                "generation.surface_url",
                format!("invalid URL: {e}"),
            )),
        }

        if self.generation.poll_interval_ms == 0 {
            out.push(Diagnostic::error(
                "generation.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.generation.poll_timeout_secs == 0 {
            out.push(Diagnostic::error(
                "generation.poll_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.generation.run_timeout_secs < self.generation.poll_timeout_secs {
            out.push(Diagnostic::warning(
                "generation.run_timeout_secs",
                "shorter than poll_timeout_secs; the run deadline will cut polling short",
            ));
        }
        if self.generation.max_prompt_chars == 0 {
            out.push(Diagnostic::error(
                "generation.max_prompt_chars",
                "must be greater than zero",
            ));
        }

        if self.surface.prompt_input.trim().is_empty() {
            out.push(Diagnostic::error("surface.prompt_input", "selector is empty"));
        }
        if self.surface.submit_button.trim().is_empty() {
            out.push(Diagnostic::error("surface.submit_button", "selector is empty"));
        }
        if self.surface.result_images.is_empty() {
            out.push(Diagnostic::error(
                "surface.result_images",
                "at least one selector is required",
            ));
        }
        if self.surface.completion_markers.is_empty() {
            out.push(Diagnostic::warning(
                "surface.completion_markers",
                "empty; completion is detected from result images only",
            ));
        }

        if self.download.max_attempts == 0 {
            out.push(Diagnostic::error(
                "download.max_attempts",
                "must be at least 1",
            ));
        }
        if self.download.concurrency == 0 {
            out.push(Diagnostic::error(
                "download.concurrency",
                "must be at least 1",
            ));
        }
        if self.download.base_delay_ms > self.download.max_delay_ms {
            out.push(Diagnostic::warning(
                "download.base_delay_ms",
                "greater than max_delay_ms; every retry waits max_delay_ms",
            ));
        }

        if self.session.max_age_hours == 0 {
            out.push(Diagnostic::warning(
                "session.max_age_hours",
                "zero makes every stored session stale",
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_clean() {
        assert!(MirageConfig::default().validate().is_empty());
    }

    #[test]
    fn flags_unusable_values() {
        let mut cfg = MirageConfig::default();
        cfg.download.concurrency = 0;
        cfg.generation.surface_url = "ftp://example.com".into();
        cfg.surface.result_images.clear();

        let diags = cfg.validate();
        let errors: Vec<_> = diags
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.path)
            .collect();
        assert!(errors.contains(&"download.concurrency"));
        assert!(errors.contains(&"generation.surface_url"));
        assert!(errors.contains(&"surface.result_images"));
    }

    #[test]
    fn short_run_timeout_is_a_warning() {
        let mut cfg = MirageConfig::default();
        cfg.generation.run_timeout_secs = 10;
        let diags = cfg.validate();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
    }
}
