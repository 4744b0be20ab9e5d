//! Page-state classification.
//!
//! What counts as "done", "throttled" or "logged out" depends entirely on the
//! upstream UI, so it lives behind [`SignalClassifier`] and the default
//! [`SurfacePolicy`] is built from the `[surface]` config section.

use {
    mirage_browser::{PageState, Selector},
    mirage_config::SurfaceConfig,
};

use crate::error::{Error, Result};

/// Terminal (or not yet terminal) condition observed on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    /// Generated images are present.
    Success,
    RateLimited,
    /// The page went back to a login surface.
    AuthLost,
    /// The prompt was refused by moderation.
    ContentBlocked,
    /// Still loading, or a state the policy does not recognise.
    Unknown,
}

/// Decides which signal a page state carries.
pub trait SignalClassifier: Send + Sync {
    /// Selectors whose matches `classify` needs in the sampled state.
    fn watched(&self) -> Vec<Selector>;

    fn classify(&self, state: &PageState) -> PageSignal;
}

/// Selectors used to drive the generation form.
#[derive(Debug, Clone)]
pub struct FormSelectors {
    pub prompt_input: Selector,
    pub submit_button: Selector,
    pub consent_button: Option<Selector>,
}

impl FormSelectors {
    pub fn from_config(cfg: &SurfaceConfig) -> Result<Self> {
        Ok(Self {
            prompt_input: parse("surface.prompt_input", &cfg.prompt_input)?,
            submit_button: parse("surface.submit_button", &cfg.submit_button)?,
            consent_button: cfg
                .consent_button
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| parse("surface.consent_button", s))
                .transpose()?,
        })
    }
}

/// Pattern-based classifier.
///
/// Precedence when several signals show at once: auth lost, content
/// blocked, rate limited, success.
#[derive(Debug, Clone)]
pub struct SurfacePolicy {
    result_images: Vec<Selector>,
    completion_markers: Vec<Selector>,
    auth_lost_selectors: Vec<Selector>,
    auth_lost_url_patterns: Vec<String>,
    content_policy_patterns: Vec<String>,
    rate_limit_patterns: Vec<String>,
}

impl SurfacePolicy {
    pub fn from_config(cfg: &SurfaceConfig) -> Result<Self> {
        Ok(Self {
            result_images: parse_all("surface.result_images", &cfg.result_images)?,
            completion_markers: parse_all("surface.completion_markers", &cfg.completion_markers)?,
            auth_lost_selectors: parse_all("surface.auth_lost_selectors", &cfg.auth_lost_selectors)?,
            auth_lost_url_patterns: lowercase(&cfg.auth_lost_url_patterns),
            content_policy_patterns: lowercase(&cfg.content_policy_patterns),
            rate_limit_patterns: lowercase(&cfg.rate_limit_patterns),
        })
    }

    fn any_match(state: &PageState, selectors: &[Selector]) -> bool {
        selectors.iter().any(|s| !state.matches(s).is_empty())
    }

    fn text_matches(text: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|p| !p.is_empty() && text.contains(p.as_str()))
    }

    fn has_images(&self, state: &PageState) -> bool {
        self.result_images.iter().any(|s| {
            state
                .matches(s)
                .iter()
                .any(|e| e.src.as_deref().is_some_and(|src| !src.trim().is_empty()))
        })
    }
}

impl SignalClassifier for SurfacePolicy {
    fn watched(&self) -> Vec<Selector> {
        let mut watched: Vec<Selector> = Vec::new();
        for s in self
            .result_images
            .iter()
            .chain(&self.completion_markers)
            .chain(&self.auth_lost_selectors)
        {
            if !watched.contains(s) {
                watched.push(s.clone());
            }
        }
        watched
    }

    fn classify(&self, state: &PageState) -> PageSignal {
        let url = state.url.to_lowercase();
        if Self::text_matches(&url, &self.auth_lost_url_patterns)
            || Self::any_match(state, &self.auth_lost_selectors)
        {
            return PageSignal::AuthLost;
        }

        let text = state.text.to_lowercase();
        if Self::text_matches(&text, &self.content_policy_patterns) {
            return PageSignal::ContentBlocked;
        }
        if Self::text_matches(&text, &self.rate_limit_patterns) {
            return PageSignal::RateLimited;
        }

        if self.has_images(state) || Self::any_match(state, &self.completion_markers) {
            return PageSignal::Success;
        }
        PageSignal::Unknown
    }
}

/// `state` with every echo of `prompt` removed from the page text.
///
/// The result page repeats the prompt, so words the user typed must not be
/// read as service messages. Text is lowercased and whitespace collapsed.
pub fn without_prompt(state: &PageState, prompt: &str) -> PageState {
    let prompt = collapse_lower(prompt);
    let mut text = collapse_lower(&state.text);
    if !prompt.is_empty() {
        text = text.replace(&prompt, " ");
    }
    PageState {
        text,
        ..state.clone()
    }
}

fn collapse_lower(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse(field: &'static str, raw: &str) -> Result<Selector> {
    raw.parse()
        .map_err(|source| Error::Surface { field, source })
}

pub(crate) fn parse_all(field: &'static str, raw: &[String]) -> Result<Vec<Selector>> {
    raw.iter().map(|s| parse(field, s)).collect()
}

fn lowercase(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}
