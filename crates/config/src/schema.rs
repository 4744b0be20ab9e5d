/// Config schema types (browser, session, generation surface, downloads).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirageConfig {
    pub browser: BrowserConfig,
    pub session: SessionConfig,
    pub generation: GenerationConfig,
    pub surface: SurfaceConfig,
    pub download: DownloadConfig,
}

/// Browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Path to Chrome/Chromium binary (auto-detected if not set).
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Per-command CDP timeout in milliseconds.
    pub navigation_timeout_ms: u64,
    /// User agent string (browser default if not set).
    pub user_agent: Option<String>,
    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            viewport_width: 1440,
            viewport_height: 900,
            navigation_timeout_ms: 30_000,
            user_agent: None,
            chrome_args: vec!["--disable-blink-features=AutomationControlled".into()],
        }
    }
}

/// Persisted session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session record location. Defaults to `<config dir>/session.json`.
    pub path: Option<PathBuf>,
    /// Sessions older than this are treated as expired.
    pub max_age_hours: u64,
    /// Save the browser's cookies as a fresh session after a successful run.
    pub refresh_on_success: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_age_hours: 168,
            refresh_on_success: true,
        }
    }
}

/// Timing and bounds for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Page where prompts are submitted.
    pub surface_url: String,
    pub poll_interval_ms: u64,
    /// Deadline for a terminal page signal after submission.
    pub poll_timeout_secs: u64,
    /// Deadline for the whole run, downloads included.
    pub run_timeout_secs: u64,
    /// How long to keep re-sampling results after the success signal.
    pub settle_timeout_ms: u64,
    /// Number of images the surface usually returns. Zero disables the early exit.
    pub expected_batch: usize,
    pub max_prompt_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            surface_url: "https://www.bing.com/images/create".into(),
            poll_interval_ms: 2_000,
            poll_timeout_secs: 180,
            run_timeout_secs: 600,
            settle_timeout_ms: 10_000,
            expected_batch: 4,
            max_prompt_chars: 480,
        }
    }
}

/// Selectors and text patterns that describe the generation surface.
///
/// Selectors are CSS unless prefixed with `xpath:`. Text patterns are matched
/// case-insensitively against the visible page text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub prompt_input: String,
    pub submit_button: String,
    pub consent_button: Option<String>,
    /// Generated image elements, in presentation order.
    pub result_images: Vec<String>,
    /// Elements that only appear once a generation has finished.
    pub completion_markers: Vec<String>,
    pub content_policy_patterns: Vec<String>,
    pub rate_limit_patterns: Vec<String>,
    pub auth_lost_url_patterns: Vec<String>,
    pub auth_lost_selectors: Vec<String>,
    /// Query parameters stripped from image references to get full resolution.
    pub thumbnail_params: Vec<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            prompt_input: "#gi_form_q".into(),
            submit_button: "#create_btn_c".into(),
            consent_button: Some("button[id*='accept'], button[class*='accept']".into()),
            result_images: vec![
                "img.image-row-img".into(),
                ".gir_mmimg img".into(),
                "img.mimg".into(),
            ],
            completion_markers: vec![
                "a[href*='create'][href*='id=']".into(),
                "ul li div div a[href*='create']".into(),
                ".gir_mmimg a[href*='create']".into(),
                "xpath://a[contains(@href, 'create') and contains(@href, 'id=')]".into(),
            ],
            content_policy_patterns: vec![
                "content warning".into(),
                "this prompt has been blocked".into(),
                "unsafe image content detected".into(),
                "violates our content policy".into(),
            ],
            rate_limit_patterns: vec![
                "too many requests".into(),
                "you've reached the limit".into(),
                "daily limit".into(),
                "rate limit".into(),
            ],
            auth_lost_url_patterns: vec![
                "login.live.com".into(),
                "login.microsoftonline.com".into(),
                "/fd/auth/signin".into(),
            ],
            auth_lost_selectors: vec!["form[action*='login.live.com']".into()],
            thumbnail_params: ["w", "h", "c", "rs", "qlt", "o", "dpr", "pid"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// How artifact bytes are fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// `blob:`/`data:` through the page, `http(s)` through the HTTP client.
    #[default]
    Auto,
    /// Everything through the authenticated page.
    Page,
    /// Everything through the HTTP client with session cookies.
    Http,
}

/// Artifact download and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    /// Attempts per artifact, first try included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Maximum downloads in flight.
    pub concurrency: usize,
    pub fetch_mode: FetchMode,
    /// Store files under a folder named after the prompt.
    pub group_by_prompt: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            concurrency: 4,
            fetch_mode: FetchMode::Auto,
            group_by_prompt: false,
        }
    }
}
