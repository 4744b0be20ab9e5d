#![allow(clippy::unwrap_used, clippy::expect_used)]
//! State-machine behaviour against a scripted in-memory browser.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, TimeDelta, Utc},
    mirage_browser::{
        BrowserDriver, BrowserError, DriverLauncher, ElementHandle, ElementInfo, FetchedResource,
        PageState, Selector, SelectorMatch,
    },
    mirage_config::{FetchMode, MirageConfig},
    mirage_generation::{
        FailureReason, GenerationController, GenerationOutcome, GenerationStatus, PageSignal,
        SignalClassifier,
    },
    mirage_session::{Cookie, Session, SessionStore},
};

const SURFACE: &str = "https://www.bing.com/images/create";
const PROMPT: &str = "a blue fox in snow";

fn png(seed: u8) -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, seed]
}

fn image_url(i: usize) -> String {
    format!("https://th.bing.com/th/id/OIG.{i}")
}

fn images_match(srcs: &[String]) -> SelectorMatch {
    SelectorMatch {
        selector: "img.image-row-img".parse().unwrap(),
        elements: srcs
            .iter()
            .map(|s| ElementInfo {
                tag: "img".into(),
                src: Some(s.clone()),
                visible: true,
                ..Default::default()
            })
            .collect(),
    }
}

fn loading() -> PageState {
    PageState {
        url: SURFACE.into(),
        title: "Image Creator".into(),
        text: "Generating your images".into(),
        watched: Vec::new(),
    }
}

fn done(n: usize) -> PageState {
    let srcs: Vec<String> = (0..n).map(image_url).collect();
    PageState {
        url: format!("{SURFACE}/a-blue-fox/1-abc"),
        watched: vec![images_match(&srcs)],
        ..loading()
    }
}

fn with_text(text: &str) -> PageState {
    PageState {
        text: text.into(),
        ..loading()
    }
}

#[derive(Default)]
struct Calls {
    launches: usize,
    navigations: usize,
    injections: usize,
    typed: Vec<String>,
    clicks: usize,
    captures: usize,
    closes: usize,
    fetches: HashMap<String, u32>,
}

enum Serve {
    Image(Vec<u8>),
    Garbage,
}

#[derive(Default)]
struct Script {
    states: Mutex<VecDeque<PageState>>,
    serve: HashMap<String, Serve>,
    fetch_delay: HashMap<String, Duration>,
    missing_prompt_input: bool,
    launch_fails: bool,
    reject_session: bool,
    calls: Mutex<Calls>,
}

impl Script {
    fn new(states: Vec<PageState>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            ..Default::default()
        }
    }

    fn serving(mut self, n: usize) -> Self {
        for i in 0..n {
            self.serve.insert(image_url(i), Serve::Image(png(i as u8)));
        }
        self
    }

    fn broken(mut self, i: usize) -> Self {
        self.serve.insert(image_url(i), Serve::Garbage);
        self
    }

    fn calls(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap()
    }
}

struct ScriptedDriver(Arc<Script>);

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
        self.0.calls().navigations += 1;
        Ok(())
    }

    async fn inject_session(&self, _session: &Session) -> Result<(), BrowserError> {
        self.0.calls().injections += 1;
        if self.0.reject_session {
            return Err(BrowserError::SessionRejected("all cookies refused".into()));
        }
        Ok(())
    }

    async fn capture_session(&self) -> Result<Vec<Cookie>, BrowserError> {
        self.0.calls().captures += 1;
        Ok(vec![Cookie::new("_U", "renewed").with_domain(".bing.com")])
    }

    async fn find_elements(&self, selector: &Selector) -> Result<Vec<ElementHandle>, BrowserError> {
        if self.0.missing_prompt_input && selector.expr() == "#gi_form_q" {
            return Ok(Vec::new());
        }
        Ok(vec![ElementHandle {
            ref_: 1,
            tag: "input".into(),
            frame: None,
        }])
    }

    async fn type_text(&self, _element: &ElementHandle, text: &str) -> Result<(), BrowserError> {
        self.0.calls().typed.push(text.to_string());
        Ok(())
    }

    async fn click(&self, _element: &ElementHandle) -> Result<(), BrowserError> {
        self.0.calls().clicks += 1;
        Ok(())
    }

    async fn current_page_state(&self, _watched: &[Selector]) -> Result<PageState, BrowserError> {
        let mut states = self.0.states.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        Ok(state.unwrap_or_else(loading))
    }

    async fn fetch(&self, url: &str) -> Result<FetchedResource, BrowserError> {
        *self.0.calls().fetches.entry(url.to_string()).or_default() += 1;
        if let Some(delay) = self.0.fetch_delay.get(url) {
            tokio::time::sleep(*delay).await;
        }
        match self.0.serve.get(url) {
            Some(Serve::Image(bytes)) => Ok(FetchedResource {
                bytes: bytes.clone(),
                content_type: Some("image/png".into()),
            }),
            Some(Serve::Garbage) => Ok(FetchedResource {
                bytes: b"<html>Something went wrong</html>".to_vec(),
                content_type: Some("text/html".into()),
            }),
            None => Err(BrowserError::FetchFailed("HTTP 404".into())),
        }
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.0.calls().closes += 1;
        Ok(())
    }
}

struct ScriptedLauncher(Arc<Script>);

#[async_trait]
impl DriverLauncher for ScriptedLauncher {
    type Driver = ScriptedDriver;

    async fn launch(&self) -> Result<ScriptedDriver, BrowserError> {
        self.0.calls().launches += 1;
        if self.0.launch_fails {
            return Err(BrowserError::BrowserNotAvailable("no chrome".into()));
        }
        Ok(ScriptedDriver(Arc::clone(&self.0)))
    }
}

struct Harness {
    dir: tempfile::TempDir,
    config: MirageConfig,
    script: Arc<Script>,
}

impl Harness {
    fn new(script: Script) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MirageConfig::default();
        config.generation.poll_interval_ms = 5;
        config.generation.poll_timeout_secs = 5;
        config.generation.run_timeout_secs = 30;
        config.generation.settle_timeout_ms = 50;
        config.download.fetch_mode = FetchMode::Page;
        config.download.max_attempts = 2;
        config.download.base_delay_ms = 0;
        config.download.max_delay_ms = 0;
        config.download.output_dir = dir.path().join("out");

        let harness = Self {
            dir,
            config,
            script: Arc::new(script),
        };
        harness.save_session(Utc::now() - TimeDelta::hours(1));
        harness
    }

    fn store(&self) -> SessionStore {
        SessionStore::new(self.dir.path().join("session.json"))
    }

    fn save_session(&self, captured_at: DateTime<Utc>) {
        let cookies = vec![Cookie::new("_U", "token").with_domain(".bing.com")];
        self.store()
            .save(&Session::new(cookies, captured_at))
            .unwrap();
    }

    fn output_dir(&self) -> &Path {
        &self.config.download.output_dir
    }

    fn controller(&self) -> GenerationController<ScriptedLauncher> {
        GenerationController::new(
            ScriptedLauncher(Arc::clone(&self.script)),
            self.store(),
            &self.config,
        )
        .unwrap()
    }

    async fn run(&self) -> GenerationOutcome {
        self.controller().generate(PROMPT).await.unwrap()
    }

    fn files_on_disk(&self) -> usize {
        std::fs::read_dir(self.output_dir())
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

#[tokio::test]
async fn happy_path_downloads_four_distinct_images() {
    let h = Harness::new(Script::new(vec![loading(), loading(), done(4)]).serving(4));
    let outcome = h.run().await;

    assert_eq!(outcome.status, GenerationStatus::Succeeded);
    assert!(outcome.is_success());
    assert_eq!(outcome.verified().count(), 4);
    let hashes: HashSet<_> = outcome.artifacts.iter().map(|a| &a.content_hash).collect();
    assert_eq!(hashes.len(), 4);
    assert_eq!(h.files_on_disk(), 4);

    let calls = h.script.calls();
    assert_eq!(calls.launches, 1);
    assert_eq!(calls.injections, 1);
    // Consent banner and submit button.
    assert_eq!(calls.clicks, 2);
    assert_eq!(calls.closes, 1);
    assert_eq!(calls.typed, [PROMPT]);
    assert_eq!(calls.captures, 1);
}

#[tokio::test]
async fn successful_run_renews_the_stored_session() {
    let h = Harness::new(Script::new(vec![loading(), done(1)]).serving(1));
    let before = h.store().load().unwrap().captured_at();
    h.run().await;
    let after = h.store().load().unwrap();
    assert!(after.captured_at() > before);
    assert_eq!(after.cookies().len(), 1);
}

#[tokio::test]
async fn artifacts_follow_extraction_order() {
    let mut script = Script::new(vec![loading(), done(4)]).serving(4);
    script
        .fetch_delay
        .insert(image_url(0), Duration::from_millis(80));
    script
        .fetch_delay
        .insert(image_url(1), Duration::from_millis(40));
    let h = Harness::new(script);

    let outcome = h.run().await;
    let sources: Vec<_> = outcome.artifacts.iter().map(|a| a.source.clone()).collect();
    let expected: Vec<_> = (0..4).map(image_url).collect();
    assert_eq!(sources, expected);
}

#[tokio::test]
async fn stale_session_fails_without_touching_the_browser() {
    let h = Harness::new(Script::new(vec![done(4)]).serving(4));
    h.save_session(Utc::now() - TimeDelta::hours(24 * 30));

    let outcome = h.run().await;
    assert_eq!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::AuthExpired)
    );
    assert!(outcome.artifacts.is_empty());
    let calls = h.script.calls();
    assert_eq!(calls.launches, 0);
    assert_eq!(calls.navigations, 0);
}

#[tokio::test]
async fn missing_session_is_auth_expired() {
    let h = Harness::new(Script::new(vec![done(4)]));
    std::fs::remove_file(h.store().path()).unwrap();

    let outcome = h.run().await;
    assert_eq!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::AuthExpired)
    );
    assert_eq!(h.script.calls().launches, 0);
}

#[tokio::test]
async fn rejected_cookies_are_auth_expired() {
    let mut script = Script::new(vec![done(4)]);
    script.reject_session = true;
    let h = Harness::new(script);

    let outcome = h.run().await;
    assert_eq!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::AuthExpired)
    );
    assert_eq!(h.script.calls().closes, 1);
}

#[tokio::test]
async fn rate_limit_before_success_is_rate_limited() {
    let h = Harness::new(
        Script::new(vec![
            loading(),
            loading(),
            with_text("You've reached the limit of free creations today"),
            done(4),
        ])
        .serving(4),
    );
    let outcome = h.run().await;
    assert_eq!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::RateLimited)
    );
    assert!(h.script.calls().fetches.is_empty());
    assert_eq!(h.script.calls().closes, 1);
}

#[tokio::test]
async fn prompt_containing_a_trigger_phrase_still_succeeds() {
    let prompt = "a road sign that says rate limit 30, daily limit style";
    let mut page = done(4);
    page.text = format!("Image Creator\n{prompt}\nDownload  Share");
    let h = Harness::new(Script::new(vec![loading(), page]).serving(4));

    let outcome = h.controller().generate(prompt).await.unwrap();
    assert_eq!(outcome.status, GenerationStatus::Succeeded);
    assert_eq!(outcome.verified().count(), 4);
}

#[tokio::test]
async fn blocked_prompt_is_content_policy_violation() {
    let h = Harness::new(Script::new(vec![
        loading(),
        with_text("This prompt has been blocked. Our system flagged it."),
    ]));
    let outcome = h.run().await;
    assert_eq!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::ContentPolicyViolation)
    );
}

#[tokio::test]
async fn login_redirect_mid_poll_is_auth_expired() {
    let redirected = PageState {
        url: "https://login.live.com/login.srf?wa=wsignin1.0".into(),
        ..loading()
    };
    let h = Harness::new(Script::new(vec![loading(), loading(), redirected]));
    let outcome = h.run().await;
    assert_eq!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::AuthExpired)
    );
    assert_eq!(h.script.calls().typed.len(), 1);
}

#[tokio::test]
async fn success_marker_without_images_is_parse_error() {
    let marker_only = PageState {
        watched: vec![SelectorMatch {
            selector: "a[href*='create'][href*='id=']".parse().unwrap(),
            elements: vec![ElementInfo {
                tag: "a".into(),
                href: Some(format!("{SURFACE}?id=1")),
                ..Default::default()
            }],
        }],
        ..loading()
    };
    let h = Harness::new(Script::new(vec![loading(), marker_only]));
    let outcome = h.run().await;
    assert!(matches!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::ParseError(_))
    ));
    assert!(outcome.artifacts.is_empty());
    assert_eq!(h.script.calls().closes, 1);
}

#[tokio::test]
async fn missing_prompt_input_is_parse_error() {
    let mut script = Script::new(vec![loading()]);
    script.missing_prompt_input = true;
    let h = Harness::new(script);

    let outcome = h.run().await;
    assert!(matches!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::ParseError(ref m)) if m.contains("#gi_form_q")
    ));
    assert!(h.script.calls().typed.is_empty());
}

#[tokio::test]
async fn one_bad_image_is_still_success() {
    let h = Harness::new(Script::new(vec![loading(), done(4)]).serving(4).broken(2));
    let outcome = h.run().await;

    assert_eq!(outcome.status, GenerationStatus::Succeeded);
    assert!(outcome.is_success());
    assert_eq!(outcome.verified().count(), 3);
    let failed: Vec<_> = outcome.unverified().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, image_url(2));
    assert!(failed[0].failure.is_some());
    // Verification failures are retried up to the attempt budget.
    assert_eq!(h.script.calls().fetches[&image_url(2)], 2);
    assert_eq!(h.files_on_disk(), 3);
}

#[tokio::test]
async fn all_bad_images_is_download_failed() {
    let script = (0..4).fold(Script::new(vec![loading(), done(4)]), Script::broken);
    let h = Harness::new(script);
    let outcome = h.run().await;

    assert_eq!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::DownloadFailed)
    );
    assert_eq!(outcome.artifacts.len(), 4);
    assert_eq!(outcome.verified().count(), 0);
    assert_eq!(h.script.calls().captures, 0);
}

#[tokio::test]
async fn rerun_with_same_content_writes_no_duplicates() {
    let h = Harness::new(Script::new(vec![loading(), done(4)]).serving(4));
    let first = h.run().await;
    let second = h.run().await;

    let hashes = |o: &GenerationOutcome| -> Vec<String> {
        o.artifacts.iter().map(|a| a.content_hash.clone()).collect()
    };
    assert_eq!(hashes(&first), hashes(&second));
    assert_eq!(h.files_on_disk(), 4);
}

#[tokio::test]
async fn run_deadline_times_out_and_releases_browser() {
    let mut h = Harness::new(Script::new(vec![loading()]));
    h.config.generation.poll_timeout_secs = 60;
    let controller = h.controller().with_run_timeout(Duration::from_millis(150));

    let started = tokio::time::Instant::now();
    let outcome = controller.generate(PROMPT).await.unwrap();
    assert_eq!(outcome.status, GenerationStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.script.calls().closes, 1);
}

#[tokio::test]
async fn download_deadline_keeps_verified_and_skips_session_capture() {
    let mut script = Script::new(vec![loading(), done(2)]).serving(2);
    script
        .fetch_delay
        .insert(image_url(1), Duration::from_secs(30));
    let h = Harness::new(script);
    let controller = h.controller().with_run_timeout(Duration::from_millis(500));

    let outcome = controller.generate(PROMPT).await.unwrap();
    assert_eq!(outcome.status, GenerationStatus::TimedOut);
    assert!(outcome.artifacts[0].is_valid());
    assert!(!outcome.artifacts[1].is_valid());
    let calls = h.script.calls();
    assert_eq!(calls.captures, 0);
    assert_eq!(calls.closes, 1);
}

#[tokio::test]
async fn unbounded_timeouts_do_not_overflow() {
    let mut h = Harness::new(Script::new(vec![loading(), done(4)]).serving(4));
    h.config.generation.poll_timeout_secs = u64::MAX;
    let outcome = h
        .controller()
        .with_run_timeout(Duration::MAX)
        .generate(PROMPT)
        .await
        .unwrap();
    assert_eq!(outcome.status, GenerationStatus::Succeeded);
}

#[tokio::test]
async fn poll_deadline_without_signal_times_out() {
    let mut h = Harness::new(Script::new(vec![loading()]));
    h.config.generation.poll_timeout_secs = 0;
    let outcome = h.run().await;
    assert_eq!(outcome.status, GenerationStatus::TimedOut);
    assert_eq!(h.script.calls().closes, 1);
}

#[tokio::test]
async fn launch_failure_is_browser_failure() {
    let mut script = Script::new(vec![done(4)]);
    script.launch_fails = true;
    let h = Harness::new(script);

    let outcome = h.run().await;
    assert!(matches!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::Browser(ref m)) if m.contains("no chrome")
    ));
    assert_eq!(h.script.calls().closes, 0);
}

#[tokio::test]
async fn grouped_output_lands_in_prompt_folder() {
    let mut h = Harness::new(Script::new(vec![loading(), done(2)]).serving(2));
    h.config.download.group_by_prompt = true;
    let outcome = h.run().await;

    let folder = h.output_dir().join("a-blue-fox-in-snow");
    for artifact in outcome.verified() {
        assert!(artifact.local_path.as_ref().unwrap().starts_with(&folder));
    }
    assert_eq!(std::fs::read_dir(folder).unwrap().count(), 2);
}

/// Policy that only trusts a page title, to show the classifier is swappable.
struct TitlePolicy;

impl SignalClassifier for TitlePolicy {
    fn watched(&self) -> Vec<Selector> {
        Vec::new()
    }

    fn classify(&self, state: &PageState) -> PageSignal {
        if state.title == "ready" {
            PageSignal::Success
        } else {
            PageSignal::Unknown
        }
    }
}

#[tokio::test]
async fn custom_classifier_replaces_default_policy() {
    // Images are present early but the custom policy waits for the title.
    let ready = PageState {
        title: "ready".into(),
        ..done(4)
    };
    let h = Harness::new(Script::new(vec![done(4), done(4), ready]).serving(4));
    let outcome = h
        .controller()
        .with_classifier(TitlePolicy)
        .generate(PROMPT)
        .await
        .unwrap();
    assert_eq!(outcome.status, GenerationStatus::Succeeded);
    assert_eq!(h.script.states.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_prompt_is_rejected_before_running() {
    let h = Harness::new(Script::new(vec![done(4)]));
    let err = h.controller().generate("   ").await.unwrap_err();
    assert!(matches!(
        err,
        mirage_generation::Error::InvalidRequest { .. }
    ));
    assert_eq!(h.script.calls().launches, 0);
}
