//! Drives one generation request from session check to stored artifacts.

use std::{path::PathBuf, time::Duration};

use {
    mirage_browser::{
        BrowserDriver, BrowserError, DriverLauncher, ElementHandle, PageState, Selector,
    },
    mirage_config::{DownloadConfig, GenerationConfig, MirageConfig},
    mirage_media::{
        ArtifactDownloader, ArtifactStore, HttpFetcher, PageFetcher, RetryPolicy, RoutedFetcher,
        prompt_dir_name,
    },
    mirage_session::{Session, SessionStore, is_fresh},
    tokio::time::{Instant, sleep, timeout_at},
    tracing::{debug, info, warn},
};

use crate::{
    error::Result,
    extractor::ImageExtractor,
    outcome::{FailureReason, GenerationOutcome, GenerationStatus, RunState},
    request::GenerationRequest,
    signal::{
        FormSelectors, PageSignal, SignalClassifier, SurfacePolicy, without_prompt,
    },
};

/// How a pre-download phase ended without references.
enum Halt {
    Failed(FailureReason),
    TimedOut,
}

type Step<T> = std::result::Result<T, Halt>;

impl From<FailureReason> for Halt {
    fn from(reason: FailureReason) -> Self {
        Self::Failed(reason)
    }
}

/// Stand-in for deadlines too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, clamped instead of overflowing.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Whether one more `interval` still ends at or before `deadline`.
fn fits_before(interval: Duration, deadline: Instant) -> bool {
    Instant::now()
        .checked_add(interval)
        .is_some_and(|next| next <= deadline)
}

fn browser_failure(err: &BrowserError) -> Halt {
    Halt::Failed(FailureReason::Browser(err.to_string()))
}

/// Timing and sizing knobs for one run.
#[derive(Debug, Clone)]
struct Timings {
    surface_url: String,
    poll_interval: Duration,
    poll_timeout: Duration,
    run_timeout: Duration,
    settle_timeout: Duration,
    expected_batch: usize,
    max_prompt_chars: usize,
}

impl From<&GenerationConfig> for Timings {
    fn from(cfg: &GenerationConfig) -> Self {
        Self {
            surface_url: cfg.surface_url.clone(),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            poll_timeout: Duration::from_secs(cfg.poll_timeout_secs),
            run_timeout: Duration::from_secs(cfg.run_timeout_secs),
            settle_timeout: Duration::from_millis(cfg.settle_timeout_ms),
            // Zero: wait for the count to stop changing instead.
            expected_batch: match cfg.expected_batch {
                0 => usize::MAX,
                n => n,
            },
            max_prompt_chars: cfg.max_prompt_chars,
        }
    }
}

/// The generation state machine.
///
/// Owns the browser exclusively for the duration of a run: a driver is
/// launched per request and closed on every exit path.
pub struct GenerationController<L, C = SurfacePolicy> {
    launcher: L,
    sessions: SessionStore,
    classifier: C,
    extractor: ImageExtractor,
    form: FormSelectors,
    timings: Timings,
    download: DownloadConfig,
    session_max_age: Duration,
    refresh_session: bool,
}

impl<L: DriverLauncher> GenerationController<L, SurfacePolicy> {
    pub fn new(launcher: L, sessions: SessionStore, config: &MirageConfig) -> Result<Self> {
        Ok(Self {
            launcher,
            sessions,
            classifier: SurfacePolicy::from_config(&config.surface)?,
            extractor: ImageExtractor::from_config(&config.surface)?,
            form: FormSelectors::from_config(&config.surface)?,
            timings: Timings::from(&config.generation),
            download: config.download.clone(),
            session_max_age: Duration::from_secs(config.session.max_age_hours.saturating_mul(3600)),
            refresh_session: config.session.refresh_on_success,
        })
    }
}

impl<L: DriverLauncher, C: SignalClassifier> GenerationController<L, C> {
    /// Replace the page-state classification policy.
    pub fn with_classifier<C2: SignalClassifier>(self, classifier: C2) -> GenerationController<L, C2> {
        GenerationController {
            launcher: self.launcher,
            sessions: self.sessions,
            classifier,
            extractor: self.extractor,
            form: self.form,
            timings: self.timings,
            download: self.download,
            session_max_age: self.session_max_age,
            refresh_session: self.refresh_session,
        }
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.timings.run_timeout = timeout;
        self
    }

    /// Validate `prompt` and run it.
    pub async fn generate(&self, prompt: &str) -> Result<GenerationOutcome> {
        let request = GenerationRequest::new(prompt, self.timings.max_prompt_chars)?;
        self.run(&request).await
    }

    /// Run one request to a terminal outcome.
    ///
    /// Only local faults (unreadable session file, ...) are errors; every
    /// upstream condition is reported in the outcome.
    pub async fn run(&self, request: &GenerationRequest) -> Result<GenerationOutcome> {
        let id = request.id();
        info!(request_id = %id, prompt = %request.prompt(), "generation started");
        self.enter(request, RunState::Idle);

        let session = match self.sessions.load() {
            Ok(s) => s,
            Err(e) if e.requires_login() => {
                warn!(request_id = %id, error = %e, "no usable session");
                return Ok(self.finish(GenerationOutcome::failed(id, FailureReason::AuthExpired)));
            },
            Err(e) => return Err(e.into()),
        };
        if !is_fresh(&session, self.session_max_age) {
            warn!(
                request_id = %id,
                captured_at = %session.captured_at(),
                valid = session.is_valid(),
                "session is stale"
            );
            return Ok(self.finish(GenerationOutcome::failed(id, FailureReason::AuthExpired)));
        }
        self.enter(request, RunState::SessionReady);

        let deadline = deadline_after(self.timings.run_timeout);
        let driver = match timeout_at(deadline, self.launcher.launch()).await {
            Ok(Ok(driver)) => driver,
            Ok(Err(e)) => {
                warn!(request_id = %id, error = %e, "browser launch failed");
                return Ok(self.finish(GenerationOutcome::failed(
                    id,
                    FailureReason::Browser(e.to_string()),
                )));
            },
            Err(_) => {
                return Ok(self.finish(GenerationOutcome::new(id, GenerationStatus::TimedOut)));
            },
        };

        let outcome = self.drive(&driver, &session, request, deadline).await;

        if let Err(e) = driver.close().await {
            warn!(request_id = %id, error = %e, "browser close failed");
        }
        Ok(self.finish(outcome))
    }

    async fn drive<D: BrowserDriver>(
        &self,
        driver: &D,
        session: &Session,
        request: &GenerationRequest,
        deadline: Instant,
    ) -> GenerationOutcome {
        let id = request.id();
        let references =
            match timeout_at(deadline, self.submit_and_wait(driver, session, request)).await {
                Ok(Ok(refs)) => refs,
                Ok(Err(Halt::Failed(reason))) => return GenerationOutcome::failed(id, reason),
                Ok(Err(Halt::TimedOut)) | Err(_) => {
                    return GenerationOutcome::new(id, GenerationStatus::TimedOut);
                },
            };

        self.enter(request, RunState::Downloading);
        let report = match self.downloader(driver, session, request) {
            Ok(downloader) => downloader.download_all(&references, Some(deadline)).await,
            Err(e) => {
                warn!(request_id = %id, error = %e, "downloader setup failed");
                return GenerationOutcome::failed(id, FailureReason::DownloadFailed);
            },
        };
        let verified = report.verified_count();

        let status = if report.timed_out {
            GenerationStatus::TimedOut
        } else if verified == 0 {
            GenerationStatus::Failed(FailureReason::DownloadFailed)
        } else {
            GenerationStatus::Succeeded
        };

        if verified > 0
            && self.refresh_session
            && !report.timed_out
            && timeout_at(deadline, self.recapture_session(driver, request))
                .await
                .is_err()
        {
            warn!(request_id = %id, "session capture abandoned at run deadline");
        }

        GenerationOutcome::new(id, status).with_artifacts(report.artifacts)
    }

    /// Navigate, submit, poll and extract.
    async fn submit_and_wait<D: BrowserDriver>(
        &self,
        driver: &D,
        session: &Session,
        request: &GenerationRequest,
    ) -> Step<Vec<String>> {
        let id = request.id();
        let url = &self.timings.surface_url;
        let watched = self.watched();

        // Cookies can only be set for the origin the page is on.
        driver.navigate(url).await.map_err(|e| browser_failure(&e))?;
        match driver.inject_session(session).await {
            Ok(()) => {},
            Err(BrowserError::SessionRejected(msg)) => {
                warn!(request_id = %id, reason = %msg, "browser rejected the session");
                return Err(FailureReason::AuthExpired.into());
            },
            Err(e) => return Err(browser_failure(&e)),
        }
        driver.navigate(url).await.map_err(|e| browser_failure(&e))?;

        let landing = driver
            .current_page_state(&watched)
            .await
            .map_err(|e| browser_failure(&e))?;
        if self.classifier.classify(&landing) == PageSignal::AuthLost {
            warn!(request_id = %id, url = %landing.url, "session not accepted by the service");
            return Err(FailureReason::AuthExpired.into());
        }

        self.dismiss_consent(driver).await;

        self.enter(request, RunState::Submitting);
        let input = first_element(driver, &self.form.prompt_input).await?;
        driver
            .type_text(&input, request.prompt())
            .await
            .map_err(|e| browser_failure(&e))?;
        let submit = first_element(driver, &self.form.submit_button).await?;
        driver.click(&submit).await.map_err(|e| browser_failure(&e))?;
        info!(request_id = %id, "prompt submitted");

        self.enter(request, RunState::Polling);
        let state = self.poll(driver, request, &watched).await?;

        let state = self.settle(driver, state, &watched).await;

        self.enter(request, RunState::Extracting);
        let references = self.extractor.extract(&state);
        if references.is_empty() {
            warn!(request_id = %id, url = %state.url, "success signal without image references");
            return Err(FailureReason::ParseError(format!(
                "no image references matched at {}",
                state.url
            ))
            .into());
        }
        info!(request_id = %id, count = references.len(), "image references extracted");
        Ok(references)
    }

    /// Sample the page until a terminal signal or the poll deadline.
    async fn poll<D: BrowserDriver>(
        &self,
        driver: &D,
        request: &GenerationRequest,
        watched: &[Selector],
    ) -> Step<PageState> {
        let id = request.id();
        let poll_deadline = deadline_after(self.timings.poll_timeout);
        let mut samples = 0u32;

        loop {
            samples += 1;
            match driver.current_page_state(watched).await {
                Ok(state) => {
                    let signal = self
                        .classifier
                        .classify(&without_prompt(&state, request.prompt()));
                    debug!(request_id = %id, sample = samples, ?signal, "page sampled");
                    match signal {
                        PageSignal::Success => return Ok(state),
                        PageSignal::RateLimited => return Err(FailureReason::RateLimited.into()),
                        PageSignal::AuthLost => return Err(FailureReason::AuthExpired.into()),
                        PageSignal::ContentBlocked => {
                            return Err(FailureReason::ContentPolicyViolation.into());
                        },
                        PageSignal::Unknown => {},
                    }
                },
                Err(e) if e.is_connection_lost() => return Err(browser_failure(&e)),
                // Sampling during a page transition fails transiently.
                Err(e) => debug!(request_id = %id, error = %e, "page sample failed"),
            }

            if !fits_before(self.timings.poll_interval, poll_deadline) {
                warn!(request_id = %id, samples, "no terminal page signal before poll deadline");
                return Err(Halt::TimedOut);
            }
            sleep(self.timings.poll_interval).await;
        }
    }

    /// Keep sampling after success while images are still appearing.
    async fn settle<D: BrowserDriver>(
        &self,
        driver: &D,
        mut state: PageState,
        watched: &[Selector],
    ) -> PageState {
        let settle_deadline = deadline_after(self.timings.settle_timeout);
        let mut count = self.extractor.extract(&state).len();

        while count < self.timings.expected_batch
            && fits_before(self.timings.poll_interval, settle_deadline)
        {
            sleep(self.timings.poll_interval).await;
            let Ok(next) = driver.current_page_state(watched).await else {
                break;
            };
            let next_count = self.extractor.extract(&next).len();
            if next_count < count {
                continue;
            }
            let stable = next_count == count && count > 0;
            state = next;
            count = next_count;
            if stable {
                break;
            }
        }
        debug!(count, expected = self.timings.expected_batch, "result set settled");
        state
    }

    async fn dismiss_consent<D: BrowserDriver>(&self, driver: &D) {
        let Some(selector) = self.form.consent_button.as_ref() else {
            return;
        };
        match driver.find_elements(selector).await {
            Ok(found) => {
                if let Some(button) = found.first()
                    && let Err(e) = driver.click(button).await
                {
                    debug!(error = %e, "consent click failed");
                }
            },
            Err(e) => debug!(error = %e, "consent lookup failed"),
        }
    }

    fn downloader<'a, D: BrowserDriver>(
        &self,
        driver: &'a D,
        session: &Session,
        request: &GenerationRequest,
    ) -> mirage_media::Result<ArtifactDownloader<RoutedFetcher<'a>>> {
        let http = HttpFetcher::with_cookies(session.cookies().to_vec())?
            .with_referer(self.timings.surface_url.clone());
        let fetcher = RoutedFetcher::new(
            self.download.fetch_mode,
            http,
            Some(PageFetcher::new(driver)),
        );

        let mut root = self.download.output_dir.clone();
        if self.download.group_by_prompt {
            root.push(prompt_dir_name(request.prompt()));
        }

        Ok(ArtifactDownloader::new(
            fetcher,
            ArtifactStore::new(root),
            RetryPolicy::from(&self.download),
        )
        .with_concurrency(self.download.concurrency))
    }

    /// Save the browser's current cookies as a new session.
    async fn recapture_session<D: BrowserDriver>(&self, driver: &D, request: &GenerationRequest) {
        let id = request.id();
        let cookies = match driver.capture_session().await {
            Ok(c) => c,
            Err(e) => {
                warn!(request_id = %id, error = %e, "session capture failed");
                return;
            },
        };
        let renewed = Session::captured(cookies);
        if !renewed.is_valid() {
            debug!(request_id = %id, "captured cookie set is empty, keeping stored session");
            return;
        }
        if let Err(e) = self.sessions.save(&renewed) {
            warn!(request_id = %id, error = %e, "session save failed");
        }
    }

    fn watched(&self) -> Vec<Selector> {
        let mut watched = self.classifier.watched();
        for s in self.extractor.watched() {
            if !watched.contains(s) {
                watched.push(s.clone());
            }
        }
        watched
    }

    fn enter(&self, request: &GenerationRequest, state: RunState) {
        debug!(request_id = %request.id(), ?state, "state transition");
    }

    fn finish(&self, outcome: GenerationOutcome) -> GenerationOutcome {
        let verified = outcome.verified().count();
        match &outcome.status {
            GenerationStatus::Succeeded => {
                debug!(request_id = %outcome.request_id, state = ?RunState::Completed, "state transition");
                info!(
                    request_id = %outcome.request_id,
                    verified,
                    failed = outcome.artifacts.len() - verified,
                    "generation succeeded"
                );
            },
            status => warn!(
                request_id = %outcome.request_id,
                %status,
                verified,
                "generation did not succeed"
            ),
        }
        outcome
    }
}

async fn first_element<D: BrowserDriver>(
    driver: &D,
    selector: &Selector,
) -> Step<ElementHandle> {
    let found = driver
        .find_elements(selector)
        .await
        .map_err(|e| browser_failure(&e))?;
    found.into_iter().next().ok_or_else(|| {
        Halt::Failed(FailureReason::ParseError(format!(
            "no element matches {selector}"
        )))
    })
}
