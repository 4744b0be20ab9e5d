//! Chrome DevTools Protocol driver backed by `chromiumoxide`.

use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use {
    async_trait::async_trait,
    chromiumoxide::{
        Browser, BrowserConfig as CdpBrowserConfig, Page,
        cdp::browser_protocol::{
            input::{
                DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
                DispatchMouseEventType, MouseButton,
            },
            network::{Cookie as CdpCookie, CookieParam, CookieSameSite, TimeSinceEpoch},
        },
        handler::viewport::Viewport,
    },
    futures::StreamExt,
    mirage_session::{Cookie, Session},
    secrecy::ExposeSecret,
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    detect::{Detection, detect_browser},
    dom,
    driver::{BrowserDriver, DriverLauncher},
    error::BrowserError,
    types::{BrowserConfig, ElementHandle, FetchedResource, PageState, Selector},
};

/// Launches a local Chromium-family browser per generation run.
#[derive(Debug, Clone, Default)]
pub struct CdpLauncher {
    config: BrowserConfig,
}

impl CdpLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self, executable: &Path) -> Result<CdpBrowserConfig, BrowserError> {
        let mut builder = CdpBrowserConfig::builder();

        // chromiumoxide runs headless unless asked otherwise.
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .viewport(Viewport {
                width: self.config.viewport_width,
                height: self.config.viewport_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(self.config.viewport_width, self.config.viewport_height)
            .request_timeout(Duration::from_millis(self.config.navigation_timeout_ms))
            .chrome_executable(executable);

        if let Some(ref ua) = self.config.user_agent {
            builder = builder.arg(format!("--user-agent={ua}"));
        }

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");

        builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(format!("failed to build browser config: {e}")))
    }
}

#[async_trait]
impl DriverLauncher for CdpLauncher {
    type Driver = CdpDriver;

    async fn launch(&self) -> Result<CdpDriver, BrowserError> {
        let executable = match detect_browser(self.config.chrome_path.as_deref()) {
            Detection::Found { path, source } => {
                debug!(path = %path.display(), %source, "browser detected");
                path
            },
            Detection::Missing { hint } => return Err(BrowserError::BrowserNotAvailable(hint)),
        };

        let config = self.browser_config(&executable)?;

        info!(
            path = %executable.display(),
            headless = self.config.headless,
            viewport_width = self.config.viewport_width,
            viewport_height = self.config.viewport_height,
            "launching browser"
        );

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser event error");
                }
            }
            debug!("browser event handler exited (connection closed)");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(BrowserError::LaunchFailed(format!("failed to open page: {e}")));
            },
        };

        Ok(CdpDriver {
            browser: Mutex::new(browser),
            page,
            handler,
            closed: AtomicBool::new(false),
        })
    }
}

/// A single browser with one page.
pub struct CdpDriver {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    closed: AtomicBool,
}

impl CdpDriver {
    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrowserError::ConnectionClosed("driver already closed".into()));
        }
        Ok(())
    }

    async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn set_cookie(&self, cookie: &Cookie, page_url: Option<&str>) -> Result<(), String> {
        let mut builder = CookieParam::builder()
            .name(cookie.name.clone())
            .value(cookie.value.expose_secret().clone())
            .secure(cookie.secure)
            .http_only(cookie.http_only);

        builder = match (cookie.domain.as_deref(), page_url) {
            (Some(domain), _) => builder.domain(domain),
            (None, Some(url)) => builder.url(url),
            (None, None) => return Err("cookie has no domain and the page has no URL".into()),
        };
        if let Some(path) = cookie.path.as_deref() {
            builder = builder.path(path);
        }
        if let Some(expires) = cookie.expiry() {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
        if let Some(policy) = cookie.same_site_policy() {
            builder = builder.same_site(match policy {
                "Strict" => CookieSameSite::Strict,
                "Lax" => CookieSameSite::Lax,
                _ => CookieSameSite::None,
            });
        }

        let param = builder.build()?;
        self.page
            .set_cookie(param)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn to_session_cookie(c: CdpCookie) -> Cookie {
    let mut cookie = Cookie::new(c.name, c.value).with_domain(c.domain);
    cookie.path = Some(c.path);
    cookie.secure = c.secure;
    cookie.http_only = c.http_only;
    cookie.expires = (c.expires > 0.0).then_some(c.expires);
    cookie.same_site = c.same_site.map(|s| {
        match s {
            CookieSameSite::Strict => "Strict",
            CookieSameSite::Lax => "Lax",
            CookieSameSite::None => "None",
        }
        .to_string()
    });
    cookie
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        validate_url(url)?;

        if let Err(e) = self.page.goto(url).await {
            let err: BrowserError = e.into();
            if err.is_connection_lost() {
                return Err(BrowserError::ConnectionClosed(err.to_string()));
            }
            return Err(BrowserError::NavigationFailed(err.to_string()));
        }
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!(url, error = %e, "wait for navigation failed");
        }

        let current = self.current_url().await.unwrap_or_default();
        info!(url = %current, "navigated");
        Ok(())
    }

    async fn inject_session(&self, session: &Session) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let page_url = self.current_url().await;
        let page_host = page_url
            .as_deref()
            .and_then(|u| url::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_string));

        let mut installed = 0usize;
        for cookie in session.cookies() {
            let mut result = self.set_cookie(cookie, page_url.as_deref()).await;

            // Some exports carry `.host` domains Chrome refuses for host-only
            // cookies; retry scoped to the current host.
            if result.is_err()
                && let Some(host) = page_host.as_deref()
                && cookie.domain.as_deref().is_some_and(|d| d.starts_with('.'))
                && cookie.matches_host(host)
            {
                let scoped = cookie.clone().with_domain(host);
                result = self.set_cookie(&scoped, page_url.as_deref()).await;
            }

            match result {
                Ok(()) => installed += 1,
                Err(e) => warn!(cookie = %cookie.name, error = %e, "cookie rejected by browser"),
            }
        }

        if installed == 0 && !session.cookies().is_empty() {
            return Err(BrowserError::SessionRejected(
                "browser accepted none of the session cookies".into(),
            ));
        }
        info!(
            installed,
            total = session.cookies().len(),
            "session cookies injected"
        );
        Ok(())
    }

    async fn capture_session(&self) -> Result<Vec<Cookie>, BrowserError> {
        self.ensure_open()?;
        let cookies = self.page.get_cookies().await?;
        debug!(count = cookies.len(), "captured browser cookies");
        Ok(cookies.into_iter().map(to_session_cookie).collect())
    }

    async fn find_elements(&self, selector: &Selector) -> Result<Vec<ElementHandle>, BrowserError> {
        self.ensure_open()?;
        dom::find_elements(&self.page, selector).await
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        dom::focus_and_clear(&self.page, element.ref_).await?;

        for c in text.chars() {
            let key_down = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyDown)
                .text(c.to_string())
                .build()
                .map_err(BrowserError::Cdp)?;
            self.page.execute(key_down).await?;

            let key_up = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyUp)
                .text(c.to_string())
                .build()
                .map_err(BrowserError::Cdp)?;
            self.page.execute(key_up).await?;
        }

        debug!(ref_ = element.ref_, chars = text.chars().count(), "typed text");
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let (x, y) = dom::element_center(&self.page, element.ref_).await?;

        for kind in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let cmd = DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(x)
                .y(y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(BrowserError::Cdp)?;
            self.page.execute(cmd).await?;
        }

        debug!(ref_ = element.ref_, x, y, "clicked element");
        Ok(())
    }

    async fn current_page_state(&self, watched: &[Selector]) -> Result<PageState, BrowserError> {
        self.ensure_open()?;
        dom::page_state(&self.page, watched).await
    }

    async fn fetch(&self, url: &str) -> Result<FetchedResource, BrowserError> {
        self.ensure_open()?;
        if url.starts_with("data:") {
            return FetchedResource::from_data_url(url);
        }
        dom::fetch_in_page(&self.page, url).await
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "waiting for browser process failed");
        }
        self.handler.abort();
        closed?;
        info!("browser closed");
        Ok(())
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Reject URLs the driver should never load.
fn validate_url(url: &str) -> Result<(), BrowserError> {
    if url.is_empty() {
        return Err(BrowserError::InvalidAction("URL cannot be empty".into()));
    }
    let parsed = url::Url::parse(url)
        .map_err(|e| BrowserError::InvalidAction(format!("invalid URL '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" | "about" => Ok(()),
        scheme => Err(BrowserError::InvalidAction(format!(
            "unsupported URL scheme '{scheme}', only http/https allowed"
        ))),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_url_accepts_http() {
        assert!(validate_url("https://www.bing.com/images/create").is_ok());
        assert!(validate_url("about:blank").is_ok());
    }

    #[test]
    fn validate_url_rejects_other_schemes() {
        assert!(validate_url("").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(BrowserError::InvalidAction(m)) if m.contains("file")
        ));
    }
}
