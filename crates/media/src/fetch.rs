//! Fetching image bytes with the authenticated context.
//!
//! `http(s)` references go through `reqwest` carrying the session cookies for
//! the reference's host; `blob:` references only exist inside the page that
//! created them and are fetched there.

use std::time::Duration;

use {
    async_trait::async_trait,
    mirage_browser::{BrowserDriver, FetchedResource},
    mirage_config::FetchMode,
    mirage_session::{Cookie, cookie_header},
    reqwest::header::{CONTENT_TYPE, COOKIE, REFERER},
    tracing::debug,
};

use crate::error::{Error, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of raw bytes for a reference.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<FetchedResource>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Http,
    Blob,
    Data,
    Other,
}

fn scheme_of(reference: &str) -> Scheme {
    let lower = reference
        .get(..reference.find(':').unwrap_or(0))
        .unwrap_or_default()
        .to_ascii_lowercase();
    match lower.as_str() {
        "http" | "https" => Scheme::Http,
        "blob" => Scheme::Blob,
        "data" => Scheme::Data,
        _ => Scheme::Other,
    }
}

/// Plain HTTP fetcher sending the session's cookies.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    cookies: Vec<Cookie>,
    referer: Option<String>,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, cookies: Vec<Cookie>) -> Self {
        Self {
            client,
            cookies,
            referer: None,
        }
    }

    /// Fetcher with a client using mirage's default timeout.
    pub fn with_cookies(cookies: Vec<Cookie>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::network("<client>", e.to_string()))?;
        Ok(Self::new(client, cookies))
    }

    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, reference: &str) -> Result<FetchedResource> {
        let url = url::Url::parse(reference)
            .map_err(|e| Error::unsupported(reference, e.to_string()))?;
        if scheme_of(reference) != Scheme::Http {
            return Err(Error::unsupported(reference, "HTTP fetcher needs an http(s) URL"));
        }

        let mut req = self.client.get(url.clone());
        if let Some(header) = url
            .host_str()
            .and_then(|host| cookie_header(&self.cookies, host))
        {
            req = req.header(COOKIE, header);
        }
        if let Some(ref referer) = self.referer {
            req = req.header(REFERER, referer);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::network(reference, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http {
                url: reference.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::network(reference, e.to_string()))?;

        debug!(url = %reference, bytes = bytes.len(), "fetched over HTTP");
        Ok(FetchedResource {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// Fetches through the live browser page.
#[derive(Clone, Copy)]
pub struct PageFetcher<'a> {
    driver: &'a dyn BrowserDriver,
}

impl<'a> PageFetcher<'a> {
    pub fn new(driver: &'a dyn BrowserDriver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl ResourceFetcher for PageFetcher<'_> {
    async fn fetch(&self, reference: &str) -> Result<FetchedResource> {
        let res = self.driver.fetch(reference).await?;
        debug!(url = %reference, bytes = res.bytes.len(), "fetched through page");
        Ok(res)
    }
}

/// Picks the HTTP client or the page per reference according to [`FetchMode`].
pub struct RoutedFetcher<'a> {
    mode: FetchMode,
    http: HttpFetcher,
    page: Option<PageFetcher<'a>>,
}

impl<'a> RoutedFetcher<'a> {
    pub fn new(mode: FetchMode, http: HttpFetcher, page: Option<PageFetcher<'a>>) -> Self {
        Self { mode, http, page }
    }

    fn page(&self, reference: &str) -> Result<&PageFetcher<'a>> {
        self.page
            .as_ref()
            .ok_or_else(|| Error::unsupported(reference, "no browser page to fetch through"))
    }
}

#[async_trait]
impl ResourceFetcher for RoutedFetcher<'_> {
    async fn fetch(&self, reference: &str) -> Result<FetchedResource> {
        match (scheme_of(reference), self.mode) {
            (Scheme::Data, _) => Ok(FetchedResource::from_data_url(reference)?),
            (Scheme::Blob, FetchMode::Http) => Err(Error::unsupported(
                reference,
                "blob URLs can only be fetched through the page",
            )),
            (Scheme::Blob, _) | (Scheme::Http, FetchMode::Page) => {
                self.page(reference)?.fetch(reference).await
            },
            (Scheme::Http, _) => self.http.fetch(reference).await,
            (Scheme::Other, _) => Err(Error::unsupported(reference, "unsupported URL scheme")),
        }
    }
}
