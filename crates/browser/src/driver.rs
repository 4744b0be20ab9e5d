//! The seam between generation control and a concrete browser.
//!
//! Everything above this trait works against [`BrowserDriver`] so it can be
//! exercised with a scripted in-memory driver.

use {async_trait::async_trait, mirage_session::{Cookie, Session}};

use crate::{
    error::BrowserError,
    types::{ElementHandle, FetchedResource, PageState, Selector},
};

/// One live browser page under automation.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `url` and wait for navigation to finish.
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Install the session's cookies into the browser.
    ///
    /// Domain-scoped cookies need the page to sit on a matching origin, so
    /// callers navigate to the surface first.
    async fn inject_session(&self, session: &Session) -> Result<(), BrowserError>;

    /// Current cookie set of the browser, for re-persisting a renewed session.
    async fn capture_session(&self) -> Result<Vec<Cookie>, BrowserError>;

    /// Every element matching `selector`, in document order. Empty when
    /// nothing matches; an error only for unusable selectors.
    async fn find_elements(&self, selector: &Selector) -> Result<Vec<ElementHandle>, BrowserError>;

    /// Replace the element's contents with `text`.
    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), BrowserError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError>;

    /// Sample the page, reporting the elements matched by each watched selector.
    async fn current_page_state(&self, watched: &[Selector]) -> Result<PageState, BrowserError>;

    /// Fetch a resource with the page's credentials.
    async fn fetch(&self, url: &str) -> Result<FetchedResource, BrowserError>;

    /// Release the browser. Safe to call more than once.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Starts browser drivers.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    type Driver: BrowserDriver;

    async fn launch(&self) -> Result<Self::Driver, BrowserError>;
}
