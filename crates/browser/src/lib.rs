//! Browser automation for mirage.
//!
//! [`BrowserDriver`] is the narrow surface generation control needs: navigate,
//! install cookies, find and interact with elements, sample page state and
//! fetch resources with the page's credentials. [`CdpLauncher`] provides the
//! real implementation on top of a local Chromium-family browser.

pub mod cdp;
pub mod detect;
pub mod dom;
pub mod driver;
pub mod error;
pub mod types;

pub use {
    cdp::{CdpDriver, CdpLauncher},
    detect::{Detection, DetectionSource, detect_browser, install_hint},
    driver::{BrowserDriver, DriverLauncher},
    error::BrowserError,
    types::{
        BrowserConfig, ElementHandle, ElementInfo, FetchedResource, PageState, Selector,
        SelectorMatch,
    },
};
