//! Persisted authenticated browser session: cookie set plus capture time.
//!
//! The record is produced by an external login flow and only read, checked
//! for freshness, and replaced wholesale here.

pub mod cookie;
pub mod error;
pub mod store;

pub use {
    cookie::{Cookie, cookie_header},
    error::{Error, Result},
    store::{Session, SessionStore, is_fresh, is_fresh_at},
};
