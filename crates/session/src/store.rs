use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    cookie::{Cookie, cookie_header},
    error::{Error, Result},
};

/// An authenticated browser credential.
///
/// Never edited after construction: renewal builds a new `Session` and saves
/// it over the old one.
#[derive(Debug, Clone)]
pub struct Session {
    cookies: Vec<Cookie>,
    captured_at: DateTime<Utc>,
    valid: bool,
}

impl Session {
    /// A session captured at `captured_at`.
    ///
    /// It is valid when it holds at least one named cookie.
    pub fn new(cookies: Vec<Cookie>, captured_at: DateTime<Utc>) -> Self {
        let valid = !cookies.is_empty() && cookies.iter().all(|c| !c.name.is_empty());
        Self {
            cookies,
            captured_at,
            valid,
        }
    }

    /// A session captured now.
    pub fn captured(cookies: Vec<Cookie>) -> Self {
        Self::new(cookies, Utc::now())
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Time since capture, clamped at zero for clocks that moved backwards.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// `Cookie` header for requests to `host`.
    pub fn cookie_header(&self, host: &str) -> Option<String> {
        cookie_header(&self.cookies, host)
    }
}

/// Whether `session` is valid and younger than `max_age`.
///
/// The upstream service can revoke sessions without notice, so an old
/// session counts as stale even if its cookies have not expired.
pub fn is_fresh(session: &Session, max_age: Duration) -> bool {
    is_fresh_at(session, max_age, Utc::now())
}

pub fn is_fresh_at(session: &Session, max_age: Duration, now: DateTime<Utc>) -> bool {
    session.is_valid() && session.age_at(now) <= max_age
}

#[derive(Serialize)]
struct StoredSessionRef<'a> {
    captured_at: DateTime<Utc>,
    cookies: &'a [Cookie],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSession {
    Stamped {
        captured_at: DateTime<Utc>,
        cookies: Vec<Cookie>,
    },
    /// Bare cookie array as written by browser cookie exporters.
    Bare(Vec<Cookie>),
}

/// File-backed store holding the single current session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the most recently saved session.
    pub fn load(&self) -> Result<Session> {
        let path = self.path.display().to_string();
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path, "session file not found");
                return Err(Error::NoSessionFound {
                    path: self.path.clone(),
                });
            },
            Err(e) => return Err(e.into()),
        };

        let stored: StoredSession = serde_json::from_slice(&data).map_err(|e| {
            warn!(path = %path, error = %e, "session file parse failed");
            Error::corrupt(&self.path, e.to_string())
        })?;

        let session = match stored {
            StoredSession::Stamped {
                captured_at,
                cookies,
            } => Session::new(cookies, captured_at),
            StoredSession::Bare(cookies) => {
                let captured_at = std::fs::metadata(&self.path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)?;
                Session::new(cookies, captured_at)
            },
        };

        debug!(
            path = %path,
            cookies = session.cookies().len(),
            captured_at = %session.captured_at(),
            "session loaded"
        );
        Ok(session)
    }

    /// Persist `session`, replacing any previous record.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_vec_pretty(&StoredSessionRef {
            captured_at: session.captured_at(),
            cookies: session.cookies(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        info!(
            path = %self.path.display(),
            cookies = session.cookies().len(),
            "session saved"
        );
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeDelta};

    fn temp_store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        (dir, store)
    }

    #[test]
    fn missing_file_is_no_session_found() {
        let (_dir, store) = temp_store();
        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::NoSessionFound { .. }));
        assert!(err.requires_login());
    }

    #[test]
    fn garbage_is_corrupt() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "{not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::SessionCorrupt { .. }));
        assert!(err.requires_login());
    }

    #[test]
    fn save_then_load_keeps_timestamp_and_cookies() {
        let (_dir, store) = temp_store();
        let at = Utc::now() - TimeDelta::hours(3);
        let session = Session::new(vec![Cookie::new("_U", "abc").with_domain(".bing.com")], at);
        store.save(&session).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.captured_at().timestamp(), at.timestamp());
        assert_eq!(loaded.cookies().len(), 1);
        assert_eq!(loaded.cookies()[0].name, "_U");
        assert!(loaded.is_valid());
    }

    #[test]
    fn save_replaces_previous_record() {
        let (_dir, store) = temp_store();
        store
            .save(&Session::captured(vec![Cookie::new("old", "1")]))
            .unwrap();
        store
            .save(&Session::captured(vec![
                Cookie::new("new", "2"),
                Cookie::new("other", "3"),
            ]))
            .unwrap();
        let loaded = store.load().unwrap();
        let names: Vec<_> = loaded.cookies().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["new", "other"]);
    }

    #[test]
    fn bare_cookie_array_uses_file_mtime() {
        let (_dir, store) = temp_store();
        std::fs::write(
            store.path(),
            r#"[{"name": "_U", "value": "abc", "domain": ".bing.com"}]"#,
        )
        .unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.is_valid());
        assert!(loaded.age_at(Utc::now()) < Duration::from_secs(60));
    }

    #[test]
    fn empty_cookie_set_is_invalid_and_never_fresh() {
        let session = Session::captured(Vec::new());
        assert!(!session.is_valid());
        assert!(!is_fresh(&session, Duration::from_secs(3600)));
    }

    #[test]
    fn freshness_depends_on_age() {
        let now = Utc::now();
        let session = Session::new(vec![Cookie::new("a", "1")], now - TimeDelta::hours(10));
        assert!(is_fresh_at(&session, Duration::from_secs(11 * 3600), now));
        assert!(!is_fresh_at(&session, Duration::from_secs(9 * 3600), now));
    }

    #[test]
    fn future_capture_time_counts_as_fresh() {
        let now = Utc::now();
        let session = Session::new(vec![Cookie::new("a", "1")], now + TimeDelta::minutes(5));
        assert_eq!(session.age_at(now), Duration::ZERO);
        assert!(is_fresh_at(&session, Duration::from_secs(1), now));
    }
}
