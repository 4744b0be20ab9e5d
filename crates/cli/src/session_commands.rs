//! CLI subcommands for the stored login session.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    chrono::Utc,
    clap::Subcommand,
    mirage_config::MirageConfig,
    mirage_session::{Error as SessionError, Session, SessionStore, is_fresh_at},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Show where the session lives and whether it is still fresh.
    Status,
    /// Replace the stored session with cookies exported from a logged-in browser.
    Import {
        /// JSON file: a cookie array, or a saved session record.
        file: PathBuf,
    },
}

pub fn handle_session(action: SessionAction) -> Result<ExitCode> {
    let config = mirage_config::discover_and_load();
    let store = session_store(&config);
    match action {
        SessionAction::Status => status(&store, &config),
        SessionAction::Import { file } => import(&store, &file),
    }
}

/// `session.path`, or `session.json` in the config directory.
pub fn session_store(config: &MirageConfig) -> SessionStore {
    let path = config.session.path.clone().unwrap_or_else(|| {
        mirage_config::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("session.json")
    });
    SessionStore::new(path)
}

fn status(store: &SessionStore, config: &MirageConfig) -> Result<ExitCode> {
    println!("Session: {}", store.path().display());

    let session = match store.load() {
        Ok(s) => s,
        Err(e @ (SessionError::NoSessionFound { .. } | SessionError::SessionCorrupt { .. })) => {
            println!("  state:       missing ({e})");
            return Ok(ExitCode::from(3));
        },
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    let max_age = Duration::from_secs(config.session.max_age_hours.saturating_mul(3600));
    let age = session.age_at(now);
    let fresh = is_fresh_at(&session, max_age, now);

    println!("  captured at: {}", session.captured_at().to_rfc3339());
    println!("  age:         {}", format_age(age));
    println!("  cookies:     {}", session.cookies().len());
    println!(
        "  state:       {}",
        if fresh {
            "fresh"
        } else {
            "stale"
        }
    );
    Ok(if fresh {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(3)
    })
}

fn import(store: &SessionStore, file: &Path) -> Result<ExitCode> {
    let exported = SessionStore::new(file.to_path_buf())
        .load()
        .with_context(|| format!("failed to read cookies from {}", file.display()))?;
    if !exported.is_valid() {
        bail!("{} contains no cookies", file.display());
    }

    let session = Session::captured(exported.cookies().to_vec());
    store.save(&session)?;
    println!(
        "Imported {} cookies into {}",
        session.cookies().len(),
        store.path().display()
    );
    Ok(ExitCode::SUCCESS)
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    let (days, hours, mins) = (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    const EXPORTED: &str = r#"[
        {"name": "_U", "value": "token", "domain": ".bing.com", "path": "/",
         "secure": true, "httpOnly": true, "expirationDate": 1893456000.5,
         "hostOnly": false, "storeId": "0"},
        {"name": "SRCHHPGUSR", "value": "x", "domain": "www.bing.com"}
    ]"#;

    #[test]
    fn import_restamps_an_exported_cookie_array() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cookies.json");
        std::fs::write(&file, EXPORTED).unwrap();
        let store = SessionStore::new(dir.path().join("state/session.json"));

        let before = Utc::now();
        import(&store, &file).unwrap();

        let session = store.load().unwrap();
        assert_eq!(session.cookies().len(), 2);
        assert_eq!(session.cookies()[0].name, "_U");
        assert!(session.captured_at() >= before);
    }

    #[test]
    fn import_rejects_an_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cookies.json");
        std::fs::write(&file, "[]").unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));

        assert!(import(&store, &file).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn configured_session_path_wins() {
        let mut config = MirageConfig::default();
        config.session.path = Some(PathBuf::from("/tmp/mirage/s.json"));
        assert_eq!(session_store(&config).path(), Path::new("/tmp/mirage/s.json"));
    }

    #[rstest]
    #[case(90, "1m")]
    #[case(3 * 3600 + 120, "3h 2m")]
    #[case(2 * 86_400 + 5 * 3600, "2d 5h")]
    fn ages_are_compact(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(format_age(Duration::from_secs(secs)), expected);
    }
}
