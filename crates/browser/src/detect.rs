//! Locate a Chromium-family executable for the CDP driver.

use std::path::{Path, PathBuf};

/// Executable names searched on `PATH`, most common first.
const EXECUTABLE_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "chromium",
    "chromium-browser",
    "msedge",
    "microsoft-edge",
    "microsoft-edge-stable",
    "brave-browser",
    "brave",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
];

#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &[];

/// Where a browser executable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    Config,
    EnvVar,
    InstallPath,
    SearchPath,
}

impl std::fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "browser.chrome_path",
            Self::EnvVar => "CHROME",
            Self::InstallPath => "install location",
            Self::SearchPath => "PATH",
        };
        f.write_str(s)
    }
}

/// Outcome of browser detection.
#[derive(Debug, Clone)]
pub enum Detection {
    Found { path: PathBuf, source: DetectionSource },
    Missing { hint: String },
}

impl Detection {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Found { path, .. } => Some(path),
            Self::Missing { .. } => None,
        }
    }
}

/// Find a browser: configured path, `CHROME`, platform install paths, then `PATH`.
///
/// Install paths come before `PATH` because package-manager shims on `PATH`
/// are sometimes broken wrappers.
pub fn detect_browser(configured: Option<&str>) -> Detection {
    let env = std::env::var("CHROME").ok();
    detect_with(configured, env.as_deref(), |name| which::which(name).ok())
}

fn detect_with(
    configured: Option<&str>,
    env: Option<&str>,
    search: impl Fn(&str) -> Option<PathBuf>,
) -> Detection {
    let explicit = [
        (configured, DetectionSource::Config),
        (env, DetectionSource::EnvVar),
    ];
    for (candidate, source) in explicit {
        if let Some(path) = candidate.map(PathBuf::from).filter(|p| p.exists()) {
            return Detection::Found { path, source };
        }
    }

    if let Some(path) = INSTALL_PATHS.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Detection::Found {
            path,
            source: DetectionSource::InstallPath,
        };
    }

    if let Some(path) = EXECUTABLE_NAMES.iter().find_map(|name| search(name)) {
        return Detection::Found {
            path,
            source: DetectionSource::SearchPath,
        };
    }

    Detection::Missing {
        hint: install_hint(),
    }
}

/// Platform-specific install guidance.
pub fn install_hint() -> String {
    let install = if cfg!(target_os = "macos") {
        "  brew install --cask google-chrome"
    } else if cfg!(target_os = "windows") {
        "  winget install Google.Chrome"
    } else {
        "  Debian/Ubuntu: sudo apt install chromium\n  \
         Fedora:        sudo dnf install chromium\n  \
         Arch:          sudo pacman -S chromium"
    };

    format!(
        "No Chromium-based browser found (Chrome, Chromium, Edge and Brave all work).\n\n\
         {install}\n\n\
         Or point mirage at one:\n  \
         [browser]\n  \
         chrome_path = \"/path/to/browser\"\n\
         or set the CHROME environment variable."
    )
}
