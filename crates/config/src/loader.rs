use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::MirageConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["mirage.toml", "mirage.yaml", "mirage.yml", "mirage.json"];

static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Override the user-global config directory (CLI `--config-dir`).
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.write() {
        *guard = Some(path);
    }
}

/// Returns the config directory.
///
/// Resolution order:
/// 1. programmatic override (`set_config_dir`)
/// 2. `MIRAGE_CONFIG_DIR`
/// 3. `~/.config/mirage`
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE.read().ok().and_then(|g| g.clone()) {
        return Some(dir);
    }
    if let Ok(dir) = std::env::var("MIRAGE_CONFIG_DIR")
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "mirage").map(|d| d.config_dir().to_path_buf())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<MirageConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./mirage.{toml,yaml,yml,json}` (project-local)
/// 2. `<config dir>/mirage.{toml,yaml,yml,json}` (user-global)
///
/// Returns `MirageConfig::default()` if no config file is found or it fails to parse.
pub fn discover_and_load() -> MirageConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    MirageConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));

    local.chain(global).find(|p| p.exists())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mirage.toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MirageConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
