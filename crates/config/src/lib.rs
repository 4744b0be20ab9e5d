//! Configuration loading, env substitution, and validation.
//!
//! Config files: `mirage.toml`, `mirage.yaml`, or `mirage.json`
//! Searched in `./` then `~/.config/mirage/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw file.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        config_dir, discover_and_load, find_config_file, find_or_default_config_path,
        load_config, set_config_dir,
    },
    schema::{
        BrowserConfig, DownloadConfig, FetchMode, GenerationConfig, MirageConfig, SessionConfig,
        SurfaceConfig,
    },
    validate::{Diagnostic, Severity},
};
