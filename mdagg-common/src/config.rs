//! Configuration file resolution and loading
//!
//! The configuration file is found using this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user then system-wide config file
//! 4. None: callers fall back to compiled defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Resolve the configuration file path for `app_name`
///
/// Returns `None` when no source names a file and no default location exists.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    app_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Some(path) = env_override(env_var_name) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Default locations
    default_config_locations(app_name)
        .into_iter()
        .find(|path| path.exists())
}

/// Candidate config file locations for the platform, most specific first
fn default_config_locations(app_name: &str) -> Vec<PathBuf> {
    let mut locations = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join(app_name).join("config.toml"));
    }

    if cfg!(unix) {
        locations.push(PathBuf::from("/etc").join(app_name).join("config.toml"));
    }

    locations
}

/// Load a TOML configuration, falling back to defaults when no file is given
///
/// A missing file is not fatal: it is logged and defaults are used. A file that
/// exists but cannot be parsed is a configuration error.
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No configuration file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Configuration file {} does not exist, using compiled defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Read an environment variable, ignoring unset and blank values
pub fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Replace `target` with the environment value of `name` when it is set
pub fn apply_env_override(target: &mut String, name: &str) {
    if let Some(value) = env_override(name) {
        info!("{} overridden from environment", name);
        *target = value;
    }
}
