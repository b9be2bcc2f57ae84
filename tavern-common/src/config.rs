//! Configuration loading
//!
//! Each binary resolves its settings in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Steps 1 and 2 are handled by clap in each binary; this module finds and
//! parses the TOML file. A missing file is not an error: the binary logs a
//! warning and continues on defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable that points at an explicit config file
pub const CONFIG_PATH_ENV: &str = "TAVERN_CONFIG";

/// Deployment environment; selects endpoints and keys cached per environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Environment {
    #[default]
    Dev,
    DevSort,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::DevSort => "DEVSORT",
            Environment::Prod => "PROD",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEV" => Ok(Environment::Dev),
            "DEVSORT" => Ok(Environment::DevSort),
            "PROD" | "PRODUCTION" => Ok(Environment::Prod),
            other => Err(Error::Config(format!("Unknown environment: {}", other))),
        }
    }
}

/// Locate the TOML config file for `module`.
///
/// Order: explicit path, `TAVERN_CONFIG`, `<config_dir>/tavern/<module>.toml`,
/// `/etc/tavern/<module>.toml` (Linux only). Returns `None` when nothing exists.
pub fn find_config_file(module: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let file_name = format!("{}.toml", module);
    let user_config = dirs::config_dir().map(|d| d.join("tavern").join(&file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/tavern").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file, falling back to `T::default()` when absent.
///
/// A file that exists but cannot be parsed is an error: silently ignoring a
/// typo in a config file hides misconfiguration.
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config file found, using defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file not found: {} (using defaults)", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Parse a boolean feature flag value ("true"/"1"/"yes"/"on", case-insensitive)
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Per-user cache directory for client-side state
pub fn cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|d| d.join("tavern"))
        .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        limit: u32,
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("DEVSORT".parse::<Environment>().unwrap(), Environment::DevSort);
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config: Sample = load_toml_config(Some(Path::new("/nonexistent/tavern.toml"))).unwrap();
        assert_eq!(config, Sample::default());

        let config: Sample = load_toml_config(None).unwrap();
        assert_eq!(config, Sample::default());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" ON "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
