//! Configuration loading and root folder resolution
//!
//! Bootstrap settings come from a TOML file. A missing file is not fatal:
//! the loader warns and falls back to built-in defaults.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`GLEAN_ROOT_FOLDER`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted for the root folder
pub const ROOT_FOLDER_ENV: &str = "GLEAN_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "glean.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path; defaults to `<root_folder>/glean.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP command surface port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default scan parameters for sessions started without overrides
    #[serde(default)]
    pub scan: ScanConfig,

    /// Reference canonicalization rules
    #[serde(default)]
    pub canonical: CanonicalSettings,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            scan: ScanConfig::default(),
            canonical: CanonicalSettings::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parameters for one scan session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Pause after each advance so lazily loaded content can render
    pub settle_delay_ms: u64,
    /// Pixels to advance the viewport per iteration
    pub advance_amount: u32,
    /// Consecutive unchanged-extent readings required to declare exhaustion
    pub stability_threshold: u32,
    /// Hard upper bound on iterations
    pub iteration_cap: u32,
    /// Collection name override; skips identity extraction when set
    pub collection_name: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 800,
            advance_amount: 800,
            stability_threshold: 3,
            iteration_cap: 1000,
            collection_name: None,
        }
    }
}

impl ScanConfig {
    /// Reject parameter combinations that could never terminate sensibly
    pub fn validate(&self) -> Result<()> {
        if self.advance_amount == 0 {
            return Err(Error::InvalidInput(
                "advance_amount must be greater than zero".to_string(),
            ));
        }
        if self.stability_threshold == 0 {
            return Err(Error::InvalidInput(
                "stability_threshold must be at least 1".to_string(),
            ));
        }
        if self.iteration_cap == 0 {
            return Err(Error::InvalidInput(
                "iteration_cap must be at least 1".to_string(),
            ));
        }
        if let Some(name) = &self.collection_name {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "collection_name must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Rules deciding which locators are content resources and how they collapse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalSettings {
    /// Accepted hosts; empty accepts any host
    pub hosts: Vec<String>,
    /// Path segments marking the resource category of interest
    pub categories: Vec<String>,
    /// Path segments that disqualify a locator (logos, avatars)
    pub excluded_categories: Vec<String>,
    /// Accepted file extensions, compared case-insensitively
    pub extensions: Vec<String>,
    /// Declared dimensions below this are treated as decorative
    pub min_dimension_px: u32,
    /// Substring a locator must contain for the DOM and network strategies to look at it
    pub locator_marker: String,
}

impl Default for CanonicalSettings {
    fn default() -> Self {
        Self {
            hosts: vec!["bytescale.mobbin.com".to_string()],
            categories: vec!["app_screens".to_string()],
            excluded_categories: vec!["app_logos".to_string()],
            extensions: ["png", "jpg", "jpeg", "webp", "gif", "avif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_dimension_px: 48,
            locator_marker: "bytescale.mobbin.com".to_string(),
        }
    }
}

fn default_port() -> u16 {
    5730
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load a TOML config file, falling back to defaults when it is absent
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.scan.validate()?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Default config file location (`<config_dir>/glean/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("glean").join("config.toml"))
}

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Database path: explicit TOML setting, else `<root_folder>/glean.db`
pub fn resolve_database_path(root_folder: &Path, toml: &TomlConfig) -> PathBuf {
    toml.database_path
        .clone()
        .unwrap_or_else(|| root_folder.join(DATABASE_FILE))
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("glean"))
        .unwrap_or_else(|| PathBuf::from("./glean_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.settle_delay_ms, 800);
        assert_eq!(config.advance_amount, 800);
        assert_eq!(config.iteration_cap, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = ScanConfig {
            stability_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_blank_collection_name() {
        let config = ScanConfig {
            collection_name: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000

            [scan]
            settle_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.scan.settle_delay_ms, 250);
        assert_eq!(config.scan.stability_threshold, 3);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.canonical.categories, vec!["app_screens".to_string()]);
    }
}
