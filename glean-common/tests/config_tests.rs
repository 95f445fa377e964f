//! Configuration loading and root folder resolution tests
//!
//! Uses serial_test to prevent races on the GLEAN_ROOT_FOLDER variable.

use glean_common::config::{
    load_toml_config, resolve_database_path, resolve_root_folder, TomlConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.port, 5730);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.scan.stability_threshold, 3);
}

#[test]
fn test_invalid_scan_section_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[scan]\niteration_cap = 0\n").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn test_full_config_round_trips_through_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
root_folder = "/srv/glean"

[logging]
level = "debug"

[canonical]
hosts = []
categories = ["screens"]
min_dimension_px = 10
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/glean")));
    assert_eq!(config.logging.level, "debug");
    assert!(config.canonical.hosts.is_empty());
    assert_eq!(config.canonical.categories, vec!["screens".to_string()]);
    assert_eq!(config.canonical.min_dimension_px, 10);
    // Unspecified canonical fields keep their defaults
    assert!(config.canonical.extensions.contains(&"png".to_string()));
}

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/glean-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/glean-toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(Some(Path::new("/tmp/glean-cli")), &toml);
    assert_eq!(resolved, PathBuf::from("/tmp/glean-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/glean-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/glean-toml")),
        ..Default::default()
    };

    assert_eq!(
        resolve_root_folder(None, &toml),
        PathBuf::from("/tmp/glean-env")
    );

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_then_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/glean-toml")),
        ..Default::default()
    };
    assert_eq!(
        resolve_root_folder(None, &toml),
        PathBuf::from("/tmp/glean-toml")
    );

    let fallback = resolve_root_folder(None, &TomlConfig::default());
    assert!(!fallback.as_os_str().is_empty());
}

#[test]
fn test_database_path_defaults_inside_root_folder() {
    let toml = TomlConfig::default();
    assert_eq!(
        resolve_database_path(Path::new("/data/glean"), &toml),
        PathBuf::from("/data/glean/glean.db")
    );

    let explicit = TomlConfig {
        database_path: Some(PathBuf::from("/elsewhere/custom.db")),
        ..Default::default()
    };
    assert_eq!(
        resolve_database_path(Path::new("/data/glean"), &explicit),
        PathBuf::from("/elsewhere/custom.db")
    );
}
