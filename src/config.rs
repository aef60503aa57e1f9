// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "gridstore";
const CONFIG_FILE_NAME: &str = "gridstore.toml";
const CONFIG_ENV_VAR: &str = "GRIDSTORE_CONFIG_PATH";
const DEFAULT_DATA_ROOT: &str = "/mnt/gridstore/data";
const DEFAULT_SERVER_PORT: u16 = 22;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const DEFAULT_PROFILE_BLOB_URL: &str = "https://besciences.blob.core.windows.net/profiles";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    data_root: Option<String>,
    local_root: Option<String>,
    server_address: Option<String>,
    server_port: Option<u16>,
    username: Option<String>,
    identity_path: Option<String>,
    known_hosts_path: Option<String>,
    trust_unknown_hosts: Option<bool>,
    retry_after_secs: Option<u64>,
    profile_blob_url: Option<String>,
    verbose: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute path of the store root, local volume or remote.
    pub data_root: String,
    /// Local workspace used as the source/destination for transfers.
    pub local_root: PathBuf,
    pub server_address: String,
    pub server_port: u16,
    pub username: String,
    pub identity_path: Option<String>,
    /// Known-hosts file for server key verification; the user default
    /// file when unset.
    pub known_hosts_path: Option<PathBuf>,
    /// Accept and learn server keys not present in known_hosts. Resolved
    /// here so no connection attempt ever needs interactive input.
    pub trust_unknown_hosts: bool,
    /// Cool-down between connection attempts after a failure.
    pub retry_after_secs: u64,
    pub profile_blob_url: String,
    pub verbose: bool,
    /// Path the settings were loaded from, when a file was used.
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub data_root: Option<String>,
    pub local_root: Option<PathBuf>,
    pub server_address: Option<String>,
    pub username: Option<String>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    let (config_path, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), true),
            None => (default_config_path().ok(), false),
        },
    };

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };

    let data_root = overrides
        .data_root
        .or(file_config.data_root)
        .unwrap_or_else(|| DEFAULT_DATA_ROOT.to_string());

    let local_root = match overrides.local_root {
        Some(path) => expand_path(path),
        None => match file_config.local_root {
            Some(raw) => expand_path(PathBuf::from(raw)),
            None => default_local_root()?,
        },
    };

    let server_address = overrides
        .server_address
        .or(file_config.server_address)
        .unwrap_or_default();

    let server_port = file_config.server_port.unwrap_or(DEFAULT_SERVER_PORT);
    if server_port == 0 {
        anyhow::bail!("server_port must be between 1 and 65535");
    }

    let username = match overrides.username.or(file_config.username) {
        Some(name) => name,
        None => std::env::var("USER").context(
            "no username in config and USER is unset; set username in the config file",
        )?,
    };

    let known_hosts_path = file_config
        .known_hosts_path
        .map(|raw| expand_path(PathBuf::from(raw)));

    let verbose = overrides.verbose.or(file_config.verbose).unwrap_or(false);

    Ok(Config {
        data_root,
        local_root,
        server_address,
        server_port,
        username,
        identity_path: file_config.identity_path.map(expand_str),
        known_hosts_path,
        trust_unknown_hosts: file_config.trust_unknown_hosts.unwrap_or(false),
        retry_after_secs: file_config
            .retry_after_secs
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        profile_blob_url: file_config
            .profile_blob_url
            .unwrap_or_else(|| DEFAULT_PROFILE_BLOB_URL.to_string()),
        verbose,
        config_path,
    })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn expand_str(raw: String) -> String {
    shellexpand::tilde(&raw).to_string()
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_local_root() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::{Config, Overrides, load};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("gridstore.toml");
        fs::write(&path, contents).unwrap();
        (tmp, path)
    }

    fn load_from(contents: &str, overrides: Overrides) -> Config {
        let (_tmp, path) = write_config(contents);
        load(Some(path), overrides).unwrap()
    }

    #[test]
    fn file_values_override_defaults() {
        let config = load_from(
            r#"
                data_root = "/srv/store"
                server_address = "store.example.org"
                username = "alice"
                retry_after_secs = 9
                trust_unknown_hosts = true
            "#,
            Overrides::default(),
        );
        assert_eq!(config.data_root, "/srv/store");
        assert_eq!(config.server_address, "store.example.org");
        assert_eq!(config.username, "alice");
        assert_eq!(config.server_port, 22);
        assert_eq!(config.retry_after_secs, 9);
        assert!(config.trust_unknown_hosts);
    }

    #[test]
    fn overrides_beat_file_values() {
        let config = load_from(
            r#"
                data_root = "/srv/store"
                username = "alice"
            "#,
            Overrides {
                data_root: Some("/srv/other".to_string()),
                ..Overrides::default()
            },
        );
        assert_eq!(config.data_root, "/srv/other");
    }

    #[test]
    fn missing_required_config_file_fails() {
        let err = load(Some(PathBuf::from("/no/such/gridstore.toml")), Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn zero_port_is_rejected() {
        let (_tmp, path) = write_config(
            r#"
                username = "alice"
                server_port = 0
            "#,
        );
        let err = load(Some(path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("server_port"));
    }

    #[test]
    fn tilde_paths_expand() {
        let config = load_from(
            r#"
                username = "alice"
                local_root = "~/staging"
            "#,
            Overrides::default(),
        );
        assert!(!config.local_root.to_string_lossy().starts_with('~'));
    }
}
