use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const APP_NAME: &str = "dvrmanager";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub settings_path: PathBuf,
    pub logs_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub rpc_bind: SocketAddr,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub verify_before_delete: bool,
    pub sync_files: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = app_data_dir();
        Self {
            settings_path: data_dir.join("Settings").join("settings.json"),
            logs_dir: data_dir.join("Logs"),
            poll_interval_ms: 2000,
            rpc_bind: SocketAddr::from(([127, 0, 0, 1], 7353)),
            simulation: false,
            verbose: false,
            json_logs: false,
            verify_before_delete: true,
            sync_files: true,
        }
    }
}

impl AppConfig {
    /// Build the runtime configuration.
    ///
    /// Later sources win: built-in defaults, `config.toml` in the app data
    /// directory, `DVRMANAGER_*` environment variables, then whatever the
    /// command line set.
    pub fn new<T: Serialize>(cli_overrides: Option<&T>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_file_path()))
            .merge(Env::prefixed("DVRMANAGER_"));

        if let Some(overrides) = cli_overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .context("Failed to load configuration")?;

        if config.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

/// Per-user data directory for settings and logs.
///
/// `%LOCALAPPDATA%` on Windows, `$XDG_DATA_HOME` or `~/.local/share` elsewhere.
pub fn app_data_dir() -> PathBuf {
    let base = std::env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("XDG_DATA_HOME").map(PathBuf::from))
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
        })
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join("config.toml")
}
