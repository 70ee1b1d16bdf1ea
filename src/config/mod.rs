//! TOML configuration with environment overrides.
//!
//! Lookup order: `--config` → `$CONNECTIONDB_CONFIG` → `./connectiondb.toml`
//! → `<platform config dir>/connectiondb/config.toml` → built-in defaults.

pub mod schema;

pub use schema::{AuthConfig, Config, GatewayConfig, RecordsConfig};

use crate::auth::BootstrapAccount;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "CONNECTIONDB_CONFIG";
pub const SESSION_SECRET_ENV: &str = "SESSION_SECRET";
pub const DEFAULT_PASSWORD_ENV: &str = "CONNECTIONDB_DEFAULT_PASSWORD";
const LOCAL_CONFIG_FILE: &str = "connectiondb.toml";

impl Config {
    /// Load configuration from the first file found, then apply environment
    /// overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                let config = Self::from_toml_str(&contents)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?;
                tracing::info!(path = %path.display(), "Loaded configuration");
                config
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        directories::ProjectDirs::from("", "", "connectiondb")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .filter(|path| path.is_file())
    }

    /// Apply `SESSION_SECRET` and `CONNECTIONDB_DEFAULT_PASSWORD`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = non_empty(SESSION_SECRET_ENV) {
            self.gateway.session_secret = Some(secret);
        }
        if let Some(password) = non_empty(DEFAULT_PASSWORD_ENV) {
            self.auth.default_password = password;
        }
    }

    /// The account seeded into an empty credential store.
    pub fn bootstrap_account(&self) -> BootstrapAccount {
        BootstrapAccount {
            username: self.auth.default_username.clone(),
            password: self.auth.default_password.clone(),
        }
    }
}
