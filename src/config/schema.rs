use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration (`connectiondb.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub records: RecordsConfig,
}

/// `[gateway]`: HTTP listener and session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// HMAC key for session cookies. Generated per process when unset.
    pub session_secret: Option<String>,
    /// Session lifetime in seconds.
    pub session_ttl_secs: u64,
    /// Mark the session cookie `Secure` (serve behind HTTPS).
    pub secure_cookies: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            session_secret: None,
            session_ttl_secs: 14 * 24 * 3600,
            secure_cookies: false,
        }
    }
}

/// `[auth]`: credential file and first-run account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users_file: PathBuf,
    pub default_username: String,
    pub default_password: String,
    /// Send users who log in with the default password straight to
    /// `/change-password`.
    pub force_password_change: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users_file: PathBuf::from("users.json"),
            default_username: "admin".into(),
            default_password: "secret123".into(),
            force_password_change: false,
        }
    }
}

/// `[records]`: spreadsheet data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    pub data_file: PathBuf,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("connections.xlsx"),
        }
    }
}
