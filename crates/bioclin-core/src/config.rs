//! Application configuration management.
//!
//! Configuration comes from three layers, later ones winning:
//! built-in defaults, an optional `~/.config/bioclin-tools/config.json`,
//! and environment variables (`BIOCLIN_API_URL`, `BIOCLIN_SESSION_FILE`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Application name used for the config directory path
const APP_NAME: &str = "bioclin-tools";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session file name in the user's home directory
const SESSION_FILE: &str = ".bioclin_session.json";

/// Default API base URL. Every endpoint path is appended to this.
pub const DEFAULT_BASE_URL: &str = "https://bioclin.vindhyadatascience.com/api/v1";

pub const ENV_API_URL: &str = "BIOCLIN_API_URL";
pub const ENV_SESSION_FILE: &str = "BIOCLIN_SESSION_FILE";
pub const ENV_USERNAME: &str = "BIOCLIN_EMAIL";
pub const ENV_PASSWORD: &str = "BIOCLIN_PASSWORD";

/// HTTP request timeout in seconds, applied to connect and read.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How often the login browser is checked for a completed login.
pub const CAPTURE_POLL_INTERVAL_SECS: u64 = 2;

/// End-to-end deadline for the interactive browser login.
pub const CAPTURE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// API base URL, e.g. `https://host/api/v1`
    pub base_url: Option<String>,
    /// Where the session record lives
    pub session_file: Option<PathBuf>,
    /// Browser login page; derived from the base URL when unset
    pub login_url: Option<String>,
    /// URL fragment that marks a finished browser login
    pub login_success_fragment: Option<String>,
    /// Explicit Chrome/Chromium executable for browser login
    pub chrome_path: Option<PathBuf>,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.is_file() => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides from the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = Some(url);
        }
        if let Some(path) = lookup(ENV_SESSION_FILE).filter(|v| !v.trim().is_empty()) {
            self.session_file = Some(PathBuf::from(path));
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Validated base URL without a trailing slash.
    pub fn base_url(&self) -> Result<String> {
        let raw = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let parsed = Url::parse(raw).with_context(|| format!("Invalid API base URL: {raw}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("API base URL must be http or https: {raw}");
        }
        Ok(raw.trim_end_matches('/').to_string())
    }

    /// Browser login page. Defaults to `/login` on the API host.
    pub fn login_url(&self) -> Result<String> {
        if let Some(ref url) = self.login_url {
            return Ok(url.clone());
        }
        let base = Url::parse(&self.base_url()?)?;
        Ok(base.join("/login")?.to_string())
    }

    pub fn session_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.session_file {
            return Ok(path.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(SESSION_FILE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}
