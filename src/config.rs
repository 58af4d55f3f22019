//! Runtime configuration loading and persistence.
//!
//! Handles reading and writing the pushsync configuration file: the
//! registration service URL, the application credentials used for HTTP
//! basic auth, and retry tuning. Environment variables override file
//! values, which keeps CI and test setups file-free.

use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf, time::Duration};

use crate::constants;
use crate::error::Result;

/// Retry tuning for the registration client.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Base backoff delay in milliseconds; doubled per attempt.
    pub base_delay_ms: u64,
    /// Cap on the backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum attempts, the initial try included.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: constants::RETRY_BASE_DELAY.as_millis() as u64,
            max_delay_ms: constants::RETRY_MAX_DELAY.as_millis() as u64,
            max_attempts: constants::RETRY_MAX_ATTEMPTS,
        }
    }
}

impl RetryConfig {
    /// Base backoff delay as a [`Duration`].
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff cap as a [`Duration`].
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Configuration for the pushsync client.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RuntimeConfig {
    /// Base URL of the registration service.
    pub server_url: String,
    /// Application key for HTTP basic auth.
    pub app_key: String,
    /// Application secret for HTTP basic auth.
    pub app_secret: String,
    /// Retry tuning for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_url: "https://api.pushsync.dev".to_string(),
            app_key: String::new(),
            app_secret: String::new(),
            retry: RetryConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `PUSHSYNC_CONFIG_DIR` env var: explicit override (tests, CI)
    /// 2. Default: platform config dir (macOS: ~/Library/Application Support/pushsync)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(custom_dir) = std::env::var("PUSHSYNC_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "could not determine config directory",
                    )
                })?
                .join("pushsync")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    /// A missing file yields defaults, so first runs work without setup.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Option<Self> {
        let config_path = Self::config_dir().ok()?.join("config.json");
        let content = fs::read_to_string(&config_path).ok()?;
        match serde_json::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("ignoring malformed config file: {e}");
                None
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("PUSHSYNC_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(app_key) = std::env::var("PUSHSYNC_APP_KEY") {
            self.app_key = app_key;
        }

        if let Ok(app_secret) = std::env::var("PUSHSYNC_APP_SECRET") {
            self.app_secret = app_secret;
        }

        if let Ok(max_attempts) = std::env::var("PUSHSYNC_RETRY_MAX_ATTEMPTS") {
            if let Ok(max) = max_attempts.parse::<u32>() {
                self.retry.max_attempts = max;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Restrictive permissions: the file carries the app secret
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Whether credentials are present, either from file or environment.
    pub fn has_credentials(&self) -> bool {
        !self.app_key.is_empty() && !self.app_secret.is_empty()
    }
}
