//! Durable storage for push settings.
//!
//! Settings are loaded once at manager construction and written back after
//! every effective mutation and every successful sync, so a restart picks
//! up where the process left off — including a still-dirty state that a
//! later sync will reconcile.
//!
//! The store is a trait so the reconciliation engine can be tested against
//! an in-memory implementation; production uses [`FileStore`], a JSON file
//! in the platform config directory.

use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveTime;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::settings::{self, NotificationTypes, PushSettings};

/// On-disk representation of [`PushSettings`].
///
/// Tokens are stored hex-encoded to keep the file human-readable. The dirty
/// flag persists so an unsynced change survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Whether push is enabled.
    pub push_enabled: bool,
    /// Hex-encoded device token, if one was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    /// Hex-encoded token last accepted by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_registered_token: Option<String>,
    /// Device tags, sorted.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether tag fields go into the payload.
    pub can_edit_tags_from_device: bool,
    /// Device alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Quiet-time window start ("HH:MM" via chrono serde).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_time_from: Option<NaiveTime>,
    /// Quiet-time window end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_time_to: Option<NaiveTime>,
    /// Whether the quiet-time window is active.
    pub quiet_time_enabled: bool,
    /// Time zone identifier for the quiet-time window.
    pub time_zone: String,
    /// Whether autobadge is on.
    pub autobadge_enabled: bool,
    /// Badge number.
    pub badge_number: i32,
    /// Whether transient failures are retried.
    pub retry_on_connection_error: bool,
    /// Notification-types bitmask last requested from the OS.
    #[serde(default)]
    pub notification_types: NotificationTypes,
    /// Whether local state has mutations not yet synced.
    pub dirty: bool,
}

impl PersistedSettings {
    /// Capture the current settings for storage.
    pub fn from_settings(settings: &PushSettings) -> Self {
        Self {
            push_enabled: settings.push_enabled(),
            device_token: settings.device_token().map(settings::token_hex),
            last_registered_token: settings.last_registered_token().map(settings::token_hex),
            tags: settings.tags().iter().cloned().collect(),
            can_edit_tags_from_device: settings.can_edit_tags_from_device(),
            alias: settings.alias().map(str::to_string),
            quiet_time_from: settings.quiet_time().map(|w| w.from),
            quiet_time_to: settings.quiet_time().map(|w| w.to),
            quiet_time_enabled: settings.quiet_time_enabled(),
            time_zone: settings.time_zone().to_string(),
            autobadge_enabled: settings.autobadge_enabled(),
            badge_number: settings.badge_number(),
            retry_on_connection_error: settings.retry_on_connection_error(),
            notification_types: settings.notification_types(),
            dirty: settings.dirty(),
        }
    }

    /// Rebuild in-memory settings from a stored record.
    ///
    /// Unparseable token fields are dropped with a warning rather than
    /// failing the whole load; the OS will deliver a fresh token anyway.
    pub fn into_settings(self) -> PushSettings {
        let mut settings = PushSettings::default();
        settings.set_push_enabled(self.push_enabled);
        if let Some(hex) = self.device_token {
            match settings::token_from_hex(&hex) {
                Some(token) => {
                    settings.set_device_token(token);
                }
                None => log::warn!("dropping unparseable stored device token"),
            }
        }
        if !self.tags.is_empty() {
            settings.set_tags(self.tags);
        }
        settings.set_can_edit_tags_from_device(self.can_edit_tags_from_device);
        settings.set_alias(self.alias);
        if let (Some(from), Some(to)) = (self.quiet_time_from, self.quiet_time_to) {
            settings.set_quiet_time(from, to, &self.time_zone);
        } else {
            settings.set_time_zone(&self.time_zone);
        }
        settings.set_quiet_time_enabled(self.quiet_time_enabled);
        settings.set_autobadge_enabled(self.autobadge_enabled);
        settings.set_badge_number(self.badge_number);
        settings.set_retry_on_connection_error(self.retry_on_connection_error);
        settings.set_notification_types(self.notification_types);

        // Rebuilding through setters left the model dirty; reconcile with
        // the stored flags now that all fields are in place.
        let last_registered = self
            .last_registered_token
            .as_deref()
            .and_then(settings::token_from_hex);
        settings.restore_last_registered_token(last_registered.clone());
        if !self.dirty {
            let revision = settings.revision();
            settings.mark_synced(revision, last_registered);
        } else if !settings.dirty() {
            settings.mark_dirty();
        }
        settings
    }
}

/// Durable store for push settings.
pub trait SettingsStore: Send + Sync {
    /// Read the stored settings. `Ok(None)` means nothing stored yet.
    fn load(&self) -> Result<Option<PersistedSettings>>;

    /// Write the settings, replacing any previous record.
    fn save(&self, settings: &PersistedSettings) -> Result<()>;
}

/// JSON-file settings store in the platform config directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by an explicit file path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the default location (`<config dir>/settings.json`).
    pub fn at_default_path() -> Result<Self> {
        Ok(Self::new(RuntimeConfig::config_dir()?.join("settings.json")))
    }
}

impl SettingsStore for FileStore {
    fn load(&self) -> Result<Option<PersistedSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, settings: &PersistedSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(settings)?)?;

        // Owner read/write only; the token is not secret but there is no
        // reason to share it either
        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

/// In-memory settings store for tests and hosts that manage persistence
/// themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<PersistedSettings>>,
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedSettings>> {
        Ok(self.inner.lock().expect("store lock poisoned").clone())
    }

    fn save(&self, settings: &PersistedSettings) -> Result<()> {
        *self.inner.lock().expect("store lock poisoned") = Some(settings.clone());
        Ok(())
    }
}
