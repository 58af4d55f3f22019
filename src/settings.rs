//! In-memory model of the device's push configuration.
//!
//! [`PushSettings`] is the single authoritative copy of everything the
//! remote registration service should know about this device. Mutators only
//! touch local state and mark it dirty; nothing in this module performs
//! network I/O. The reconciliation task reads immutable
//! [`SettingsSnapshot`]s and reports back through [`PushSettings::mark_synced`].
//!
//! Dirty tracking is revision-based: every effective mutation bumps a
//! monotonically increasing revision, and a successful sync clears the dirty
//! flag only when the revision still matches the snapshot that was sent.
//! A mutation landing while a request is in flight therefore leaves the
//! settings dirty for the next cycle.

use std::collections::BTreeSet;
use std::ops::BitOr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::constants;

/// A recurring daily window during which push delivery is suppressed
/// server-side. Only hour and minute are significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietTime {
    /// Start of the window (inclusive).
    pub from: NaiveTime,
    /// End of the window (inclusive). May be earlier than `from`, meaning
    /// the window wraps past midnight.
    pub to: NaiveTime,
}

/// Bitmask of notification types the host application requests from the
/// OS push service. Recorded here so it survives restarts; the OS-facing
/// registration call itself is the host application's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationTypes(u32);

impl NotificationTypes {
    /// No notification types requested.
    pub const NONE: Self = Self(0);
    /// Badge updates.
    pub const BADGE: Self = Self(1);
    /// Sounds.
    pub const SOUND: Self = Self(1 << 1);
    /// Alerts.
    pub const ALERT: Self = Self(1 << 2);

    /// Raw bitmask value.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no types are requested.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for NotificationTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Encode a device token as a lowercase hex string, the form the
/// registration endpoint uses as the path key.
pub fn token_hex(token: &[u8]) -> String {
    token.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a lowercase hex token string back into bytes. Returns `None` for
/// odd-length or non-hex input.
pub(crate) fn token_from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Authoritative in-memory model of the device's push configuration.
#[derive(Debug, Clone)]
pub struct PushSettings {
    push_enabled: bool,
    device_token: Option<Vec<u8>>,
    last_registered_token: Option<Vec<u8>>,
    tags: BTreeSet<String>,
    can_edit_tags_from_device: bool,
    alias: Option<String>,
    quiet_time: Option<QuietTime>,
    quiet_time_enabled: bool,
    time_zone: String,
    autobadge_enabled: bool,
    badge_number: i32,
    retry_on_connection_error: bool,
    notification_types: NotificationTypes,
    dirty: bool,
    revision: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            push_enabled: true,
            device_token: None,
            last_registered_token: None,
            tags: BTreeSet::new(),
            can_edit_tags_from_device: true,
            alias: None,
            quiet_time: None,
            quiet_time_enabled: false,
            time_zone: constants::DEFAULT_TIME_ZONE.to_string(),
            autobadge_enabled: false,
            badge_number: 0,
            retry_on_connection_error: true,
            notification_types: NotificationTypes::NONE,
            dirty: false,
            revision: 0,
        }
    }
}

impl PushSettings {
    /// Record an effective mutation: bump the revision and mark dirty.
    fn touch(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }

    /// Force the dirty flag on without an observable field change. Used
    /// when restoring a stored record that was dirty at save time.
    pub(crate) fn mark_dirty(&mut self) {
        self.touch();
    }

    /// Restore the server-side token knowledge without touching the dirty
    /// flag. Used when rebuilding from a stored record.
    pub(crate) fn restore_last_registered_token(&mut self, token: Option<Vec<u8>>) {
        self.last_registered_token = token;
    }

    /// Whether push is enabled for this device.
    pub fn push_enabled(&self) -> bool {
        self.push_enabled
    }

    /// Enable or disable push. Disabling makes the next sync an unregister.
    ///
    /// Returns `true` if the stored value changed.
    pub fn set_push_enabled(&mut self, enabled: bool) -> bool {
        if self.push_enabled == enabled {
            return false;
        }
        self.push_enabled = enabled;
        self.touch();
        true
    }

    /// The current device token, if the OS has delivered one.
    pub fn device_token(&self) -> Option<&[u8]> {
        self.device_token.as_deref()
    }

    /// The token most recently accepted by the registration service.
    pub fn last_registered_token(&self) -> Option<&[u8]> {
        self.last_registered_token.as_deref()
    }

    /// Store a token received from the OS push service.
    ///
    /// Returns `true` if the token differs from the last one the server
    /// accepted — the condition consumed by the automatic sync trigger.
    pub fn set_device_token(&mut self, token: Vec<u8>) -> bool {
        assert!(!token.is_empty(), "device token must not be empty");
        let changed_locally = self.device_token.as_ref() != Some(&token);
        let changed_remotely = self.last_registered_token.as_ref() != Some(&token);
        self.device_token = Some(token);
        if changed_locally {
            self.touch();
        }
        changed_remotely
    }

    /// Whether the current token differs from the last one the server
    /// accepted.
    pub fn device_token_has_changed(&self) -> bool {
        self.device_token.is_some() && self.device_token != self.last_registered_token
    }

    /// Tags currently associated with the device.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Replace the whole tag set. Returns `true` if the set changed.
    pub fn set_tags(&mut self, tags: impl IntoIterator<Item = String>) -> bool {
        let new: BTreeSet<String> = tags.into_iter().collect();
        for tag in &new {
            assert!(!tag.is_empty(), "tag must not be empty");
        }
        if new == self.tags {
            return false;
        }
        self.tags = new;
        self.touch();
        true
    }

    /// Add a single tag. Adding a tag that is already present is a no-op
    /// that leaves the dirty flag untouched. Returns `true` if added.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        assert!(!tag.is_empty(), "tag must not be empty");
        if self.tags.insert(tag.to_string()) {
            self.touch();
            return true;
        }
        false
    }

    /// Remove a single tag. Removing an absent tag is a no-op. Returns
    /// `true` if removed.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        assert!(!tag.is_empty(), "tag must not be empty");
        if self.tags.remove(tag) {
            self.touch();
            return true;
        }
        false
    }

    /// Add a group of tags in one edit. Returns `true` if any was new.
    pub fn add_tags<I, S>(&mut self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut changed = false;
        for tag in tags {
            let tag = tag.as_ref();
            assert!(!tag.is_empty(), "tag must not be empty");
            changed |= self.tags.insert(tag.to_string());
        }
        if changed {
            self.touch();
        }
        changed
    }

    /// Remove a group of tags in one edit. Returns `true` if any was
    /// present.
    pub fn remove_tags<I, S>(&mut self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut changed = false;
        for tag in tags {
            let tag = tag.as_ref();
            assert!(!tag.is_empty(), "tag must not be empty");
            changed |= self.tags.remove(tag);
        }
        if changed {
            self.touch();
        }
        changed
    }

    /// Whether tag edits made on the device are sent to the server.
    pub fn can_edit_tags_from_device(&self) -> bool {
        self.can_edit_tags_from_device
    }

    /// Gate tag fields out of the outgoing payload when server-side tagging
    /// is in use. Returns `true` if the stored value changed.
    pub fn set_can_edit_tags_from_device(&mut self, can_edit: bool) -> bool {
        if self.can_edit_tags_from_device == can_edit {
            return false;
        }
        self.can_edit_tags_from_device = can_edit;
        self.touch();
        true
    }

    /// Alias for this device, if set.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Set or clear the device alias. Pass `None` to clear; an empty string
    /// is a contract violation. Returns `true` if the stored value changed.
    pub fn set_alias(&mut self, alias: Option<String>) -> bool {
        if let Some(ref value) = alias {
            assert!(!value.is_empty(), "alias must not be empty; pass None to clear");
        }
        if self.alias == alias {
            return false;
        }
        self.alias = alias;
        self.touch();
        true
    }

    /// Quiet-time window, if one has been configured.
    pub fn quiet_time(&self) -> Option<QuietTime> {
        self.quiet_time
    }

    /// Whether the quiet-time window is active.
    pub fn quiet_time_enabled(&self) -> bool {
        self.quiet_time_enabled
    }

    /// Configure the quiet-time window. Only hour and minute of the given
    /// times are kept; seconds are discarded. Setting a window does NOT
    /// enable quiet time — use [`Self::set_quiet_time_enabled`] for that.
    ///
    /// Returns `true` if the stored window or time zone changed.
    pub fn set_quiet_time(&mut self, from: NaiveTime, to: NaiveTime, time_zone: &str) -> bool {
        assert!(!time_zone.is_empty(), "time zone identifier must not be empty");
        let window = QuietTime {
            from: truncate_to_minute(from),
            to: truncate_to_minute(to),
        };
        let mut changed = false;
        if self.quiet_time != Some(window) {
            self.quiet_time = Some(window);
            changed = true;
        }
        if self.time_zone != time_zone {
            self.time_zone = time_zone.to_string();
            changed = true;
        }
        if changed {
            self.touch();
        }
        changed
    }

    /// Turn the quiet-time window on or off, independently of the window
    /// itself. Returns `true` if the stored value changed.
    pub fn set_quiet_time_enabled(&mut self, enabled: bool) -> bool {
        if self.quiet_time_enabled == enabled {
            return false;
        }
        self.quiet_time_enabled = enabled;
        self.touch();
        true
    }

    /// Time zone identifier the quiet-time window is expressed in.
    pub fn time_zone(&self) -> &str {
        &self.time_zone
    }

    /// Set the quiet-time time zone. Returns `true` if changed.
    pub fn set_time_zone(&mut self, time_zone: &str) -> bool {
        assert!(!time_zone.is_empty(), "time zone identifier must not be empty");
        if self.time_zone == time_zone {
            return false;
        }
        self.time_zone = time_zone.to_string();
        self.touch();
        true
    }

    /// Whether the server-tracked badge counter is reconciled automatically.
    pub fn autobadge_enabled(&self) -> bool {
        self.autobadge_enabled
    }

    /// Toggle autobadge. Returns `true` if the stored value changed.
    pub fn set_autobadge_enabled(&mut self, enabled: bool) -> bool {
        if self.autobadge_enabled == enabled {
            return false;
        }
        self.autobadge_enabled = enabled;
        self.touch();
        true
    }

    /// Current badge number.
    pub fn badge_number(&self) -> i32 {
        self.badge_number
    }

    /// Set the badge number. Returns `true` if the stored value changed.
    pub fn set_badge_number(&mut self, badge: i32) -> bool {
        if self.badge_number == badge {
            return false;
        }
        self.badge_number = badge;
        self.touch();
        true
    }

    /// Whether transient failures are retried automatically.
    pub fn retry_on_connection_error(&self) -> bool {
        self.retry_on_connection_error
    }

    /// Toggle automatic retry on transient failures. Returns `true` if the
    /// stored value changed.
    pub fn set_retry_on_connection_error(&mut self, retry: bool) -> bool {
        if self.retry_on_connection_error == retry {
            return false;
        }
        self.retry_on_connection_error = retry;
        self.touch();
        true
    }

    /// Notification types the host application last requested.
    pub fn notification_types(&self) -> NotificationTypes {
        self.notification_types
    }

    /// Record the notification types requested from the OS push service.
    /// This is bookkeeping only; it does not mark the settings dirty since
    /// the bitmask is not part of the registration payload.
    pub fn set_notification_types(&mut self, types: NotificationTypes) -> bool {
        if self.notification_types == types {
            return false;
        }
        self.notification_types = types;
        true
    }

    /// Whether local mutations are not yet reflected in the last successful
    /// remote sync.
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Current mutation revision. Captured in snapshots so a successful
    /// sync can be attributed to exactly the state it covered.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Take an immutable snapshot for payload building. The snapshot holds
    /// everything the builder needs plus the revision it was taken at.
    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            push_enabled: self.push_enabled,
            device_token: self.device_token.clone(),
            tags: self.tags.iter().cloned().collect(),
            can_edit_tags_from_device: self.can_edit_tags_from_device,
            alias: self.alias.clone(),
            quiet_time: self.quiet_time,
            quiet_time_enabled: self.quiet_time_enabled,
            time_zone: self.time_zone.clone(),
            autobadge_enabled: self.autobadge_enabled,
            badge_number: self.badge_number,
            retry_on_connection_error: self.retry_on_connection_error,
            revision: self.revision,
        }
    }

    /// Record a successful sync of the snapshot taken at
    /// `snapshot_revision`. `registered_token` is the token the server now
    /// holds (`None` after an unregister).
    ///
    /// The dirty flag clears only when no mutation happened after the
    /// snapshot was taken; otherwise the settings stay dirty so the next
    /// cycle picks up the newer state.
    pub fn mark_synced(&mut self, snapshot_revision: u64, registered_token: Option<Vec<u8>>) {
        self.last_registered_token = registered_token;
        if self.revision == snapshot_revision {
            self.dirty = false;
        } else {
            log::debug!(
                "settings mutated during sync (revision {} -> {}), staying dirty",
                snapshot_revision,
                self.revision
            );
        }
    }
}

/// Discard seconds (and finer) from a time-of-day value.
fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0)
        .expect("hour and minute come from a valid NaiveTime")
}

/// Immutable copy of [`PushSettings`] handed to the payload builder and the
/// reconciliation task. Carries the revision it was taken at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSnapshot {
    /// Whether push is enabled.
    pub push_enabled: bool,
    /// Device token at snapshot time.
    pub device_token: Option<Vec<u8>>,
    /// Tags in sorted order.
    pub tags: Vec<String>,
    /// Whether tag fields go into the payload.
    pub can_edit_tags_from_device: bool,
    /// Device alias.
    pub alias: Option<String>,
    /// Quiet-time window.
    pub quiet_time: Option<QuietTime>,
    /// Whether the quiet-time window is active.
    pub quiet_time_enabled: bool,
    /// Time zone identifier for the quiet-time window.
    pub time_zone: String,
    /// Whether the badge number goes into the payload.
    pub autobadge_enabled: bool,
    /// Badge number.
    pub badge_number: i32,
    /// Whether transient failures are retried.
    pub retry_on_connection_error: bool,
    /// Mutation revision this snapshot was taken at.
    pub revision: u64,
}
