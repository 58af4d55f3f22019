//! Public facade over the push registration engine.
//!
//! [`PushManager`] is constructed and owned explicitly by the host
//! application — there is no process-wide singleton. Construction loads
//! persisted settings and spawns the reconciliation task; [`PushManager::shutdown`]
//! cancels any in-flight request and pending retry timer, after which late
//! completions are discarded without observer callbacks.
//!
//! Mutators only touch local state (and persist it); the network is
//! involved exclusively through [`PushManager::update_registration`] and
//! the automatic trigger on device-token change. This batches any number
//! of edits into a single round-trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::constants;
use crate::error::{Error, Result};
use crate::observer::{ObserverRegistry, RegistrationObserver};
use crate::persistence::{FileStore, PersistedSettings, SettingsStore};
use crate::registration::{RegistrationClient, RetryPolicy};
use crate::settings::{NotificationTypes, PushSettings, SettingsSnapshot};
use crate::transport::{HttpTransport, Transport};

/// Client-side push registration manager.
///
/// One instance manages exactly one device's state. All methods take
/// `&self`; internal state is serialized behind a mutex, and the only
/// suspension point (the HTTP call) runs on the spawned reconciliation
/// task, never on the caller.
pub struct PushManager {
    settings: Arc<Mutex<PushSettings>>,
    store: Arc<dyn SettingsStore>,
    observers: Arc<Mutex<ObserverRegistry>>,
    sync_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    in_flight: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PushManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushManager")
            .field("shut_down", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PushManager {
    /// Build a manager with explicit collaborators.
    ///
    /// Must be called within a tokio runtime; the reconciliation task is
    /// spawned here. Persisted settings are loaded from the store; a
    /// corrupt or unreadable record falls back to defaults with a warning.
    pub fn new(
        config: &RuntimeConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let settings = match store.load() {
            Ok(Some(persisted)) => persisted.into_settings(),
            Ok(None) => PushSettings::default(),
            Err(e) => {
                log::warn!("failed to load persisted push settings: {e}");
                PushSettings::default()
            }
        };
        if settings.dirty() {
            log::info!("restored settings carry unsynced changes");
        }

        let settings = Arc::new(Mutex::new(settings));
        let observers = Arc::new(Mutex::new(ObserverRegistry::default()));
        let cancel = CancellationToken::new();

        let (sync_tx, in_flight, task) = RegistrationClient::spawn(
            Arc::clone(&settings),
            transport,
            Arc::clone(&store),
            Arc::clone(&observers),
            RetryPolicy::from_config(&config.retry),
            cancel.clone(),
            constants::SYNC_QUEUE_DEPTH,
        );

        Self {
            settings,
            store,
            observers,
            sync_tx,
            cancel,
            in_flight,
            task: Mutex::new(Some(task)),
        }
    }

    /// Build a manager with the default HTTP transport and file store.
    pub fn with_defaults(config: &RuntimeConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config)?);
        let store: Arc<dyn SettingsStore> = Arc::new(FileStore::at_default_path()?);
        Ok(Self::new(config, transport, store))
    }

    // ------------------------------------------------------------------
    // Mutations (local only; no network I/O)
    // ------------------------------------------------------------------

    /// Run a mutation under the settings lock; persist if it changed
    /// anything. Persistence failures are logged, never propagated — the
    /// in-memory state is already updated and a later save will retry.
    fn mutate(&self, mutation: impl FnOnce(&mut PushSettings) -> bool) -> bool {
        let persisted = {
            let mut settings = self.settings.lock().expect("settings lock poisoned");
            if !mutation(&mut settings) {
                return false;
            }
            PersistedSettings::from_settings(&settings)
        };
        if let Err(e) = self.store.save(&persisted) {
            log::warn!("failed to persist push settings: {e}");
        }
        true
    }

    /// Enable or disable push for this device. Takes effect on the next
    /// sync: disabled means the next sync unregisters.
    pub fn set_push_enabled(&self, enabled: bool) {
        self.mutate(|s| s.set_push_enabled(enabled));
    }

    /// Toggle the server-tracked badge reconciliation.
    pub fn set_autobadge_enabled(&self, enabled: bool) {
        self.mutate(|s| s.set_autobadge_enabled(enabled));
    }

    /// Set the badge number to be reconciled on the next sync.
    pub fn set_badge_number(&self, badge: i32) {
        self.mutate(|s| s.set_badge_number(badge));
    }

    /// Reset the badge to zero. Convenience for `set_badge_number(0)`.
    pub fn reset_badge(&self) {
        self.set_badge_number(0);
    }

    /// Set or clear the device alias.
    pub fn set_alias(&self, alias: Option<String>) {
        self.mutate(|s| s.set_alias(alias));
    }

    /// Replace the device's tag set.
    pub fn set_tags(&self, tags: Vec<String>) {
        self.mutate(|s| s.set_tags(tags));
    }

    /// Add a tag. Call [`Self::update_registration`] after making all your
    /// edits; batching them improves API and client performance.
    pub fn add_tag(&self, tag: &str) {
        self.mutate(|s| s.add_tag(tag));
    }

    /// Remove a tag.
    pub fn remove_tag(&self, tag: &str) {
        self.mutate(|s| s.remove_tag(tag));
    }

    /// Add a group of tags in one edit.
    pub fn add_tags<I, S>(&self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutate(|s| s.add_tags(tags));
    }

    /// Remove a group of tags in one edit.
    pub fn remove_tags<I, S>(&self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutate(|s| s.remove_tags(tags));
    }

    /// Gate tag fields out of the payload for server-side tagging setups.
    pub fn set_can_edit_tags_from_device(&self, can_edit: bool) {
        self.mutate(|s| s.set_can_edit_tags_from_device(can_edit));
    }

    /// Configure the quiet-time window. Seconds are discarded; the window
    /// is not implicitly enabled — see [`Self::set_quiet_time_enabled`].
    pub fn set_quiet_time(&self, from: NaiveTime, to: NaiveTime, time_zone: &str) {
        self.mutate(|s| s.set_quiet_time(from, to, time_zone));
    }

    /// Turn the quiet-time window on or off.
    pub fn set_quiet_time_enabled(&self, enabled: bool) {
        self.mutate(|s| s.set_quiet_time_enabled(enabled));
    }

    /// Set the quiet-time time zone identifier.
    pub fn set_time_zone(&self, time_zone: &str) {
        self.mutate(|s| s.set_time_zone(time_zone));
    }

    /// Toggle automatic retry of transient registration failures.
    pub fn set_retry_on_connection_error(&self, retry: bool) {
        self.mutate(|s| s.set_retry_on_connection_error(retry));
    }

    /// Record the notification types the host requests from the OS push
    /// service. The OS-facing registration call is the host's job; when
    /// the OS later delivers a token, pass it to
    /// [`Self::device_token_received`].
    pub fn register_for_remote_notification_types(&self, types: NotificationTypes) {
        self.mutate(|s| s.set_notification_types(types));
    }

    // ------------------------------------------------------------------
    // OS push-registration callbacks
    // ------------------------------------------------------------------

    /// Entry point for the OS push-registration callback: a token arrived.
    ///
    /// Stores the token and, if it differs from what the server last
    /// accepted, triggers a sync automatically.
    pub fn device_token_received(&self, token: Vec<u8>) {
        let mut changed = false;
        self.mutate(|s| {
            changed = s.set_device_token(token);
            changed
        });
        if changed {
            log::info!("device token changed, scheduling registration sync");
            if let Err(e) = self.update_registration() {
                log::warn!("token-triggered sync not started: {e}");
            }
        }
    }

    /// Entry point for the OS push-registration callback: registration
    /// with the OS push service failed. No remote sync is possible without
    /// a token, so this only records the fact.
    pub fn device_token_registration_failed(&self, error: &str) {
        log::error!("OS push registration failed: {error}");
    }

    /// Whether the current token differs from the last one the server
    /// accepted.
    pub fn device_token_has_changed(&self) -> bool {
        self.settings
            .lock()
            .expect("settings lock poisoned")
            .device_token_has_changed()
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Register or update the current registration with an API call; if
    /// push is disabled, this unregisters the device token instead.
    ///
    /// Asynchronous: the call returns once the sync is scheduled. Outcomes
    /// are delivered through registered [`RegistrationObserver`]s. Errors
    /// returned here ([`Error::NotReady`], [`Error::Shutdown`]) mean no
    /// request was scheduled at all.
    pub fn update_registration(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        if self
            .settings
            .lock()
            .expect("settings lock poisoned")
            .device_token()
            .is_none()
        {
            return Err(Error::NotReady);
        }

        match self.sync_tx.try_send(()) {
            Ok(()) => Ok(()),
            // Queue full: a sync is already pending and will pick up the
            // current state — coalesce.
            Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(Error::Shutdown),
        }
    }

    /// Whether a registration request is currently outstanding.
    pub fn sync_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Snapshot of the current settings, for inspection.
    pub fn snapshot(&self) -> SettingsSnapshot {
        self.settings
            .lock()
            .expect("settings lock poisoned")
            .snapshot()
    }

    /// Whether local mutations are not yet reflected remotely.
    pub fn dirty(&self) -> bool {
        self.settings.lock().expect("settings lock poisoned").dirty()
    }

    // ------------------------------------------------------------------
    // Legacy entry points
    // ------------------------------------------------------------------

    /// Set the device token and sync in one call.
    ///
    /// Thin adapter over [`Self::device_token_received`] +
    /// [`Self::update_registration`]; prefer those with batched edits.
    pub fn register_device_token(&self, token: Vec<u8>) -> Result<()> {
        self.mutate(|s| s.set_device_token(token));
        self.update_registration()
    }

    /// Set the device token and alias, then sync. Adapter kept for callers
    /// migrating from alias-at-registration APIs.
    pub fn register_device_token_with_alias(&self, token: Vec<u8>, alias: String) -> Result<()> {
        self.mutate(|s| {
            let token_set = s.set_device_token(token);
            s.set_alias(Some(alias)) || token_set
        });
        self.update_registration()
    }

    /// Disable push and sync, removing this device's registration.
    /// Equivalent to `set_push_enabled(false)` + `update_registration()`.
    pub fn unregister_device_token(&self) -> Result<()> {
        self.set_push_enabled(false);
        self.update_registration()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register an observer for registration outcomes. The manager keeps
    /// only a weak handle; dropping the observer effectively unregisters
    /// it.
    pub fn add_observer(&self, observer: &Arc<dyn RegistrationObserver>) {
        self.observers
            .lock()
            .expect("observer lock poisoned")
            .add(observer);
    }

    /// Remove a previously registered observer.
    pub fn remove_observer(&self, observer: &Arc<dyn RegistrationObserver>) {
        self.observers
            .lock()
            .expect("observer lock poisoned")
            .remove(observer);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Tear down: cancel any in-flight request and pending retry timer,
    /// then wait for the reconciliation task to stop. Completions racing
    /// with the cancellation are discarded without observer callbacks.
    ///
    /// Idempotent; further sync requests fail with [`Error::Shutdown`].
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().expect("task lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::warn!("registration task did not shut down cleanly: {e}");
            }
        }
        log::info!("push manager shut down");
    }
}

impl Drop for PushManager {
    fn drop(&mut self) {
        // Stops the task even when shutdown() was never awaited
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncFailure;
    use crate::persistence::MemoryStore;
    use crate::transport::{RequestSpec, TransportError, TransportResponse};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Always-succeeding transport that counts requests.
    #[derive(Default)]
    struct OkTransport {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl Transport for OkTransport {
        async fn send(&self, _spec: &RequestSpec) -> std::result::Result<TransportResponse, TransportError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse {
                status: 200,
                body: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        register_ok: AtomicUsize,
        unregister_ok: AtomicUsize,
        failures: AtomicUsize,
    }

    impl RegistrationObserver for CountingObserver {
        fn register_succeeded(&self) {
            self.register_ok.fetch_add(1, Ordering::SeqCst);
        }
        fn register_failed(&self, _failure: &SyncFailure) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        fn unregister_succeeded(&self) {
            self.unregister_ok.fetch_add(1, Ordering::SeqCst);
        }
        fn unregister_failed(&self, _failure: &SyncFailure) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager_with(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SettingsStore>,
    ) -> PushManager {
        PushManager::new(&RuntimeConfig::default(), transport, store)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_update_registration_without_token_is_not_ready() {
        let transport = Arc::new(OkTransport::default());
        let manager = manager_with(transport.clone(), Arc::new(MemoryStore::default()));
        let observer = Arc::new(CountingObserver::default());
        let handle: Arc<dyn RegistrationObserver> = observer.clone();
        manager.add_observer(&handle);

        let result = manager.update_registration();
        assert!(matches!(result, Err(Error::NotReady)));
        settle().await;

        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
        assert_eq!(observer.register_ok.load(Ordering::SeqCst), 0);
        assert_eq!(observer.failures.load(Ordering::SeqCst), 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_token_receipt_triggers_automatic_sync() {
        let transport = Arc::new(OkTransport::default());
        let manager = manager_with(transport.clone(), Arc::new(MemoryStore::default()));
        let observer = Arc::new(CountingObserver::default());
        let handle: Arc<dyn RegistrationObserver> = observer.clone();
        manager.add_observer(&handle);

        manager.device_token_received(vec![0x01, 0x02]);
        settle().await;

        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);
        assert_eq!(observer.register_ok.load(Ordering::SeqCst), 1);
        assert!(!manager.dirty());
        assert!(!manager.device_token_has_changed());

        // The same token again: already registered, no extra round-trip
        manager.device_token_received(vec![0x01, 0x02]);
        settle().await;
        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_edits_batch_into_one_sync() {
        let transport = Arc::new(OkTransport::default());
        let manager = manager_with(transport.clone(), Arc::new(MemoryStore::default()));

        manager.device_token_received(vec![0xee]);
        settle().await;
        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);

        // Any number of local edits: no network traffic
        manager.add_tag("a");
        manager.add_tags(["b", "c"]);
        manager.remove_tag("b");
        manager.set_alias(Some("alice".to_string()));
        manager.set_badge_number(2);
        settle().await;
        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);
        assert!(manager.dirty());

        // One explicit sync covers them all
        manager.update_registration().expect("sync scheduled");
        settle().await;
        assert_eq!(transport.requests.load(Ordering::SeqCst), 2);
        assert!(!manager.dirty());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_disable_then_sync_unregisters() {
        let transport = Arc::new(OkTransport::default());
        let manager = manager_with(transport.clone(), Arc::new(MemoryStore::default()));
        let observer = Arc::new(CountingObserver::default());
        let handle: Arc<dyn RegistrationObserver> = observer.clone();
        manager.add_observer(&handle);

        manager.device_token_received(vec![0x42]);
        settle().await;

        manager.unregister_device_token().expect("sync scheduled");
        settle().await;

        assert_eq!(observer.unregister_ok.load(Ordering::SeqCst), 1);
        assert!(!manager.snapshot().push_enabled);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_mutations_persist_through_store() {
        let store = Arc::new(MemoryStore::default());
        let transport = Arc::new(OkTransport::default());
        {
            let manager = manager_with(transport.clone(), store.clone());
            manager.device_token_received(vec![0x10, 0x20]);
            manager.add_tag("persisted");
            manager.set_quiet_time(
                NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                "Europe/Berlin",
            );
            settle().await;
            manager.shutdown().await;
        }

        // A new manager over the same store sees the state
        let manager = manager_with(transport, store);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.device_token, Some(vec![0x10, 0x20]));
        assert!(snapshot.tags.contains(&"persisted".to_string()));
        assert_eq!(snapshot.time_zone, "Europe/Berlin");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_after_shutdown_is_rejected() {
        let transport = Arc::new(OkTransport::default());
        let manager = manager_with(transport, Arc::new(MemoryStore::default()));
        manager.device_token_received(vec![0x99]);
        manager.shutdown().await;

        assert!(matches!(
            manager.update_registration(),
            Err(Error::Shutdown)
        ));
        // Idempotent
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_device_token_adapter_syncs() {
        let transport = Arc::new(OkTransport::default());
        let manager = manager_with(transport.clone(), Arc::new(MemoryStore::default()));

        manager
            .register_device_token_with_alias(vec![0x07], "bob".to_string())
            .expect("sync scheduled");
        settle().await;

        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.alias.as_deref(), Some("bob"));
        assert!(!manager.dirty());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_notification_types_recorded() {
        let transport = Arc::new(OkTransport::default());
        let manager = manager_with(transport, Arc::new(MemoryStore::default()));

        manager.register_for_remote_notification_types(
            NotificationTypes::ALERT | NotificationTypes::SOUND,
        );
        let types = {
            let settings = manager.settings.lock().expect("lock poisoned");
            settings.notification_types()
        };
        assert!(types.contains(NotificationTypes::ALERT));
        assert!(!types.contains(NotificationTypes::BADGE));

        manager.shutdown().await;
    }
}
