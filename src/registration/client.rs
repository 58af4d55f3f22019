//! Asynchronous registration client.
//!
//! A single spawned task owns the reconciliation cycle, which is what makes
//! the at-most-one-in-flight invariant structural rather than guarded:
//! there is exactly one place in the process that can have a registration
//! request outstanding. Sync requests arrive over a small channel; whatever
//! queues up while a cycle runs collapses into one follow-up cycle.
//!
//! Cancellation wins every race. A response or a backoff timer that
//! completes after shutdown is discarded without touching settings or
//! observers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SyncFailure;
use crate::observer::ObserverRegistry;
use crate::persistence::{PersistedSettings, SettingsStore};
use crate::registration::{payload, RetryPolicy};
use crate::settings::{PushSettings, SettingsSnapshot};
use crate::transport::{RequestSpec, Transport, TransportError, TransportResponse};

/// How a single attempt's outcome classifies.
#[derive(Debug)]
enum Outcome {
    /// HTTP 2xx.
    Success,
    /// HTTP 5xx or a transport-level error; eligible for retry.
    Retryable(SyncFailure),
    /// Anything else; surfaced immediately, never retried.
    Permanent(SyncFailure),
}

/// The reconciliation task. Created via [`RegistrationClient::spawn`],
/// driven entirely by sync requests and cancellation.
pub struct RegistrationClient {
    settings: Arc<Mutex<PushSettings>>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SettingsStore>,
    observers: Arc<Mutex<ObserverRegistry>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    rx: mpsc::Receiver<()>,
    in_flight: Arc<AtomicBool>,
}

impl std::fmt::Debug for RegistrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RegistrationClient {
    /// Spawn the reconciliation task on the current tokio runtime.
    ///
    /// Returns the sync-request sender, the shared in-flight marker, and
    /// the task handle (awaited by the manager on shutdown).
    pub(crate) fn spawn(
        settings: Arc<Mutex<PushSettings>>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SettingsStore>,
        observers: Arc<Mutex<ObserverRegistry>>,
        retry: RetryPolicy,
        cancel: CancellationToken,
        queue_depth: usize,
    ) -> (
        mpsc::Sender<()>,
        Arc<AtomicBool>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let in_flight = Arc::new(AtomicBool::new(false));

        let client = Self {
            settings,
            transport,
            store,
            observers,
            retry,
            cancel,
            rx,
            in_flight: Arc::clone(&in_flight),
        };

        let task = tokio::spawn(client.run());
        (tx, in_flight, task)
    }

    /// Main loop: wait for a sync request, run one cycle, repeat.
    ///
    /// Requests that arrive while a cycle runs stay queued and are drained
    /// into a single follow-up cycle, so N overlapping `update_registration`
    /// calls produce at most one extra request once the current one
    /// completes.
    async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                request = self.rx.recv() => {
                    if request.is_none() {
                        break;
                    }
                }
            }

            // Coalesce everything already queued into this cycle; the
            // snapshot is taken after draining, so those requests are
            // fully covered by it.
            while self.rx.try_recv().is_ok() {}

            self.run_cycle().await;
        }
        log::debug!("registration client stopped");
    }

    /// One full reconciliation cycle:
    /// `Building → Sending → (Success | Retrying | Failed)`.
    async fn run_cycle(&mut self) {
        self.in_flight.store(true, Ordering::SeqCst);
        let result = self.drive_attempts().await;
        self.in_flight.store(false, Ordering::SeqCst);

        if let Some((spec, snapshot, outcome)) = result {
            match outcome {
                Ok(()) => self.finish_success(&spec, &snapshot),
                Err(failure) => self.finish_failure(&spec, failure),
            }
        }
    }

    /// Run attempts until success, terminal failure, or cancellation.
    ///
    /// Every attempt rebuilds the request from a fresh snapshot, so a
    /// mutation made during backoff is included instead of overwritten.
    /// Returns `None` when the cycle ended without a reportable outcome
    /// (cancellation, or no token yet).
    async fn drive_attempts(
        &mut self,
    ) -> Option<(RequestSpec, SettingsSnapshot, Result<(), SyncFailure>)> {
        let mut attempt: u32 = 1;
        loop {
            let snapshot = self.settings.lock().expect("settings lock poisoned").snapshot();

            let spec = match payload::build_request(&snapshot) {
                Ok(spec) => spec,
                Err(e) => {
                    // Precondition failure, not a server-reported one:
                    // back to idle without involving observers.
                    log::debug!("skipping sync cycle: {e}");
                    return None;
                }
            };

            log::debug!(
                "sync attempt {}/{}: {:?} token={}",
                attempt,
                self.retry.max_attempts(),
                spec.operation,
                spec.token_hex
            );

            let sent = tokio::select! {
                () = self.cancel.cancelled() => return None,
                sent = self.transport.send(&spec) => sent,
            };

            match Self::classify(sent) {
                Outcome::Success => return Some((spec, snapshot, Ok(()))),
                Outcome::Permanent(failure) => return Some((spec, snapshot, Err(failure))),
                Outcome::Retryable(failure) => {
                    if !snapshot.retry_on_connection_error {
                        return Some((spec, snapshot, Err(failure)));
                    }
                    if !self.retry.allows_retry_after(attempt) {
                        return Some((
                            spec,
                            snapshot,
                            Err(SyncFailure::RetriesExhausted {
                                attempts: attempt,
                                last: Box::new(failure),
                            }),
                        ));
                    }

                    let delay = self.retry.delay_after(attempt);
                    log::info!(
                        "transient sync failure ({failure}), retrying in {delay:?} \
                         (attempt {attempt}/{})",
                        self.retry.max_attempts()
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return None,
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Map a transport result onto the outcome taxonomy.
    fn classify(result: Result<TransportResponse, TransportError>) -> Outcome {
        match result {
            Ok(response) if (200..300).contains(&response.status) => Outcome::Success,
            Ok(response) if (500..600).contains(&response.status) => {
                Outcome::Retryable(SyncFailure::ServerError {
                    status: response.status,
                    body: response.body,
                })
            }
            Ok(response) => Outcome::Permanent(SyncFailure::ClientError {
                status: response.status,
                body: response.body,
            }),
            Err(e) => Outcome::Retryable(SyncFailure::Transport(e.to_string())),
        }
    }

    /// Success path: record what the server now holds, clear dirty for the
    /// synchronized snapshot, persist, notify.
    fn finish_success(&self, spec: &RequestSpec, snapshot: &SettingsSnapshot) {
        use crate::transport::Operation;

        let registered_token = match spec.operation {
            Operation::Register => snapshot.device_token.clone(),
            Operation::Unregister => None,
        };

        let persisted = {
            let mut settings = self.settings.lock().expect("settings lock poisoned");
            settings.mark_synced(snapshot.revision, registered_token);
            PersistedSettings::from_settings(&settings)
        };

        if let Err(e) = self.store.save(&persisted) {
            log::warn!("failed to persist settings after sync: {e}");
        }

        log::info!("{:?} succeeded", spec.operation);
        self.notify_observers(spec.operation, &Ok(()));
    }

    /// Terminal-failure path: settings stay dirty so a later sync retries
    /// the same logical change; observers hear about it exactly once.
    fn finish_failure(&self, spec: &RequestSpec, failure: SyncFailure) {
        log::warn!("{:?} failed: {failure}", spec.operation);
        self.notify_observers(spec.operation, &Err(failure));
    }

    /// Snapshot the live observers under the lock, dispatch outside it, so
    /// a callback may re-enter the registry without deadlocking.
    fn notify_observers(
        &self,
        operation: crate::transport::Operation,
        outcome: &Result<(), SyncFailure>,
    ) {
        let handles = self
            .observers
            .lock()
            .expect("observer lock poisoned")
            .live_handles();
        ObserverRegistry::dispatch(&handles, operation, outcome);
    }
}
