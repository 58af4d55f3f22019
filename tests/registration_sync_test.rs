//! End-to-end tests of the registration flow against a mock HTTP server.
//!
//! These drive the real [`PushManager`] + [`HttpTransport`] stack, so they
//! cover URL building, JSON encoding, status classification, and retry
//! scheduling together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pushsync::{
    HttpTransport, MemoryStore, PushManager, RegistrationObserver, RuntimeConfig, SyncFailure,
};

#[derive(Default)]
struct RecordingObserver {
    register_ok: AtomicUsize,
    register_err: AtomicUsize,
    unregister_ok: AtomicUsize,
    last_failure: Mutex<Option<SyncFailure>>,
}

impl RegistrationObserver for RecordingObserver {
    fn register_succeeded(&self) {
        self.register_ok.fetch_add(1, Ordering::SeqCst);
    }
    fn register_failed(&self, failure: &SyncFailure) {
        self.register_err.fetch_add(1, Ordering::SeqCst);
        *self.last_failure.lock().expect("lock poisoned") = Some(failure.clone());
    }
    fn unregister_succeeded(&self) {
        self.unregister_ok.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config(server_url: String) -> RuntimeConfig {
    let mut config = RuntimeConfig {
        server_url,
        app_key: "test-app-key".to_string(),
        app_secret: "test-app-secret".to_string(),
        ..RuntimeConfig::default()
    };
    // Keep retries fast so exhaustion tests stay well under a second
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.retry.max_attempts = 3;
    config
}

fn manager_for(config: &RuntimeConfig) -> PushManager {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = Arc::new(HttpTransport::new(config).expect("transport"));
    PushManager::new(config, transport, Arc::new(MemoryStore::default()))
}

/// Poll until the condition holds or the deadline passes.
async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within deadline");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_register_happy_path_sends_put_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/device_tokens/deadbeef"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&test_config(server.uri()));
    let observer = Arc::new(RecordingObserver::default());
    let handle: Arc<dyn RegistrationObserver> = observer.clone();
    manager.add_observer(&handle);

    manager.add_tags(["news", "sports"]);
    manager.set_alias(Some("alice".to_string()));
    manager.device_token_received(vec![0xde, 0xad, 0xbe, 0xef]);

    wait_until(|| observer.register_ok.load(Ordering::SeqCst) == 1).await;
    assert!(!manager.dirty());

    let requests = server.received_requests().await.expect("requests recorded");
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("json body");
    assert_eq!(body["alias"], "alice");
    assert_eq!(body["tags"], serde_json::json!(["news", "sports"]));
    assert!(body.get("badge").is_none(), "badge omitted without autobadge");
    assert!(body.get("quiettime").is_none(), "quiet time never configured");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_disabled_push_sends_delete() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/device_tokens/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&test_config(server.uri()));
    let observer = Arc::new(RecordingObserver::default());
    let handle: Arc<dyn RegistrationObserver> = observer.clone();
    manager.add_observer(&handle);

    manager.set_push_enabled(false);
    manager.device_token_received(vec![0x42]);

    wait_until(|| observer.unregister_ok.load(Ordering::SeqCst) == 1).await;

    let requests = server.received_requests().await.expect("requests recorded");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].body.is_empty(), "unregister carries no body");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_503_retries_to_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let manager = manager_for(&test_config(server.uri()));
    let observer = Arc::new(RecordingObserver::default());
    let handle: Arc<dyn RegistrationObserver> = observer.clone();
    manager.add_observer(&handle);

    manager.device_token_received(vec![0x01]);

    wait_until(|| observer.register_err.load(Ordering::SeqCst) == 1).await;

    let failure = observer
        .last_failure
        .lock()
        .expect("lock poisoned")
        .clone()
        .expect("failure recorded");
    assert!(matches!(
        failure,
        SyncFailure::RetriesExhausted { attempts: 3, .. }
    ));
    assert!(manager.dirty(), "failed sync leaves the state dirty");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_4xx_is_permanent_no_retry() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&test_config(server.uri()));
    let observer = Arc::new(RecordingObserver::default());
    let handle: Arc<dyn RegistrationObserver> = observer.clone();
    manager.add_observer(&handle);

    manager.device_token_received(vec![0x02]);

    wait_until(|| observer.register_err.load(Ordering::SeqCst) == 1).await;

    let failure = observer
        .last_failure
        .lock()
        .expect("lock poisoned")
        .clone()
        .expect("failure recorded");
    match failure {
        SyncFailure::ClientError { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad payload");
        }
        other => panic!("expected ClientError, got {other:?}"),
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_recovery_after_transient_failures() {
    let server = MockServer::start().await;
    // First two attempts fail with 500, third succeeds
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = manager_for(&test_config(server.uri()));
    let observer = Arc::new(RecordingObserver::default());
    let handle: Arc<dyn RegistrationObserver> = observer.clone();
    manager.add_observer(&handle);

    manager.device_token_received(vec![0x03]);

    wait_until(|| observer.register_ok.load(Ordering::SeqCst) == 1).await;
    assert_eq!(
        observer.register_err.load(Ordering::SeqCst),
        0,
        "intermediate retries must not reach observers"
    );
    assert!(!manager.dirty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_tags_gated_off_are_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&test_config(server.uri()));
    let observer = Arc::new(RecordingObserver::default());
    let handle: Arc<dyn RegistrationObserver> = observer.clone();
    manager.add_observer(&handle);

    manager.add_tags(["a", "b"]);
    manager.set_can_edit_tags_from_device(false);
    manager.device_token_received(vec![0x04]);

    wait_until(|| observer.register_ok.load(Ordering::SeqCst) == 1).await;

    let requests = server.received_requests().await.expect("requests recorded");
    let body: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("json body");
    assert!(body.get("tags").is_none(), "tags omitted when editing gated off");

    manager.shutdown().await;
}
