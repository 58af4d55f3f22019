//! Pushsync - client-side push registration manager.
//!
//! This crate keeps a local model of a device's push configuration
//! (enablement, device token, tags, alias, quiet time, badge) and
//! reconciles it with a remote push-delivery service over its HTTP
//! registration API — asynchronously, with automatic retry on transient
//! failure, and with exactly-once outcome fan-out to observers.
//!
//! # Architecture
//!
//! The crate follows an explicit-owner pattern: the host application
//! constructs one [`PushManager`] per device and keeps it alive for the
//! process lifetime.
//!
//! - **PushManager** - public facade, owns state and the sync task
//! - **PushSettings** - authoritative configuration model + dirty tracking
//! - **RegistrationClient** - spawned task running the reconcile cycle
//! - **Transport** - HTTP seam (reqwest in production, fakes in tests)
//! - **SettingsStore** - persistence seam (JSON file in production)
//!
//! # Usage
//!
//! ```no_run
//! use pushsync::{PushManager, RuntimeConfig};
//!
//! # async fn example() -> pushsync::Result<()> {
//! let config = RuntimeConfig::load()?;
//! let manager = PushManager::with_defaults(&config)?;
//!
//! // Batch local edits, then sync once
//! manager.add_tag("news");
//! manager.set_alias(Some("user-42".to_string()));
//! manager.device_token_received(vec![0xde, 0xad, 0xbe, 0xef]);
//!
//! // ... later, on app teardown
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`manager`] - public operations and lifecycle
//! - [`settings`] - configuration model and snapshots
//! - [`registration`] - payload building, sync cycle, retry policy
//! - [`observer`] - outcome fan-out
//! - [`transport`] / [`persistence`] - collaborator seams
//! - [`config`] - runtime configuration loading/saving

// Library modules
pub mod config;
pub mod constants;
pub mod error;
pub mod manager;
pub mod observer;
pub mod persistence;
pub mod registration;
pub mod settings;
pub mod transport;

// Re-export commonly used types
pub use config::{RetryConfig, RuntimeConfig};
pub use error::{Error, Result, SyncFailure};
pub use manager::PushManager;
pub use observer::{ObserverRegistry, RegistrationObserver};
pub use persistence::{FileStore, MemoryStore, PersistedSettings, SettingsStore};
pub use registration::{RegistrationClient, RetryPolicy};
pub use settings::{NotificationTypes, PushSettings, QuietTime, SettingsSnapshot};
pub use transport::{HttpTransport, Operation, RequestSpec, Transport, TransportError, TransportResponse};
