//! State reconciliation with the remote registration service.
//!
//! This module is the heart of the crate: it decides what to send to the
//! registration API, sends it, classifies the outcome, and retries or
//! reports.
//!
//! # Architecture
//!
//! ```text
//! PushManager ──sync request──> RegistrationClient (spawned task)
//!                                   │
//!                                   │  snapshot       PushSettings
//!                                   │<───────────────(Arc<Mutex<_>>)
//!                                   │
//!                                   │  build           payload
//!                                   │  send            Transport
//!                                   │  classify        retry::RetryPolicy
//!                                   │
//!                                   └──outcome──> ObserverRegistry
//! ```
//!
//! Each cycle runs `Idle → Building → Sending → (Success | Retrying |
//! Failed) → Idle`. At most one cycle executes at a time; sync requests
//! arriving mid-cycle coalesce into a single follow-up cycle.

pub mod client;
pub mod payload;
pub mod retry;

pub use client::RegistrationClient;
pub use retry::RetryPolicy;
