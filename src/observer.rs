//! Observer fan-out for registration outcomes.
//!
//! Observers are held as `Weak` handles: the registry never keeps an
//! observer alive past its owner's lifetime, so host code can drop an
//! observer without unregistering first. Delivery order is insertion
//! order, and each completed cycle (success or terminal failure) is
//! delivered exactly once — intermediate retries are invisible here.

use std::sync::{Arc, Weak};

use crate::error::SyncFailure;
use crate::transport::Operation;

/// Callbacks for registration outcomes.
///
/// All methods have empty default bodies, so an observer implements only
/// the events it cares about; the rest are skipped silently.
pub trait RegistrationObserver: Send + Sync {
    /// The device's registration was accepted by the service.
    fn register_succeeded(&self) {}

    /// The device's registration terminally failed.
    fn register_failed(&self, _failure: &SyncFailure) {}

    /// The device's unregistration was accepted by the service.
    fn unregister_succeeded(&self) {}

    /// The device's unregistration terminally failed.
    fn unregister_failed(&self, _failure: &SyncFailure) {}
}

/// Registry of non-owning observer handles.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Weak<dyn RegistrationObserver>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ObserverRegistry {
    /// Add an observer. The registry stores a weak handle; the caller keeps
    /// ownership. Re-adding the same observer is a no-op.
    pub fn add(&mut self, observer: &Arc<dyn RegistrationObserver>) {
        if self
            .observers
            .iter()
            .any(|existing| std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(observer)))
        {
            return;
        }
        self.observers.push(Arc::downgrade(observer));
    }

    /// Remove an observer by identity. Unknown observers are ignored.
    pub fn remove(&mut self, observer: &Arc<dyn RegistrationObserver>) {
        self.observers
            .retain(|existing| !std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(observer)));
    }

    /// Number of live observers.
    pub fn len(&self) -> usize {
        self.observers
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    /// Whether no live observers remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upgrade all handles, pruning dead ones. Returns strong references
    /// in insertion order.
    ///
    /// Dispatch happens on the returned list, outside any lock guarding
    /// the registry, so an observer callback may re-enter the registry
    /// (add/remove) without deadlocking.
    pub fn live_handles(&mut self) -> Vec<Arc<dyn RegistrationObserver>> {
        let mut live = Vec::with_capacity(self.observers.len());
        self.observers.retain(|weak| match weak.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }

    /// Route a completed cycle's outcome to the matching callback on every
    /// handle, in order.
    pub fn dispatch(
        handles: &[Arc<dyn RegistrationObserver>],
        operation: Operation,
        outcome: &Result<(), SyncFailure>,
    ) {
        for observer in handles {
            match (operation, outcome) {
                (Operation::Register, Ok(())) => observer.register_succeeded(),
                (Operation::Register, Err(failure)) => observer.register_failed(failure),
                (Operation::Unregister, Ok(())) => observer.unregister_succeeded(),
                (Operation::Unregister, Err(failure)) => observer.unregister_failed(failure),
            }
        }
    }

    /// Deliver a completed cycle's outcome to every live observer in
    /// insertion order. Dead handles are pruned as a side effect.
    pub fn notify(&mut self, operation: Operation, outcome: &Result<(), SyncFailure>) {
        let handles = self.live_handles();
        Self::dispatch(&handles, operation, outcome);
    }
}
