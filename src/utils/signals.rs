//! Interrupt callbacks
//!
//! Code owning a live child process registers a callback here; when the
//! orchestrator itself gets interrupted, every registered callback is
//! invoked with the signal so the children can be terminated.

use nix::sys::signal::Signal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Callback invoked on interruption
pub type InterruptCallback = Arc<dyn Fn(Signal) + Send + Sync>;

/// Token identifying a registered callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackToken(u64);

/// Registry of interrupt callbacks
#[derive(Default)]
pub struct InterruptRegistry {
    next_token: AtomicU64,
    callbacks: Mutex<BTreeMap<CallbackToken, InterruptCallback>>,
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> &'static InterruptRegistry {
        static REGISTRY: OnceLock<InterruptRegistry> = OnceLock::new();
        REGISTRY.get_or_init(InterruptRegistry::new)
    }

    /// Register a callback, returning the token needed to remove it
    pub fn add(&self, callback: InterruptCallback) -> CallbackToken {
        let token = CallbackToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(token, callback);
        token
    }

    /// Remove a previously registered callback
    pub fn remove(&self, token: CallbackToken) -> bool {
        self.lock().remove(&token).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke all registered callbacks with the given signal
    pub fn fire(&self, signal: Signal) {
        // Snapshot first: a callback may deregister itself.
        let callbacks: Vec<InterruptCallback> = self.lock().values().cloned().collect();

        debug!(
            "Delivering {} to {} interrupt callbacks",
            signal.as_str(),
            callbacks.len()
        );

        for callback in callbacks {
            callback(signal);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<CallbackToken, InterruptCallback>> {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_add_remove_callback() {
        let registry = InterruptRegistry::new();
        let token = registry.add(Arc::new(|_| {}));

        assert_eq!(registry.len(), 1);
        assert!(registry.remove(token));
        assert!(!registry.remove(token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fire_invokes_all_callbacks() {
        let registry = InterruptRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            registry.add(Arc::new(move |signal| {
                assert_eq!(signal, Signal::SIGTERM);
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        registry.fire(Signal::SIGTERM);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = InterruptRegistry::new();
        let first = registry.add(Arc::new(|_| {}));
        let second = registry.add(Arc::new(|_| {}));
        assert_ne!(first, second);
    }
}
