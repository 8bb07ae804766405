//! Listener registry for classified-error notifications.
//!
//! Listeners are invoked synchronously, one after another, each isolated from
//! the others: a listener that returns an error or panics is logged and
//! skipped, and never affects the remaining listeners or the caller.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;

use crate::error::{ClassificationResult, ClassifiedError};

/// Error returned by a listener that could not process a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener failed: {message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for listener callbacks.
pub type ListenerResult = Result<(), ListenerError>;

/// Receives every error handled by an `ErrorManager`.
///
/// Implementations that need to do async work should spawn it rather than
/// block: notification is fire-and-forget.
pub trait ErrorListener: Send + Sync {
    fn on_error(&self, error: &ClassifiedError, result: &ClassificationResult) -> ListenerResult;
}

/// Adapter turning a closure into an `ErrorListener`.
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: Fn(&ClassifiedError, &ClassificationResult) -> ListenerResult + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ErrorListener for FnListener<F>
where
    F: Fn(&ClassifiedError, &ClassificationResult) -> ListenerResult + Send + Sync,
{
    fn on_error(&self, error: &ClassifiedError, result: &ClassificationResult) -> ListenerResult {
        (self.0)(error, result)
    }
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ErrorListener>)>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Arc<dyn ErrorListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Delivers a notification to every listener. Returns how many succeeded.
    pub(crate) fn notify(&self, error: &ClassifiedError, result: &ClassificationResult) -> usize {
        // Snapshot so listeners may (un)register without deadlocking.
        let snapshot: Vec<(ListenerId, Arc<dyn ErrorListener>)> = self.lock().clone();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_error(error, result))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        listener = id.value(),
                        error_id = %error.error_id,
                        error = %e,
                        "Error listener failed"
                    );
                }
                Err(payload) => {
                    tracing::warn!(
                        listener = id.value(),
                        error_id = %error.error_id,
                        panic = %panic_message(payload.as_ref()),
                        "Error listener panicked"
                    );
                }
            }
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Arc<dyn ErrorListener>)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle returned by `ErrorManager::subscribe`.
///
/// Dropping the handle keeps the listener registered; call `unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
