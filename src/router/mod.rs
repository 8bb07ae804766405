//! Priority-ordered dispatch of classified errors to handlers.
//!
//! Handlers are kept sorted by priority, highest first, with ties in
//! registration order. `route_error` walks that list sequentially and awaits
//! every eligible handler in turn; it never stops at the first success, so
//! every handler that wants an error sees it. Per-handler attempt and success
//! counters are updated after each invocation.

mod handler;
mod logging_handler;

pub use handler::{ErrorHandler, HandlerError, HandlerOutcome, HandlerRegistration, HandlerResult};
pub use logging_handler::LoggingHandler;

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ClassificationResult, ClassifiedError, ErrorContext};
use crate::manager::panic_message;

/// Errors raised when registering handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Handler names must be non-blank.
    #[error("handler name must not be empty")]
    EmptyName,

    /// Another handler already uses this name.
    #[error("handler '{0}' is already registered")]
    DuplicateHandler(String),
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Outcome statistics for one handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerStats {
    pub attempts: u64,
    pub successes: u64,
    /// Percentage of attempts that succeeded; 0 when there were none.
    pub success_rate: f64,
}

impl HandlerStats {
    fn from_counts(counts: &Counts) -> Self {
        let success_rate = if counts.attempts == 0 {
            0.0
        } else {
            counts.successes as f64 / counts.attempts as f64 * 100.0
        };
        Self {
            attempts: counts.attempts,
            successes: counts.successes,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    attempts: u64,
    successes: u64,
}

/// Result of invoking one handler during `route_error`.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub handler: String,
    pub result: HandlerResult,
}

impl DispatchRecord {
    /// The handler completed without error.
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// The handler completed and reported acting on the error.
    pub fn handled(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.handled)
    }
}

struct RegisteredHandler {
    name: String,
    priority: i32,
    handler: Arc<dyn ErrorHandler>,
}

/// Registry and dispatcher for error handlers.
#[derive(Default)]
pub struct ErrorRouter {
    handlers: Mutex<Vec<RegisteredHandler>>,
    stats: Mutex<HashMap<String, Counts>>,
}

impl std::fmt::Debug for ErrorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRouter")
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl ErrorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler in priority order.
    ///
    /// Rejects blank names and names that are already registered.
    pub fn register_handler(&self, handler: Arc<dyn ErrorHandler>) -> RouterResult<()> {
        let name = handler.name().trim().to_string();
        if name.is_empty() {
            return Err(RouterError::EmptyName);
        }
        let priority = handler.priority();

        {
            let mut handlers = self.lock_handlers();
            if handlers.iter().any(|h| h.name == name) {
                return Err(RouterError::DuplicateHandler(name));
            }
            // After every handler with priority >= ours keeps ties stable.
            let position = handlers
                .iter()
                .position(|h| h.priority < priority)
                .unwrap_or(handlers.len());
            handlers.insert(
                position,
                RegisteredHandler {
                    name: name.clone(),
                    priority,
                    handler,
                },
            );
        }
        self.lock_stats().entry(name.clone()).or_default();

        tracing::debug!(handler = %name, priority, "Registered error handler");
        Ok(())
    }

    /// Convenience for closure-based registrations.
    pub fn register(&self, registration: HandlerRegistration) -> RouterResult<()> {
        self.register_handler(Arc::new(registration))
    }

    /// Removes a handler and its statistics.
    pub fn unregister_handler(&self, name: &str) -> bool {
        let removed = {
            let mut handlers = self.lock_handlers();
            let before = handlers.len();
            handlers.retain(|h| h.name != name);
            handlers.len() != before
        };
        if removed {
            self.lock_stats().remove(name);
        }
        removed
    }

    /// Handler names in dispatch order.
    pub fn handler_names(&self) -> Vec<String> {
        self.lock_handlers().iter().map(|h| h.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock_handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatches an error to every eligible handler, in priority order.
    ///
    /// Handlers run one at a time. A handler that fails or panics is counted
    /// as a failed attempt and does not stop the remaining handlers. Handlers
    /// that decline via `can_handle` are neither invoked nor counted.
    pub async fn route_error(
        &self,
        error: &ClassifiedError,
        context: &ErrorContext,
        classification: Option<&ClassificationResult>,
    ) -> Vec<DispatchRecord> {
        let snapshot: Vec<(String, Arc<dyn ErrorHandler>)> = self
            .lock_handlers()
            .iter()
            .map(|h| (h.name.clone(), Arc::clone(&h.handler)))
            .collect();

        if let Some(routing) = classification.and_then(|c| c.routing.as_ref()) {
            tracing::debug!(
                error_id = %error.error_id,
                routing_priority = routing.routing_priority,
                escalation_level = routing.escalation_level,
                handlers = snapshot.len(),
                "Routing error"
            );
        }

        let mut records = Vec::new();
        for (name, handler) in snapshot {
            let eligible = match panic::catch_unwind(AssertUnwindSafe(|| handler.can_handle(error)))
            {
                Ok(eligible) => eligible,
                Err(payload) => {
                    tracing::warn!(
                        handler = %name,
                        panic = %panic_message(payload.as_ref()),
                        "Handler eligibility check panicked; skipping"
                    );
                    false
                }
            };
            if !eligible {
                continue;
            }

            let result = match AssertUnwindSafe(handler.handle(error, context))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
            };

            self.record_attempt(&name, result.is_ok());
            if let Err(e) = &result {
                tracing::warn!(
                    handler = %name,
                    error_id = %error.error_id,
                    error = %e,
                    "Error handler failed"
                );
            }
            records.push(DispatchRecord {
                handler: name,
                result,
            });
        }
        records
    }

    fn record_attempt(&self, name: &str, success: bool) {
        let mut stats = self.lock_stats();
        // Unregistered while this dispatch was in flight.
        let Some(counts) = stats.get_mut(name) else {
            return;
        };
        counts.attempts += 1;
        if success {
            counts.successes += 1;
        }
    }

    /// Statistics for every registered handler, keyed by name.
    pub fn get_handler_stats(&self) -> BTreeMap<String, HandlerStats> {
        self.lock_stats()
            .iter()
            .map(|(name, counts)| (name.clone(), HandlerStats::from_counts(counts)))
            .collect()
    }

    /// Zeroes every handler's counters.
    pub fn reset_stats(&self) {
        for counts in self.lock_stats().values_mut() {
            *counts = Counts::default();
        }
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Vec<RegisteredHandler>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stats(&self) -> MutexGuard<'_, HashMap<String, Counts>> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}
