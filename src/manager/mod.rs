//! Error manager: the process-wide entry point of the pipeline.
//!
//! The manager classifies raw failures, keeps a bounded most-recent-first
//! history and aggregate counters, and fans every classified error out to the
//! registered listeners. It is an explicit object: construct one and share it
//! (usually behind an `Arc`) with every consumer.

mod listener;

pub use listener::{
    ErrorListener, FnListener, ListenerError, ListenerId, ListenerResult, Subscription,
};

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{
    ClassificationResult, ClassifiedError, Classifier, ErrorContext, ErrorSeverity, ErrorType,
    RawError,
};
use listener::ListenerRegistry;

pub(crate) use listener::panic_message;

/// Default number of errors kept in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Error manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum number of errors kept in history.
    pub history_capacity: usize,
    /// Window used to detect repeated errors of the same type, in seconds.
    pub escalation_window_secs: u64,
    /// Repeats of one type inside the window that raise escalation by one.
    /// 0 disables frequency escalation. Repeats are counted from history, so
    /// a nonzero threshold must not exceed `history_capacity`.
    pub repeat_threshold: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            escalation_window_secs: 60,
            repeat_threshold: 5,
        }
    }
}

impl ManagerConfig {
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_repeat_threshold(mut self, threshold: usize) -> Self {
        self.repeat_threshold = threshold;
        self
    }

    pub fn with_escalation_window(mut self, window: Duration) -> Self {
        self.escalation_window_secs = window.as_secs();
        self
    }

    pub fn escalation_window(&self) -> Duration {
        Duration::from_secs(self.escalation_window_secs)
    }

    /// Checks that frequency escalation can actually trigger.
    pub fn validate(&self) -> Result<(), String> {
        if self.repeat_threshold > self.history_capacity {
            return Err(format!(
                "manager.repeat_threshold ({}) exceeds manager.history_capacity ({}); \
                 set it to 0 to disable frequency escalation",
                self.repeat_threshold, self.history_capacity
            ));
        }
        Ok(())
    }
}

/// Snapshot of the manager's aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total_errors: u64,
    pub errors_by_type: BTreeMap<ErrorType, u64>,
    pub errors_by_severity: BTreeMap<ErrorSeverity, u64>,
}

impl ErrorStats {
    fn record(&mut self, error: &ClassifiedError) {
        self.total_errors += 1;
        *self.errors_by_type.entry(error.error_type).or_insert(0) += 1;
        *self.errors_by_severity.entry(error.severity).or_insert(0) += 1;
    }

    pub fn count_for_type(&self, error_type: ErrorType) -> u64 {
        self.errors_by_type.get(&error_type).copied().unwrap_or(0)
    }

    pub fn count_for_severity(&self, severity: ErrorSeverity) -> u64 {
        self.errors_by_severity.get(&severity).copied().unwrap_or(0)
    }

    /// The type seen most often, if any errors were recorded.
    pub fn most_common_type(&self) -> Option<ErrorType> {
        self.errors_by_type
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(ty, _)| *ty)
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    history: VecDeque<ClassifiedError>,
    stats: ErrorStats,
}

/// Classifies, records and broadcasts errors.
pub struct ErrorManager {
    classifier: Classifier,
    config: ManagerConfig,
    state: Mutex<ManagerState>,
    listeners: Arc<ListenerRegistry>,
    reporter: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for ErrorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorManager")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Default for ErrorManager {
    fn default() -> Self {
        Self::new(Classifier::default(), ManagerConfig::default())
    }
}

impl ErrorManager {
    pub fn new(classifier: Classifier, config: ManagerConfig) -> Self {
        if let Err(reason) = config.validate() {
            tracing::warn!(%reason, "Frequency escalation will never trigger");
        }
        Self {
            classifier,
            config,
            state: Mutex::new(ManagerState::default()),
            listeners: Arc::new(ListenerRegistry::default()),
            reporter: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Classifies a failure, records it and notifies listeners.
    pub fn handle_error(
        &self,
        raw: impl Into<RawError>,
        context: Option<ErrorContext>,
    ) -> ClassifiedError {
        self.process(raw, context).error
    }

    /// Like `handle_error`, but returns the full classification.
    ///
    /// The routing metadata's escalation level includes the repeat-frequency
    /// bump computed from history.
    pub fn process(
        &self,
        raw: impl Into<RawError>,
        context: Option<ErrorContext>,
    ) -> ClassificationResult {
        let raw = raw.into();
        let mut result = self.classifier.classify_with_routing(&raw, context);

        let repeats = {
            let mut state = self.lock_state();
            state.history.push_front(result.error.clone());
            while state.history.len() > self.config.history_capacity {
                state.history.pop_back();
            }
            state.stats.record(&result.error);
            self.recent_repeats(&state.history, result.error.error_type)
        };

        if self.config.repeat_threshold > 0 && repeats >= self.config.repeat_threshold {
            if let Some(routing) = result.routing.as_mut() {
                routing.escalation_level += 1;
            }
            tracing::debug!(
                error_type = %result.error.error_type,
                repeats,
                "Escalating repeated error"
            );
        }

        self.listeners.notify(&result.error, &result);
        result
    }

    /// Errors of `error_type` in history inside the escalation window.
    fn recent_repeats(&self, history: &VecDeque<ClassifiedError>, error_type: ErrorType) -> usize {
        let window = chrono::Duration::from_std(self.config.escalation_window())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - window;
        history
            .iter()
            .take_while(|e| e.timestamp >= cutoff)
            .filter(|e| e.error_type == error_type)
            .count()
    }

    /// Snapshot of the aggregate counters.
    pub fn get_stats(&self) -> ErrorStats {
        self.lock_state().stats.clone()
    }

    /// Up to `n` errors, most recent first.
    pub fn get_recent_errors(&self, n: usize) -> Vec<ClassifiedError> {
        self.lock_state().history.iter().take(n).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock_state().history.len()
    }

    /// Empties history. Counters are kept.
    pub fn clear_history(&self) {
        self.lock_state().history.clear();
    }

    pub fn add_error_listener(&self, listener: Arc<dyn ErrorListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Registers a closure as a listener.
    pub fn add_listener_fn<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ClassifiedError, &ClassificationResult) -> ListenerResult + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(FnListener::new(f)))
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Registers a listener and returns a handle that can unsubscribe it.
    pub fn subscribe(&self, listener: Arc<dyn ErrorListener>) -> Subscription {
        let id = self.listeners.add(listener);
        Subscription::new(id, &self.listeners)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Periodically logs a stats snapshot on the current tokio runtime.
    ///
    /// Returns false if no runtime is available, a reporter is already
    /// running, or the manager was destroyed.
    pub fn start_stats_reporter(self: &Arc<Self>, interval: Duration) -> bool {
        if self.is_destroyed() || interval.is_zero() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        let mut reporter = self.reporter.lock().unwrap_or_else(|e| e.into_inner());
        if reporter.is_some() {
            return false;
        }

        let manager: Weak<Self> = Arc::downgrade(self);
        *reporter = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let stats = manager.get_stats();
                tracing::info!(
                    total_errors = stats.total_errors,
                    most_common = ?stats.most_common_type(),
                    high = stats.count_for_severity(ErrorSeverity::High),
                    critical = stats.count_for_severity(ErrorSeverity::Critical),
                    "Error stats"
                );
            }
        }));
        true
    }

    pub fn has_stats_reporter(&self) -> bool {
        self.reporter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Clears listeners and stops background tasks. Safe to call repeatedly.
    ///
    /// The manager keeps classifying and recording afterwards.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Destroying error manager");
        }
        self.listeners.clear();
        if let Some(task) = self
            .reporter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ErrorManager {
    fn drop(&mut self) {
        if let Some(task) = self
            .reporter
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenericError, HttpErrorShape};
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(manager: &ErrorManager) -> (ListenerId, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let id = manager.add_listener_fn(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (id, counter)
    }

    #[test]
    fn test_config_validate_threshold_against_capacity() {
        assert!(ManagerConfig::default().validate().is_ok());
        assert!(ManagerConfig::default()
            .with_history_capacity(2)
            .with_repeat_threshold(0)
            .validate()
            .is_ok());
        assert!(ManagerConfig::default()
            .with_history_capacity(5)
            .with_repeat_threshold(5)
            .validate()
            .is_ok());

        let err = ManagerConfig::default()
            .with_history_capacity(2)
            .with_repeat_threshold(5)
            .validate()
            .unwrap_err();
        assert!(err.contains("repeat_threshold (5)"));
        assert!(err.contains("history_capacity (2)"));
    }

    #[test]
    fn test_stats_and_recent_errors() {
        let manager = ErrorManager::default();
        manager.handle_error(GenericError::new("first failure"), None);
        manager.handle_error(GenericError::new("second failure"), None);

        let stats = manager.get_stats();
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.count_for_type(ErrorType::Unknown), 2);
        assert_eq!(stats.count_for_severity(ErrorSeverity::Medium), 2);

        let recent = manager.get_recent_errors(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "second failure");

        let all = manager.get_recent_errors(10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].message, "first failure");
    }

    #[test]
    fn test_history_evicts_oldest() {
        let manager = ErrorManager::new(
            Classifier::default(),
            ManagerConfig::default().with_history_capacity(3),
        );
        for i in 0..5 {
            manager.handle_error(GenericError::new(format!("error {}", i)), None);
        }
        assert_eq!(manager.history_len(), 3);
        let messages: Vec<String> = manager
            .get_recent_errors(10)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["error 4", "error 3", "error 2"]);
        assert_eq!(manager.get_stats().total_errors, 5);
    }

    #[test]
    fn test_listeners_receive_errors() {
        let manager = ErrorManager::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        manager.add_listener_fn(move |error, result| {
            assert_eq!(error.error_id, result.error.error_id);
            s.lock().unwrap().push(error.error_type);
            Ok(())
        });

        manager.handle_error(HttpErrorShape::new(401), None);
        manager.handle_error(HttpErrorShape::new(503), None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ErrorType::Authentication, ErrorType::Server]
        );
    }

    #[test]
    fn test_remove_listener_stops_notifications() {
        let manager = ErrorManager::default();
        let (id, counter) = counting_listener(&manager);

        manager.handle_error("one", None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(manager.remove_error_listener(id));
        manager.handle_error("two", None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!manager.remove_error_listener(id));
    }

    #[test]
    fn test_subscription_handle() {
        let manager = ErrorManager::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let subscription = manager.subscribe(Arc::new(FnListener::new(
            move |_: &ClassifiedError, _: &ClassificationResult| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )));

        manager.handle_error("one", None);
        assert!(subscription.unsubscribe());
        manager.handle_error("two", None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(manager.listener_count(), 0);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let manager = ErrorManager::default();
        manager.add_listener_fn(|_, _| Err(ListenerError::new("sink offline")));
        manager.add_listener_fn(|_, _| panic!("listener bug"));
        let (_, counter) = counting_listener(&manager);

        let error = manager.handle_error(HttpErrorShape::new(500), None);
        assert_eq!(error.error_type, ErrorType::Server);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_query_manager() {
        let manager = Arc::new(ErrorManager::default());
        let weak = Arc::downgrade(&manager);
        let totals = Arc::new(Mutex::new(Vec::new()));
        let t = Arc::clone(&totals);
        manager.add_listener_fn(move |_, _| {
            if let Some(m) = weak.upgrade() {
                t.lock().unwrap().push(m.get_stats().total_errors);
            }
            Ok(())
        });

        manager.handle_error("a", None);
        manager.handle_error("b", None);
        assert_eq!(*totals.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_repeat_escalation() {
        let manager = ErrorManager::new(
            Classifier::default(),
            ManagerConfig::default().with_repeat_threshold(3),
        );

        let levels: Vec<u32> = (0..4)
            .map(|_| {
                manager
                    .process(HttpErrorShape::new(500), None)
                    .routing
                    .expect("routing metadata")
                    .escalation_level
            })
            .collect();
        assert_eq!(levels, vec![2, 2, 3, 3]);

        let other = manager.process(HttpErrorShape::new(403), None);
        assert_eq!(other.routing.unwrap().escalation_level, 1);
    }

    #[test]
    fn test_repeat_escalation_disabled() {
        let manager = ErrorManager::new(
            Classifier::default(),
            ManagerConfig::default().with_repeat_threshold(0),
        );
        for _ in 0..10 {
            let result = manager.process(HttpErrorShape::new(500), None);
            assert_eq!(result.routing.unwrap().escalation_level, 2);
        }
    }

    #[test]
    fn test_destroy_is_idempotent_and_clears_listeners() {
        let manager = ErrorManager::default();
        let (_, counter) = counting_listener(&manager);

        manager.destroy();
        manager.destroy();
        assert!(manager.is_destroyed());
        assert_eq!(manager.listener_count(), 0);

        manager.handle_error("after destroy", None);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(manager.get_stats().total_errors, 1);
    }

    #[test]
    fn test_clear_history_keeps_stats() {
        let manager = ErrorManager::default();
        manager.handle_error("x", None);
        manager.clear_history();
        assert!(manager.get_recent_errors(5).is_empty());
        assert_eq!(manager.get_stats().total_errors, 1);
    }

    #[test]
    fn test_stats_serialize_with_wire_names() {
        let manager = ErrorManager::default();
        manager.handle_error(HttpErrorShape::new(429), None);
        let json = serde_json::to_value(manager.get_stats()).unwrap();
        assert_eq!(json["totalErrors"], 1);
        assert_eq!(json["errorsByType"]["RATE_LIMIT"], 1);
        assert_eq!(json["errorsBySeverity"]["MEDIUM"], 1);
    }

    #[test]
    fn test_stats_reporter_needs_runtime() {
        let manager = Arc::new(ErrorManager::default());
        assert!(!manager.start_stats_reporter(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_stats_reporter_lifecycle() {
        let manager = Arc::new(ErrorManager::default());
        assert!(manager.start_stats_reporter(Duration::from_millis(10)));
        assert!(!manager.start_stats_reporter(Duration::from_millis(10)));
        assert!(manager.has_stats_reporter());

        manager.destroy();
        assert!(!manager.has_stats_reporter());
        assert!(!manager.start_stats_reporter(Duration::from_millis(10)));
    }
}
