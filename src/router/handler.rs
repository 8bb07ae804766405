//! Handler trait and closure-based handler registrations.

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ClassifiedError, ErrorContext};

/// What a handler did with an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    /// True when the handler acted on the error.
    pub handled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HandlerOutcome {
    pub fn handled() -> Self {
        Self {
            handled: true,
            message: None,
        }
    }

    /// The handler ran but chose not to act.
    pub fn declined() -> Self {
        Self {
            handled: false,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Failure of a single handler invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Result type for handler invocations.
pub type HandlerResult = Result<HandlerOutcome, HandlerError>;

/// A named, prioritized unit that reacts to classified errors.
///
/// Handlers with a higher `priority` run earlier. Timeouts and cancellation
/// are the handler's own business; the router awaits `handle` to completion.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Unique name, used for statistics.
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    /// Whether this handler wants the error. Not counted as an attempt.
    fn can_handle(&self, error: &ClassifiedError) -> bool;

    async fn handle(&self, error: &ClassifiedError, context: &ErrorContext) -> HandlerResult;
}

type CanHandleFn = Box<dyn Fn(&ClassifiedError) -> bool + Send + Sync>;
type HandleFn =
    Box<dyn Fn(ClassifiedError, ErrorContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handler assembled from closures.
///
/// ```
/// use faultroute::router::{HandlerOutcome, HandlerRegistration};
///
/// let registration = HandlerRegistration::new("notifier", 10, |_error, _context| async {
///     Ok(HandlerOutcome::handled())
/// })
/// .with_can_handle(|error| error.retryable);
/// ```
pub struct HandlerRegistration {
    name: String,
    priority: i32,
    can_handle: CanHandleFn,
    handle: HandleFn,
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl HandlerRegistration {
    /// Creates a registration that accepts every error.
    pub fn new<F, Fut>(name: impl Into<String>, priority: i32, handle: F) -> Self
    where
        F: Fn(ClassifiedError, ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            can_handle: Box::new(|_| true),
            handle: Box::new(move |error, context| handle(error, context).boxed()),
        }
    }

    pub fn with_can_handle<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ClassifiedError) -> bool + Send + Sync + 'static,
    {
        self.can_handle = Box::new(predicate);
        self
    }
}

#[async_trait]
impl ErrorHandler for HandlerRegistration {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle(&self, error: &ClassifiedError) -> bool {
        (self.can_handle)(error)
    }

    async fn handle(&self, error: &ClassifiedError, context: &ErrorContext) -> HandlerResult {
        (self.handle)(error.clone(), context.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorSeverity, ErrorType};

    fn sample(retryable: bool) -> ClassifiedError {
        ClassifiedError::new(ErrorType::Network, ErrorSeverity::Medium, "m", "u")
            .with_retryable(retryable)
    }

    #[tokio::test]
    async fn test_registration_invokes_closure() {
        let registration = HandlerRegistration::new("h", 5, |error, _context| async move {
            Ok(HandlerOutcome::handled().with_message(error.message))
        });

        assert_eq!(registration.name(), "h");
        assert_eq!(registration.priority(), 5);
        assert!(registration.can_handle(&sample(false)));

        let outcome = registration
            .handle(&sample(false), &ErrorContext::default())
            .await
            .unwrap();
        assert!(outcome.handled);
        assert_eq!(outcome.message.as_deref(), Some("m"));
    }

    #[test]
    fn test_registration_predicate() {
        let registration = HandlerRegistration::new("retry", 0, |_, _| async {
            Ok(HandlerOutcome::declined())
        })
        .with_can_handle(|error| error.retryable);

        assert!(registration.can_handle(&sample(true)));
        assert!(!registration.can_handle(&sample(false)));
    }

    #[test]
    fn test_declined_outcome() {
        let registration = HandlerRegistration::new("quiet", 0, |_, _| async {
            Ok(HandlerOutcome::declined().with_message("deduplicated"))
        });
        let outcome =
            tokio_test::block_on(registration.handle(&sample(true), &ErrorContext::default()))
                .unwrap();
        assert!(!outcome.handled);
        assert_eq!(outcome.message.as_deref(), Some("deduplicated"));
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(
            HandlerError::failed("toast queue full").to_string(),
            "handler failed: toast queue full"
        );
        assert_eq!(
            HandlerError::Panicked("oops".to_string()).to_string(),
            "handler panicked: oops"
        );
    }
}
