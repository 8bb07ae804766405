use std::sync::Arc;

use async_trait::async_trait;

use super::handler::{ErrorHandler, HandlerOutcome, HandlerResult};
use crate::error::{ClassifiedError, ErrorContext, ErrorSeverity};
use crate::logging::StructuredLogger;

/// Default priority of the logging handler. Runs after higher-priority
/// recovery and notification handlers.
pub const LOGGING_HANDLER_PRIORITY: i32 = 0;

/// Handler that writes every routed error to a `StructuredLogger`.
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    logger: Arc<StructuredLogger>,
    priority: i32,
    min_severity: ErrorSeverity,
}

impl LoggingHandler {
    pub const NAME: &'static str = "logging";

    pub fn new(logger: Arc<StructuredLogger>) -> Self {
        Self {
            logger,
            priority: LOGGING_HANDLER_PRIORITY,
            min_severity: ErrorSeverity::Low,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Only log errors at or above `severity`.
    pub fn with_min_severity(mut self, severity: ErrorSeverity) -> Self {
        self.min_severity = severity;
        self
    }
}

#[async_trait]
impl ErrorHandler for LoggingHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle(&self, error: &ClassifiedError) -> bool {
        error.severity >= self.min_severity
    }

    async fn handle(&self, error: &ClassifiedError, context: &ErrorContext) -> HandlerResult {
        let extra = (context != &error.context).then(|| context.to_value());
        self.logger.log_error(error, extra.as_ref());
        Ok(HandlerOutcome::handled())
    }
}
