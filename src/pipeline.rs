//! Wiring of manager, router and structured logger into one pipeline.
//!
//! `ErrorPipeline` is an explicit context object: build one at startup and
//! hand clones of its `Arc`s to whatever needs them. There are no globals.

use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use crate::config::PipelineConfig;
use crate::error::{ClassificationResult, ClassifiedError, Classifier, ErrorContext, RawError};
use crate::logging::{LogSink, StructuredLogger, TracingSink};
use crate::manager::{ErrorManager, FnListener, Subscription};
use crate::router::{DispatchRecord, ErrorRouter, LoggingHandler, RouterResult};

/// Outcome of reporting one failure through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub classification: ClassificationResult,
    pub dispatch: Vec<DispatchRecord>,
}

impl PipelineReport {
    pub fn error(&self) -> &ClassifiedError {
        &self.classification.error
    }

    /// Number of handlers that completed without error.
    pub fn successful_handlers(&self) -> usize {
        self.dispatch.iter().filter(|r| r.succeeded()).count()
    }
}

/// Classifier, manager, router and logger bundled together.
#[derive(Debug)]
pub struct ErrorPipeline {
    manager: Arc<ErrorManager>,
    router: Arc<ErrorRouter>,
    logger: Arc<StructuredLogger>,
    router_subscription: Mutex<Option<Subscription>>,
}

impl Default for ErrorPipeline {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl ErrorPipeline {
    pub fn new(
        manager: Arc<ErrorManager>,
        router: Arc<ErrorRouter>,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        Self {
            manager,
            router,
            logger,
            router_subscription: Mutex::new(None),
        }
    }

    /// Builds a pipeline whose structured records go to `tracing`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::from_config_with_sink(config, Arc::new(TracingSink))
    }

    /// Builds a pipeline writing structured records to `sink`.
    ///
    /// When called inside a tokio runtime and a flush interval is
    /// configured, the logger's flush timer is started.
    pub fn from_config_with_sink(config: &PipelineConfig, sink: Arc<dyn LogSink>) -> Self {
        let classifier = Classifier::new(config.classifier.clone());
        let manager = Arc::new(ErrorManager::new(classifier, config.manager.clone()));
        let logger = Arc::new(StructuredLogger::with_config(sink, &config.logger));
        logger.spawn_flush_timer();
        Self::new(manager, Arc::new(ErrorRouter::new()), logger)
    }

    pub fn manager(&self) -> &Arc<ErrorManager> {
        &self.manager
    }

    pub fn router(&self) -> &Arc<ErrorRouter> {
        &self.router
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }

    /// Registers a `LoggingHandler` over this pipeline's logger.
    pub fn register_logging_handler(&self) -> RouterResult<()> {
        self.router
            .register_handler(Arc::new(LoggingHandler::new(Arc::clone(&self.logger))))
    }

    /// Classifies and records a failure, then routes it and waits for every
    /// handler to finish.
    ///
    /// With the router attached, the listener routes the error as well, so
    /// use one path or the other.
    pub async fn report(
        &self,
        raw: impl Into<RawError>,
        context: Option<ErrorContext>,
    ) -> PipelineReport {
        let classification = self.manager.process(raw, context);
        let dispatch = self
            .router
            .route_error(
                &classification.error,
                &classification.error.context,
                Some(&classification),
            )
            .await;
        PipelineReport {
            classification,
            dispatch,
        }
    }

    /// Routes every error the manager handles from now on.
    ///
    /// Routing is spawned on the tokio runtime current at the time of the
    /// error; errors raised outside a runtime are recorded but not routed.
    /// Returns false if the router is already attached.
    pub fn attach_router(&self) -> bool {
        let mut subscription = self
            .router_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if subscription.is_some() {
            return false;
        }

        let router = Arc::clone(&self.router);
        let listener = FnListener::new(
            move |error: &ClassifiedError, result: &ClassificationResult| {
                let Ok(runtime) = Handle::try_current() else {
                    tracing::debug!(
                        error_id = %error.error_id,
                        "No tokio runtime; error not routed"
                    );
                    return Ok(());
                };
                let router = Arc::clone(&router);
                let result = result.clone();
                runtime.spawn(async move {
                    let error = &result.error;
                    router
                        .route_error(error, &error.context, Some(&result))
                        .await;
                });
                Ok(())
            },
        );
        *subscription = Some(self.manager.subscribe(Arc::new(listener)));
        true
    }

    /// Stops automatic routing. Returns false if it was not attached.
    pub fn detach_router(&self) -> bool {
        self.router_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(Subscription::unsubscribe)
            .unwrap_or(false)
    }

    pub fn is_router_attached(&self) -> bool {
        self.router_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Detaches the router, destroys the manager and flushes the logger.
    /// Safe to call repeatedly.
    pub fn destroy(&self) {
        self.detach_router();
        self.manager.destroy();
        self.logger.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorSeverity, ErrorType, HttpErrorShape};
    use crate::logging::{LoggerConfig, MemorySink};
    use crate::router::{HandlerOutcome, HandlerRegistration};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn memory_pipeline(config: &PipelineConfig) -> (Arc<MemorySink>, ErrorPipeline) {
        let sink = Arc::new(MemorySink::new());
        let pipeline = ErrorPipeline::from_config_with_sink(config, sink.clone());
        (sink, pipeline)
    }

    #[tokio::test]
    async fn test_report_routes_and_logs() {
        let (sink, pipeline) = memory_pipeline(&PipelineConfig::default());
        pipeline.register_logging_handler().unwrap();

        let report = pipeline
            .report(
                HttpErrorShape::new(500),
                Some(ErrorContext::new().with_component("Dashboard")),
            )
            .await;

        assert_eq!(report.error().error_type, ErrorType::Server);
        assert_eq!(report.dispatch.len(), 1);
        assert_eq!(report.successful_handlers(), 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].context["component"], "Dashboard");
        assert_eq!(pipeline.manager().get_stats().total_errors, 1);
        assert_eq!(pipeline.router().get_handler_stats()["logging"].attempts, 1);
    }

    #[tokio::test]
    async fn test_report_without_handlers() {
        let pipeline = ErrorPipeline::default();
        let report = pipeline.report("plain failure", None).await;
        assert!(report.dispatch.is_empty());
        assert_eq!(report.error().error_type, ErrorType::Unknown);
        assert!(report.classification.routing.is_some());
    }

    #[tokio::test]
    async fn test_attached_router_routes_handled_errors() {
        let pipeline = ErrorPipeline::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pipeline
            .router()
            .register(HandlerRegistration::new("severity-recorder", 1, move |error, _| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(error.severity);
                    Ok(HandlerOutcome::handled())
                }
            }))
            .unwrap();

        assert!(pipeline.attach_router());
        assert!(!pipeline.attach_router());

        pipeline
            .manager()
            .handle_error(HttpErrorShape::new(503), None);

        let severity = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(severity, ErrorSeverity::High);

        assert!(pipeline.detach_router());
        assert!(!pipeline.detach_router());
        assert_eq!(pipeline.manager().listener_count(), 0);
    }

    #[test]
    fn test_attached_router_outside_runtime_records_only() {
        let pipeline = ErrorPipeline::default();
        pipeline.register_logging_handler().unwrap();
        assert!(pipeline.attach_router());

        pipeline.manager().handle_error("offline batch job failed", None);
        assert_eq!(pipeline.manager().get_stats().total_errors, 1);
        assert_eq!(pipeline.router().get_handler_stats()["logging"].attempts, 0);
    }

    #[tokio::test]
    async fn test_destroy_flushes_logger_and_detaches() {
        let config = PipelineConfig {
            logger: LoggerConfig {
                batch_size: 50,
                ..LoggerConfig::default()
            },
            ..PipelineConfig::default()
        };
        let (sink, pipeline) = memory_pipeline(&config);
        pipeline.register_logging_handler().unwrap();

        pipeline.report("first", None).await;
        assert!(sink.is_empty());

        pipeline.destroy();
        pipeline.destroy();
        assert_eq!(sink.len(), 1);
        assert!(!pipeline.is_router_attached());
        assert!(pipeline.manager().is_destroyed());
    }
}
