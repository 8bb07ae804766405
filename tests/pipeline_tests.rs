//! End-to-end tests for classification, management, routing and logging.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use faultroute::error::{
    AppErrorKind, AppErrorShape, ClassifiedError, Classifier, ErrorActionType, ErrorContext,
    ErrorSeverity, ErrorType, HandlerSuggestion, NetworkErrorShape, RawError,
};
use faultroute::logging::{LoggerConfig, MemorySink, StructuredLogger, DEFAULT_REDACTION_MARKER};
use faultroute::manager::{ErrorManager, ManagerConfig};
use faultroute::pipeline::ErrorPipeline;
use faultroute::router::{ErrorRouter, HandlerError, HandlerOutcome, HandlerRegistration};
use faultroute::PipelineConfig;

fn classify(value: serde_json::Value) -> faultroute::ClassificationResult {
    Classifier::default().classify_value(&value, None)
}

// ============================================================================
// Classifier
// ============================================================================

#[test]
fn test_unauthorized_is_not_reported_but_notifies() {
    let result = classify(json!({ "response": { "status": 401 } }));
    assert_eq!(result.error.error_type, ErrorType::Authentication);
    assert_eq!(result.error.severity, ErrorSeverity::High);
    assert!(!result.error.retryable);
    assert!(!result.should_report);
    assert!(result.should_notify_user);
    assert!(result.has_action(ErrorActionType::Login));
}

#[test]
fn test_rate_limit_retry_after() {
    let result = classify(json!({
        "response": { "status": 429, "headers": { "retry-after": "60" } }
    }));
    assert_eq!(result.error.error_type, ErrorType::RateLimit);
    assert!(result.error.retryable);
    assert_eq!(result.error.retry_after_ms(), Some(60_000));
    assert!(result.error.user_message.contains("60 seconds"));
}

#[test]
fn test_server_error_is_reported() {
    let result = classify(json!({ "response": { "status": 500 } }));
    assert_eq!(result.error.error_type, ErrorType::Server);
    assert_eq!(result.error.severity, ErrorSeverity::High);
    assert!(result.error.retryable);
    assert!(result.should_report);
    assert!(result.has_action(ErrorActionType::Refresh));
    assert!(result.has_action(ErrorActionType::ContactSupport));
}

#[test]
fn test_repeated_classification_is_deterministic_except_id() {
    let inputs = vec![
        json!({ "response": { "status": 403 } }),
        json!({ "response": { "status": 422, "data": { "errors": { "email": "invalid" } } } }),
        json!({ "code": "ECONNABORTED", "message": "timeout of 5000ms exceeded" }),
        json!({ "name": "DriveError", "message": "Insufficient permission", "code": 403 }),
        json!("something odd"),
        json!(null),
    ];
    let classifier = Classifier::default();
    let context = ErrorContext::new().with_component("Upload");

    for input in inputs {
        let a = classifier.classify_value(&input, Some(context.clone()));
        let b = classifier.classify_value(&input, Some(context.clone()));
        assert_ne!(a.error.error_id, b.error.error_id, "input: {input}");
        assert_eq!(a.error.error_type, b.error.error_type);
        assert_eq!(a.error.severity, b.error.severity);
        assert_eq!(a.error.retryable, b.error.retryable);
        assert_eq!(a.error.user_message, b.error.user_message);
    }
}

#[test]
fn test_every_classification_has_exactly_one_dismiss() {
    let raws: Vec<RawError> = vec![
        json!({ "response": { "status": 401 } }).into(),
        json!({ "response": { "status": 503 } }).into(),
        json!({ "response": { "status": 404 } }).into(),
        NetworkErrorShape::new("socket hang up").with_request().into(),
        AppErrorShape::new(AppErrorKind::FileProcessing, "Unsupported format").into(),
        AppErrorShape::new(AppErrorKind::Analysis, "Model overloaded")
            .with_severity(ErrorSeverity::Critical)
            .into(),
        "plain".into(),
    ];
    let classifier = Classifier::default();
    for raw in &raws {
        let result = classifier.classify(raw, None);
        let dismiss = result
            .actions
            .iter()
            .filter(|a| a.action_type == ErrorActionType::Dismiss)
            .count();
        assert_eq!(dismiss, 1, "{:?}", result.error.error_type);
        assert!(!result.error.user_message.is_empty());
    }
}

#[test]
fn test_routing_metadata_monotonic_in_severity() {
    let classifier = Classifier::default();
    let mut previous: Option<(u32, u32)> = None;
    for severity in ErrorSeverity::ALL {
        let raw: RawError = AppErrorShape::new(AppErrorKind::Analysis, "x")
            .with_severity(severity)
            .into();
        let routing = classifier
            .classify_with_routing(&raw, None)
            .routing
            .expect("routing metadata");
        assert!(routing.routing_priority > 0);
        assert!(routing.handler_suggestions.contains(&HandlerSuggestion::Logging));
        if let Some((priority, escalation)) = previous {
            assert!(routing.routing_priority > priority);
            assert!(routing.escalation_level > escalation);
        }
        previous = Some((routing.routing_priority, routing.escalation_level));
    }
}

#[test]
fn test_application_user_message_passes_through() {
    let result = classify(json!({
        "name": "FileProcessingError",
        "message": "zip entry corrupted",
        "userMessage": "This archive looks damaged. Please re-export it."
    }));
    assert_eq!(result.error.error_type, ErrorType::FileProcessingError);
    assert_eq!(
        result.error.user_message,
        "This archive looks damaged. Please re-export it."
    );
    assert!(!result.error.retryable);
}

// ============================================================================
// ErrorManager
// ============================================================================

#[test]
fn test_manager_stats_and_recent_errors() {
    let manager = ErrorManager::default();
    manager.handle_error("first failure", None);
    manager.handle_error("second failure", None);

    assert_eq!(manager.get_stats().total_errors, 2);
    assert_eq!(manager.get_recent_errors(1)[0].message, "second failure");
}

#[test]
fn test_removed_listener_is_not_notified() {
    let manager = ErrorManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let id = manager.add_listener_fn(move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    manager.handle_error("one", None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(manager.remove_error_listener(id));
    manager.handle_error("two", None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_independent_managers_do_not_share_state() {
    let a = ErrorManager::default();
    let b = ErrorManager::new(
        Classifier::default(),
        ManagerConfig::default().with_history_capacity(1),
    );
    a.handle_error("a", None);
    b.handle_error("b1", None);
    b.handle_error("b2", None);

    assert_eq!(a.get_stats().total_errors, 1);
    assert_eq!(b.get_stats().total_errors, 2);
    assert_eq!(b.history_len(), 1);
}

// ============================================================================
// ErrorRouter
// ============================================================================

#[tokio::test]
async fn test_router_single_handler_stats() {
    let router = ErrorRouter::new();
    router
        .register(HandlerRegistration::new("h1", 10, |_, _| async {
            Ok(HandlerOutcome::handled())
        }))
        .unwrap();

    let result = classify(json!({ "response": { "status": 500 } }));
    router
        .route_error(&result.error, &result.error.context, Some(&result))
        .await;

    let stats = router.get_handler_stats()["h1"];
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.success_rate, 100.0);
}

#[tokio::test]
async fn test_router_skips_declining_handler() {
    let router = ErrorRouter::new();
    let invoked = Arc::new(AtomicUsize::new(0));
    let i = Arc::clone(&invoked);
    router
        .register(
            HandlerRegistration::new("never", 10, move |_, _| {
                i.fetch_add(1, Ordering::SeqCst);
                async { Ok(HandlerOutcome::handled()) }
            })
            .with_can_handle(|_| false),
        )
        .unwrap();

    let result = classify(json!({ "response": { "status": 500 } }));
    router
        .route_error(&result.error, &result.error.context, None)
        .await;

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(router.get_handler_stats()["never"].attempts, 0);
}

#[tokio::test]
async fn test_router_routes_by_suggestion() {
    let router = ErrorRouter::new();
    let recovered = Arc::new(std::sync::Mutex::new(HashSet::new()));
    let r = Arc::clone(&recovered);
    router
        .register(
            HandlerRegistration::new("recovery", 20, move |error: ClassifiedError, _| {
                r.lock().unwrap().insert(error.error_type);
                async { Ok(HandlerOutcome::handled()) }
            })
            .with_can_handle(|error| error.retryable),
        )
        .unwrap();
    router
        .register(HandlerRegistration::new("reporter", 5, |_, _| async {
            Err(HandlerError::failed("telemetry backend unavailable"))
        }))
        .unwrap();

    let classifier = Classifier::default();
    for value in [
        json!({ "response": { "status": 503 } }),
        json!({ "response": { "status": 422 } }),
        json!({ "code": "ETIMEDOUT", "message": "connect ETIMEDOUT" }),
    ] {
        let result = classifier.classify_value(&value, None);
        let records = router
            .route_error(&result.error, &result.error.context, Some(&result))
            .await;
        assert!(records.iter().any(|r| r.handler == "reporter" && !r.succeeded()));
    }

    let recovered = recovered.lock().unwrap();
    assert!(recovered.contains(&ErrorType::Server));
    assert!(recovered.contains(&ErrorType::Timeout));
    assert!(!recovered.contains(&ErrorType::Validation));

    let stats = router.get_handler_stats();
    assert_eq!(stats["recovery"].attempts, 2);
    assert_eq!(stats["reporter"].attempts, 3);
    assert_eq!(stats["reporter"].success_rate, 0.0);
}

// ============================================================================
// StructuredLogger
// ============================================================================

#[test]
fn test_logger_redacts_password() {
    let sink = Arc::new(MemorySink::new());
    let logger = StructuredLogger::new(sink.clone());
    logger.log_info("msg", &json!({ "password": "secret123", "normalField": "safe" }));

    let record = &sink.records()[0];
    assert_ne!(record.context["password"], "secret123");
    assert_eq!(record.context["normalField"], "safe");
}

#[test]
fn test_logger_redacts_nested_keys() {
    let sink = Arc::new(MemorySink::new());
    let logger = StructuredLogger::new(sink.clone());
    logger.log_warn(
        "upload retry",
        &json!({
            "request": {
                "headers": { "Authorization": "Bearer abc", "Accept": "application/json" },
                "attempts": [{ "api_key": "k1", "status": 500 }]
            }
        }),
    );

    let context = &sink.records()[0].context;
    assert_eq!(
        context["request"]["headers"]["Authorization"],
        DEFAULT_REDACTION_MARKER
    );
    assert_eq!(context["request"]["headers"]["Accept"], "application/json");
    assert_eq!(
        context["request"]["attempts"][0]["api_key"],
        DEFAULT_REDACTION_MARKER
    );
    assert_eq!(context["request"]["attempts"][0]["status"], 500);
}

// ============================================================================
// Pipeline
// ============================================================================

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let sink = Arc::new(MemorySink::new());
    let config = PipelineConfig {
        logger: LoggerConfig {
            batch_size: 2,
            ..LoggerConfig::default()
        },
        ..PipelineConfig::default()
    };
    let pipeline = ErrorPipeline::from_config_with_sink(&config, sink.clone());
    pipeline.register_logging_handler().unwrap();

    let context = ErrorContext::new()
        .with_component("Checkout")
        .with_user_id("u-42")
        .with_property("token", "t-secret");
    let report = pipeline
        .report(json!({ "response": { "status": 502 } }), Some(context))
        .await;
    assert!(report.classification.should_report);
    assert_eq!(report.successful_handlers(), 1);
    assert_eq!(sink.len(), 0);

    pipeline.destroy();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].context["component"], "Checkout");
    assert_eq!(records[0].context["userId"], "u-42");
    assert_eq!(records[0].context["token"], DEFAULT_REDACTION_MARKER);
    assert_eq!(records[0].context["statusCode"], 502);
}
