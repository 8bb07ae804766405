//! Classifier turning raw failures into classified errors
//!
//! Rules are checked in precedence order: HTTP responses first, then offline
//! connectivity, timeouts, generic network faults, named application errors,
//! and finally an UNKNOWN/MEDIUM fallback. Classification never fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::policy;
use super::raw::{AppErrorKind, AppErrorShape, GenericError, HttpErrorShape, NetworkErrorShape};
use super::{ClassificationResult, ClassifiedError, ErrorContext, ErrorSeverity, ErrorType, RawError};

/// Network codes that mean the request timed out or was aborted.
const TIMEOUT_CODES: &[&str] = &["ECONNABORTED", "ETIMEDOUT", "ESOCKETTIMEDOUT"];

/// Network codes that mean the server could not be reached.
const NETWORK_CODES: &[&str] = &[
    "ERR_NETWORK",
    "ECONNREFUSED",
    "ECONNRESET",
    "ENOTFOUND",
    "EAI_AGAIN",
    "ENOTCONN",
    "EPIPE",
];

/// Error names that mark an aborted or timed-out operation.
const TIMEOUT_NAMES: &[&str] = &["TimeoutError", "AbortError"];

/// Reports whether the runtime currently has network connectivity.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Probe that always reports online.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Probe backed by a flag the host flips when connectivity changes.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Classifier settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Location recorded when the caller's context has no `url`.
    #[serde(default)]
    pub default_url: Option<String>,
}

impl ClassifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = Some(url.into());
        self
    }
}

/// Pure mapping from a raw failure and context to a classification.
pub struct Classifier {
    config: ClassifierConfig,
    connectivity: Arc<dyn ConnectivityProbe>,
    timeout_pattern: Regex,
    permission_pattern: Regex,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("config", &self.config)
            .field("online", &self.connectivity.is_online())
            .finish()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl Classifier {
    /// Creates a classifier that assumes the runtime is online.
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_connectivity(config, Arc::new(AlwaysOnline))
    }

    /// Creates a classifier with a custom connectivity probe.
    pub fn with_connectivity(
        config: ClassifierConfig,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self {
            config,
            connectivity,
            timeout_pattern: Regex::new(r"(?i)\b(time[\s\-]?out|timed\s*out)\b")
                .expect("Invalid timeout pattern"),
            permission_pattern: Regex::new(
                r"(?i)(permission|forbidden|access\s*denied|insufficient\s*scope)",
            )
            .expect("Invalid permission pattern"),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classifies a raw failure.
    pub fn classify(&self, raw: &RawError, context: Option<ErrorContext>) -> ClassificationResult {
        let error = self.classify_error(raw, context);
        let actions = policy::generate_actions(&error);
        let should_report = policy::should_report(&error);
        let should_notify_user = policy::should_notify_user(&error);

        tracing::debug!(
            error_id = %error.error_id,
            error_type = %error.error_type,
            severity = %error.severity,
            shape = raw.shape_name(),
            "Classified error"
        );

        ClassificationResult {
            error,
            actions,
            should_report,
            should_notify_user,
            routing: None,
        }
    }

    /// Classifies a raw failure and attaches routing metadata.
    pub fn classify_with_routing(
        &self,
        raw: &RawError,
        context: Option<ErrorContext>,
    ) -> ClassificationResult {
        let mut result = self.classify(raw, context);
        result.routing = Some(policy::routing_metadata(
            &result.error,
            result.should_report,
            result.should_notify_user,
        ));
        result
    }

    /// Classifies a loosely-typed JSON failure.
    pub fn classify_value(&self, raw: &Value, context: Option<ErrorContext>) -> ClassificationResult {
        self.classify(&RawError::from_json(raw), context)
    }

    fn classify_error(&self, raw: &RawError, context: Option<ErrorContext>) -> ClassifiedError {
        let error = match raw {
            RawError::Http(http) => self.classify_http(http),
            RawError::Network(net) => self.classify_network(net),
            RawError::App(app) => self.classify_app(app),
            RawError::Generic(generic) => self.classify_generic(generic),
        };

        let mut context = context.unwrap_or_default();
        if context.url.is_none() {
            context.url = self.config.default_url.clone();
        }
        error.with_context(context)
    }

    fn classify_http(&self, http: &HttpErrorShape) -> ClassifiedError {
        let message = http
            .message
            .clone()
            .unwrap_or_else(|| format!("Request failed with status code {}", http.status));

        let error = match http.status {
            401 => ClassifiedError::new(
                ErrorType::Authentication,
                ErrorSeverity::High,
                message,
                "Your session has expired. Please sign in again.",
            ),
            403 => ClassifiedError::new(
                ErrorType::Authorization,
                ErrorSeverity::Medium,
                message,
                "You don't have permission to perform this action.",
            ),
            408 => ClassifiedError::new(
                ErrorType::Timeout,
                ErrorSeverity::Medium,
                message,
                "The request took too long to complete. Please try again.",
            )
            .with_retryable(true),
            422 => ClassifiedError::new(
                ErrorType::Validation,
                ErrorSeverity::Low,
                message,
                "Some of the information you entered is invalid. Please check the highlighted fields.",
            )
            .with_details(validation_details(http.data.as_ref())),
            429 => {
                let retry_after = http.header("retry-after").and_then(parse_retry_after);
                let user_message = match retry_after {
                    Some(wait) => format!(
                        "Too many requests. Please wait {} seconds before trying again.",
                        wait.as_secs()
                    ),
                    None => "Too many requests. Please wait a moment before trying again."
                        .to_string(),
                };
                ClassifiedError::new(
                    ErrorType::RateLimit,
                    ErrorSeverity::Medium,
                    message,
                    user_message,
                )
                .with_retryable(true)
                .with_retry_after(retry_after)
            }
            500..=599 => ClassifiedError::new(
                ErrorType::Server,
                ErrorSeverity::High,
                message,
                "We're experiencing technical difficulties. Please try again in a few moments.",
            )
            .with_retryable(true),
            status => ClassifiedError::new(
                ErrorType::Unknown,
                ErrorSeverity::Medium,
                message,
                format!(
                    "Something went wrong while contacting the server (status {}). Please try again.",
                    status
                ),
            ),
        };

        error.with_status_code(http.status)
    }

    fn classify_network(&self, net: &NetworkErrorShape) -> ClassifiedError {
        let code = net.code.as_deref().unwrap_or_default();
        let message = non_empty_or(&net.message, || format!("Network error {}", code));

        if !self.connectivity.is_online() {
            return connectivity_error(message);
        }

        if net.aborted
            || TIMEOUT_CODES.contains(&code)
            || self.timeout_pattern.is_match(&net.message)
        {
            return timeout_error(message);
        }

        if net.has_request || NETWORK_CODES.contains(&code) {
            return ClassifiedError::new(
                ErrorType::Network,
                ErrorSeverity::Medium,
                message,
                "Unable to reach the server. Please check your connection and try again.",
            )
            .with_retryable(true);
        }

        unknown_error(message)
    }

    fn classify_app(&self, app: &AppErrorShape) -> ClassifiedError {
        let message = non_empty_or(&app.message, || app.kind.name().to_string());

        if !self.connectivity.is_online() {
            return connectivity_error(message);
        }

        let (error_type, severity, retryable, default_user_message) = match app.kind {
            AppErrorKind::Analysis => (
                ErrorType::AnalysisError,
                ErrorSeverity::Medium,
                true,
                "We couldn't complete the analysis. Please try again.",
            ),
            AppErrorKind::FileProcessing => (
                ErrorType::FileProcessingError,
                ErrorSeverity::Medium,
                false,
                "We couldn't process this file. Please check the file format and try again.",
            ),
            AppErrorKind::GoogleDrive if self.is_drive_permission_failure(app) => (
                ErrorType::GoogleDriveError,
                ErrorSeverity::High,
                true,
                "We don't have permission to access this Google Drive file. Please reconnect your Google account and try again.",
            ),
            AppErrorKind::GoogleDrive => (
                ErrorType::GoogleDriveError,
                ErrorSeverity::Medium,
                true,
                "Something went wrong while talking to Google Drive. Please try again.",
            ),
        };

        let user_message = app
            .user_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default_user_message);

        let mut error = ClassifiedError::new(
            error_type,
            app.severity.unwrap_or(severity),
            message,
            user_message,
        )
        .with_retryable(retryable)
        .with_details(app.details.clone());

        if let Some(status) = app.status {
            error = error.with_status_code(status);
        }
        error
    }

    fn classify_generic(&self, generic: &GenericError) -> ClassifiedError {
        let message = non_empty_or(&generic.message, || {
            generic
                .name
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string())
        });

        if !self.connectivity.is_online() {
            return connectivity_error(message);
        }

        let timeout_named = generic
            .name
            .as_deref()
            .map(|name| TIMEOUT_NAMES.contains(&name))
            .unwrap_or(false);
        if timeout_named || self.timeout_pattern.is_match(&generic.message) {
            return timeout_error(message);
        }

        unknown_error(message)
    }

    fn is_drive_permission_failure(&self, app: &AppErrorShape) -> bool {
        app.status == Some(403)
            || app
                .code
                .as_deref()
                .map(|code| code == "403" || self.permission_pattern.is_match(code))
                .unwrap_or(false)
            || self.permission_pattern.is_match(&app.message)
    }
}

fn connectivity_error(message: String) -> ClassifiedError {
    ClassifiedError::new(
        ErrorType::Connectivity,
        ErrorSeverity::Medium,
        message,
        "You appear to be offline. Please check your internet connection.",
    )
    .with_retryable(true)
}

fn timeout_error(message: String) -> ClassifiedError {
    ClassifiedError::new(
        ErrorType::Timeout,
        ErrorSeverity::Medium,
        message,
        "The request timed out. Please try again.",
    )
    .with_retryable(true)
}

fn unknown_error(message: String) -> ClassifiedError {
    ClassifiedError::new(
        ErrorType::Unknown,
        ErrorSeverity::Medium,
        message,
        "An unexpected error occurred. Please try again.",
    )
}

fn non_empty_or(message: &str, fallback: impl FnOnce() -> String) -> String {
    if message.trim().is_empty() {
        fallback()
    } else {
        message.to_string()
    }
}

/// Parses a `retry-after` header given in whole seconds.
///
/// Values whose millisecond form does not fit in a `u64` are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<u64>().ok()?;
    secs.checked_mul(1000)?;
    Some(Duration::from_secs(secs))
}

/// Field-level errors from a 422 body: `data.errors` when present, else the body.
fn validation_details(data: Option<&Value>) -> Option<Value> {
    let data = data?;
    match data.get("errors") {
        Some(errors) if !errors.is_null() => Some(errors.clone()),
        _ => Some(data.clone()),
    }
}
