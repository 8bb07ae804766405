//! Classified error types for the error pipeline
//!
//! This module provides the normalized error domain: a closed taxonomy of
//! error types and severities, the `ClassifiedError` value produced once per
//! failure, the suggested user actions, and the routing metadata consumed by
//! the handler router.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The closed taxonomy of error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Request was sent but no response arrived.
    Network,
    /// The runtime reports that it is offline.
    Connectivity,
    /// The request timed out or was aborted.
    Timeout,
    /// Session missing or expired (HTTP 401).
    Authentication,
    /// Authenticated but not allowed (HTTP 403).
    Authorization,
    /// Input rejected by the server (HTTP 422).
    Validation,
    /// Too many requests (HTTP 429).
    RateLimit,
    /// Server-side failure (HTTP 5xx).
    Server,
    /// Content analysis failed.
    AnalysisError,
    /// An uploaded or fetched file could not be processed.
    FileProcessingError,
    /// Google Drive integration failed.
    GoogleDriveError,
    /// Nothing else matched.
    Unknown,
}

impl ErrorType {
    /// All variants, in declaration order.
    pub const ALL: [ErrorType; 12] = [
        ErrorType::Network,
        ErrorType::Connectivity,
        ErrorType::Timeout,
        ErrorType::Authentication,
        ErrorType::Authorization,
        ErrorType::Validation,
        ErrorType::RateLimit,
        ErrorType::Server,
        ErrorType::AnalysisError,
        ErrorType::FileProcessingError,
        ErrorType::GoogleDriveError,
        ErrorType::Unknown,
    ];

    /// Returns the wire name, e.g. `RATE_LIMIT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Network => "NETWORK",
            ErrorType::Connectivity => "CONNECTIVITY",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::Authentication => "AUTHENTICATION",
            ErrorType::Authorization => "AUTHORIZATION",
            ErrorType::Validation => "VALIDATION",
            ErrorType::RateLimit => "RATE_LIMIT",
            ErrorType::Server => "SERVER",
            ErrorType::AnalysisError => "ANALYSIS_ERROR",
            ErrorType::FileProcessingError => "FILE_PROCESSING_ERROR",
            ErrorType::GoogleDriveError => "GOOGLE_DRIVE_ERROR",
            ErrorType::Unknown => "UNKNOWN",
        }
    }

    /// Returns true for errors the user can fix themselves.
    ///
    /// These are never reported to external telemetry.
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, ErrorType::Validation | ErrorType::Authentication)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How severe a failure is. Ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// All variants, least severe first.
    pub const ALL: [ErrorSeverity; 4] = [
        ErrorSeverity::Low,
        ErrorSeverity::Medium,
        ErrorSeverity::High,
        ErrorSeverity::Critical,
    ];

    /// Zero-based ordinal: LOW = 0 ... CRITICAL = 3.
    pub fn ordinal(&self) -> u32 {
        match self {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 1,
            ErrorSeverity::High => 2,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    /// Parses a severity name case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(ErrorSeverity::Low),
            "MEDIUM" => Some(ErrorSeverity::Medium),
            "HIGH" => Some(ErrorSeverity::High),
            "CRITICAL" => Some(ErrorSeverity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure happened and who hit it.
///
/// Caller-supplied properties beyond the well-known fields are kept in
/// `extra` and flattened when serialized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Adds an arbitrary caller-supplied property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Serializes the context into a JSON object.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }
}

/// A normalized, typed representation of a raw failure.
///
/// Produced once per classification and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    /// Fresh identifier for every classification.
    pub error_id: String,
    /// Creation time, serialized as ISO-8601.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Developer-facing description.
    pub message: String,
    /// Human-readable text, never empty.
    pub user_message: String,
    pub retryable: bool,
    /// How long to wait before retrying, serialized in milliseconds.
    #[serde(
        default,
        rename = "retryAfter",
        with = "duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_after: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub context: ErrorContext,
}

impl ClassifiedError {
    /// Creates a classified error with a fresh id and the current timestamp.
    pub fn new(
        error_type: ErrorType,
        severity: ErrorSeverity,
        message: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            error_id: generate_error_id(),
            timestamp: Utc::now(),
            error_type,
            severity,
            status_code: None,
            message: message.into(),
            user_message: user_message.into(),
            retryable: false,
            retry_after: None,
            details: None,
            context: ErrorContext::default(),
        }
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Sets the retry delay. Ignored unless the error is retryable.
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        if self.retryable {
            self.retry_after = retry_after;
        }
        self
    }

    pub fn with_details(mut self, details: Option<Value>) -> Self {
        self.details = details;
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// `retry_after` in whole milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after.map(duration_millis::saturating_millis)
    }

    pub fn is_high_or_critical(&self) -> bool {
        self.severity >= ErrorSeverity::High
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.error_type, self.severity, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

/// Generates a fresh error identifier.
pub fn generate_error_id() -> String {
    format!("err_{}", Uuid::new_v4().simple())
}

/// Kinds of user-facing actions offered alongside an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorActionType {
    Retry,
    Login,
    Refresh,
    ContactSupport,
    Dismiss,
}

/// A suggested action for the UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAction {
    #[serde(rename = "type")]
    pub action_type: ErrorActionType,
    pub label: String,
    pub primary: bool,
}

impl ErrorAction {
    pub fn new(action_type: ErrorActionType, label: impl Into<String>, primary: bool) -> Self {
        Self {
            action_type,
            label: label.into(),
            primary,
        }
    }
}

/// Handler families the router is expected to involve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerSuggestion {
    Logging,
    Recovery,
    Notification,
    Reporting,
}

/// Routing-aware extras attached by `classify_with_routing`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetadata {
    /// Strictly increasing with severity.
    pub routing_priority: u32,
    pub handler_suggestions: Vec<HandlerSuggestion>,
    pub escalation_level: u32,
}

/// A classified error together with what should happen next.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub error: ClassifiedError,
    pub actions: Vec<ErrorAction>,
    /// Send to external telemetry.
    pub should_report: bool,
    /// Surface to the UI.
    pub should_notify_user: bool,
    #[serde(default, flatten)]
    pub routing: Option<RoutingMetadata>,
}

impl ClassificationResult {
    /// The primary action, if any.
    pub fn primary_action(&self) -> Option<&ErrorAction> {
        self.actions.iter().find(|a| a.primary)
    }

    pub fn has_action(&self, action_type: ErrorActionType) -> bool {
        self.actions.iter().any(|a| a.action_type == action_type)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn saturating_millis(d: Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(saturating_millis(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
