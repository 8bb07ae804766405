//! Action, reporting and routing policy for classified errors.

use super::{
    ClassifiedError, ErrorAction, ErrorActionType, ErrorSeverity, ErrorType, HandlerSuggestion,
    RoutingMetadata,
};

/// Step between adjacent severities on the routing priority scale.
pub const ROUTING_PRIORITY_STEP: u32 = 25;

/// Builds the ordered action list for an error.
///
/// The primary action (RETRY or LOGIN) comes first, DISMISS is always last and
/// appears exactly once. At most one action is primary.
pub fn generate_actions(error: &ClassifiedError) -> Vec<ErrorAction> {
    let mut actions = Vec::with_capacity(4);

    if error.retryable {
        actions.push(ErrorAction::new(ErrorActionType::Retry, "Try Again", true));
    }

    if error.error_type == ErrorType::Authentication {
        let primary = !actions.iter().any(|a| a.primary);
        actions.push(ErrorAction::new(ErrorActionType::Login, "Sign In", primary));
    }

    if error.error_type == ErrorType::Server {
        actions.push(ErrorAction::new(
            ErrorActionType::Refresh,
            "Refresh Page",
            false,
        ));
    }

    if error.is_high_or_critical() {
        actions.push(ErrorAction::new(
            ErrorActionType::ContactSupport,
            "Contact Support",
            false,
        ));
    }

    actions.push(ErrorAction::new(ErrorActionType::Dismiss, "Dismiss", false));
    actions
}

/// Whether the error should go to external telemetry.
///
/// User-actionable errors are never reported. HIGH and CRITICAL errors always
/// are, and so are unexplained (UNKNOWN) failures.
pub fn should_report(error: &ClassifiedError) -> bool {
    if error.error_type.is_user_actionable() {
        return false;
    }
    error.is_high_or_critical() || error.error_type == ErrorType::Unknown
}

/// Whether the error should be surfaced to the user.
pub fn should_notify_user(error: &ClassifiedError) -> bool {
    error.severity >= ErrorSeverity::Medium
}

/// Routing priority for a severity: LOW 25, MEDIUM 50, HIGH 75, CRITICAL 100.
pub fn routing_priority(severity: ErrorSeverity) -> u32 {
    (severity.ordinal() + 1) * ROUTING_PRIORITY_STEP
}

/// Base escalation level for a severity: LOW 0 ... CRITICAL 3.
pub fn base_escalation_level(severity: ErrorSeverity) -> u32 {
    severity.ordinal()
}

/// Derives routing metadata from an error and its report/notify decisions.
pub fn routing_metadata(
    error: &ClassifiedError,
    should_report: bool,
    should_notify_user: bool,
) -> RoutingMetadata {
    let mut handler_suggestions = vec![HandlerSuggestion::Logging];
    if error.retryable {
        handler_suggestions.push(HandlerSuggestion::Recovery);
    }
    if should_notify_user {
        handler_suggestions.push(HandlerSuggestion::Notification);
    }
    if should_report {
        handler_suggestions.push(HandlerSuggestion::Reporting);
    }

    RoutingMetadata {
        routing_priority: routing_priority(error.severity),
        handler_suggestions,
        escalation_level: base_escalation_level(error.severity),
    }
}
