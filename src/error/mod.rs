//! Error classification module
//!
//! This module turns arbitrary, differently-shaped failures into a normalized
//! `ClassifiedError`, together with suggested user actions, reporting and
//! notification decisions, and routing metadata for the handler router.

pub mod classification;
pub mod classifier;
pub mod policy;
pub mod raw;

// Re-export main types for convenient access
pub use classification::{
    generate_error_id, ClassificationResult, ClassifiedError, ErrorAction, ErrorActionType,
    ErrorContext, ErrorSeverity, ErrorType, HandlerSuggestion, RoutingMetadata,
};
pub use classifier::{
    AlwaysOnline, Classifier, ClassifierConfig, ConnectivityProbe, StaticConnectivity,
};
pub use raw::{
    AppErrorKind, AppErrorShape, GenericError, HttpErrorShape, NetworkErrorShape, RawError,
};
