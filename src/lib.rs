//! faultroute - error classification, routing and structured logging.
//!
//! Raw failures (HTTP responses, transport errors, named application errors,
//! anything else) are turned into a `ClassifiedError` by the `Classifier`,
//! recorded and broadcast by the `ErrorManager`, dispatched to prioritized
//! handlers by the `ErrorRouter`, and written with sensitive context redacted
//! by the `StructuredLogger`. `ErrorPipeline` wires the four together.

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod pipeline;
pub mod router;

pub use crate::config::PipelineConfig;
pub use crate::error::{ClassificationResult, ClassifiedError, Classifier, ErrorContext, RawError};
pub use crate::manager::ErrorManager;
pub use crate::pipeline::ErrorPipeline;
pub use crate::router::ErrorRouter;
