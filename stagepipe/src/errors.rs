//! Error types for stage pipelines.
//!
//! Stages fail with a [`StageFailure`]. The pipeline never hands that value to
//! its caller directly: it records the failing stage, the value that was fed
//! into it and the failure itself in a [`StageError`], and surfaces exactly one
//! [`PipelineError`] per failed run.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Message used whenever a stage panics instead of returning an error.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Error name used whenever a stage panics instead of returning an error.
pub const UNKNOWN_ERROR_NAME: &str = "UnknownError";

/// Failure raised by a stage's `execute` or `handle_error`.
///
/// Failures are cheap to clone so that one outcome can be handed to every
/// caller sharing a single in-flight computation.
#[derive(Debug, Clone, Error)]
pub enum StageFailure {
    /// One or more validation rules rejected the input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A transformation function failed.
    #[error(transparent)]
    Transformation(#[from] TransformationError),

    /// A sanitizer failed on a specific field.
    #[error(transparent)]
    Sanitization(#[from] SanitizationError),

    /// An enrichment source failed.
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),

    /// A retry decorator gave up without a usable inner error.
    #[error(transparent)]
    Retry(#[from] RetryError),

    /// Any other error raised by a stage or one of its collaborators.
    #[error("{0}")]
    Other(Arc<anyhow::Error>),

    /// The stage panicked; the payload is kept for diagnostics only.
    #[error("Unknown error")]
    Unknown {
        /// Text recovered from the panic payload, if it was a string.
        detail: Option<String>,
    },
}

impl StageFailure {
    /// Wraps an arbitrary error.
    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        Self::Other(Arc::new(err.into()))
    }

    /// Creates a failure from a plain message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Other(Arc::new(anyhow::Error::msg(message)))
    }

    /// Normalizes a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::Unknown {
            detail: panic_detail(payload),
        }
    }

    /// Returns the error name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Transformation(_) => "TransformationError",
            Self::Sanitization(_) => "SanitizationError",
            Self::Enrichment(_) => "EnrichmentError",
            Self::Retry(_) => "RetryError",
            Self::Other(_) => "Error",
            Self::Unknown { .. } => UNKNOWN_ERROR_NAME,
        }
    }

    /// Returns true if this failure came from a panic.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

impl From<anyhow::Error> for StageFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(Arc::new(err))
    }
}

pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(text) = payload.downcast_ref::<&str>() {
        Some((*text).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Error raised when validation rules reject an input.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// Every violation reported by every rule, in rule order.
    pub violations: Vec<String>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>, violations: Vec<String>) -> Self {
        Self {
            message: message.into(),
            violations,
        }
    }
}

/// Error raised when a transformation function fails.
#[derive(Debug, Clone)]
pub struct TransformationError {
    message: String,
    cause: Arc<anyhow::Error>,
}

impl TransformationError {
    /// Creates a new transformation error around its cause.
    pub fn new(message: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            message: message.into(),
            cause: Arc::new(cause.into()),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the error raised by the transformation function.
    #[must_use]
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

impl fmt::Display for TransformationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransformationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.cause)
    }
}

/// Error raised when a sanitizer fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SanitizationError {
    /// The error message.
    pub message: String,
    /// The field whose sanitizer failed.
    pub field: String,
}

impl SanitizationError {
    /// Creates a sanitization error for a field.
    #[must_use]
    pub fn for_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("Failed to sanitize field {field}"),
            field,
        }
    }
}

/// Error raised when an enrichment source fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EnrichmentError {
    /// The error message.
    pub message: String,
    /// Name of the failing source.
    pub source_name: String,
    /// Rendered message of the underlying failure.
    pub reason: String,
}

impl EnrichmentError {
    /// Creates an enrichment error for a source.
    #[must_use]
    pub fn new(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let source_name = source_name.into();
        Self {
            message: format!("Enrichment failed from source {source_name}"),
            source_name,
            reason: reason.into(),
        }
    }
}

/// Error raised by the retry decorator itself.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RetryError {
    /// The error message.
    pub message: String,
    /// Name of the wrapped stage.
    pub source_stage: String,
}

impl RetryError {
    /// Creates a new retry error.
    #[must_use]
    pub fn new(message: impl Into<String>, source_stage: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_stage: source_stage.into(),
        }
    }
}

/// Diagnostic record describing where and why a run failed.
#[derive(Clone)]
pub struct StageError {
    /// Name of the failing stage.
    pub stage_name: String,
    /// Name of the error kind (see [`StageFailure::name`]).
    pub error_name: String,
    /// Normalized message.
    pub message: String,
    /// The failure that ended the run.
    pub original_error: StageFailure,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
    context: Arc<dyn Any + Send + Sync>,
    context_repr: String,
}

impl StageError {
    /// Creates a stage error. `context` is the value fed into the stage.
    pub fn new(
        stage_name: impl Into<String>,
        failure: StageFailure,
        context: Arc<dyn Any + Send + Sync>,
        context_repr: impl Into<String>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            error_name: failure.name().to_string(),
            message: failure.to_string(),
            original_error: failure,
            failed_at: Utc::now(),
            context,
            context_repr: context_repr.into(),
        }
    }

    /// Replaces the message and cause after a failed recovery attempt.
    ///
    /// Stage name, error name and context keep describing the original failure.
    #[must_use]
    pub fn recovery_failed(mut self, recovery: StageFailure) -> Self {
        self.message = format!("Error recovery failed: {recovery}");
        self.original_error = recovery;
        self
    }

    /// Returns the value that was fed into the failing stage.
    #[must_use]
    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.downcast_ref::<T>()
    }

    /// Returns the `Debug` rendering of the context.
    #[must_use]
    pub fn context_repr(&self) -> &str {
        &self.context_repr
    }

    /// Returns the validation violations if the run failed on validation.
    #[must_use]
    pub fn violations(&self) -> &[String] {
        match &self.original_error {
            StageFailure::Validation(err) => &err.violations,
            _ => &[],
        }
    }

    /// Converts to a JSON summary suitable for structured logs.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut summary = serde_json::json!({
            "stage_name": self.stage_name,
            "error_name": self.error_name,
            "message": self.message,
            "original_error": self.original_error.to_string(),
            "context": self.context_repr,
            "failed_at": self.failed_at.to_rfc3339(),
        });
        if let StageFailure::Validation(err) = &self.original_error {
            summary["violations"] = serde_json::json!(err.violations);
        }
        summary
    }
}

impl fmt::Debug for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageError")
            .field("stage_name", &self.stage_name)
            .field("error_name", &self.error_name)
            .field("message", &self.message)
            .field("original_error", &self.original_error)
            .field("context", &self.context_repr)
            .field("failed_at", &self.failed_at)
            .finish()
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage_name, self.message)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.original_error)
    }
}

/// The only error a pipeline run surfaces to its caller.
#[derive(Debug, Clone, Error)]
#[error("Pipeline failed at stage \"{}\": {}", .stage_error.stage_name, .stage_error.message)]
pub struct PipelineError {
    /// Structured description of the failure.
    #[source]
    pub stage_error: StageError,
}

impl PipelineError {
    /// Wraps a stage error.
    #[must_use]
    pub fn new(stage_error: StageError) -> Self {
        Self { stage_error }
    }

    /// Returns the name of the stage the run failed at.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_error.stage_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stage_error(failure: StageFailure) -> StageError {
        StageError::new("Parse", failure, Arc::new(7_i32), "7")
    }

    #[test]
    fn test_failure_names() {
        assert_eq!(
            StageFailure::from(ValidationError::new("Validation failed", vec![])).name(),
            "ValidationError"
        );
        assert_eq!(
            StageFailure::from(RetryError::new("Immediate failure", "inner")).name(),
            "RetryError"
        );
        assert_eq!(StageFailure::msg("boom").name(), "Error");
        assert_eq!(StageFailure::Unknown { detail: None }.name(), UNKNOWN_ERROR_NAME);
    }

    #[test]
    fn test_unknown_failure_message() {
        let failure = StageFailure::from_panic(&"exploded");
        assert!(failure.is_unknown());
        assert_eq!(failure.to_string(), UNKNOWN_ERROR_MESSAGE);
        match failure {
            StageFailure::Unknown { detail } => assert_eq!(detail.as_deref(), Some("exploded")),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_panic_detail_non_string_payload() {
        assert_eq!(panic_detail(&42_u8), None);
        assert_eq!(panic_detail(&String::from("owned")), Some("owned".to_string()));
    }

    #[test]
    fn test_transformation_error_keeps_cause() {
        let err = TransformationError::new("Transformation failed", anyhow::anyhow!("bad input"));
        assert_eq!(err.to_string(), "Transformation failed");
        assert_eq!(err.cause().to_string(), "bad input");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("bad input"));
    }

    #[test]
    fn test_sanitization_and_enrichment_messages() {
        let err = SanitizationError::for_field("email");
        assert_eq!(err.to_string(), "Failed to sanitize field email");
        assert_eq!(err.field, "email");

        let err = EnrichmentError::new("CustomSource", "timeout");
        assert!(err.to_string().contains("CustomSource"));
        assert_eq!(err.source_name, "CustomSource");
    }

    #[test]
    fn test_stage_error_context_downcast() {
        let err = stage_error(StageFailure::msg("boom"));
        assert_eq!(err.context::<i32>(), Some(&7));
        assert_eq!(err.context::<String>(), None);
        assert_eq!(err.context_repr(), "7");
        assert_eq!(err.error_name, "Error");
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_recovery_failed_rewrites_message() {
        let err = stage_error(StageFailure::msg("first"))
            .recovery_failed(StageFailure::msg("second"));
        assert_eq!(err.message, "Error recovery failed: second");
        assert_eq!(err.original_error.to_string(), "second");
        assert_eq!(err.stage_name, "Parse");
        assert_eq!(err.error_name, "Error");
    }

    #[test]
    fn test_pipeline_error_display_and_source() {
        let err = PipelineError::new(stage_error(StageFailure::msg("Test error")));
        assert_eq!(err.to_string(), "Pipeline failed at stage \"Parse\": Test error");
        assert_eq!(err.stage_name(), "Parse");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Parse: Test error"));
    }

    #[test]
    fn test_to_json_includes_violations() {
        let failure = ValidationError::new("Validation failed", vec!["must be positive".into()]);
        let json = stage_error(failure.into()).to_json();
        assert_eq!(json["stage_name"], "Parse");
        assert_eq!(json["error_name"], "ValidationError");
        assert_eq!(json["violations"][0], "must be positive");
    }
}
