//! Test assertions for pipeline failures.

use crate::errors::{PipelineError, UNKNOWN_ERROR_MESSAGE, UNKNOWN_ERROR_NAME};

/// Asserts that the run failed at the named stage.
pub fn assert_failed_at(error: &PipelineError, stage: &str) {
    assert_eq!(
        error.stage_name(),
        stage,
        "Expected failure at stage '{}', got '{}' ({})",
        stage,
        error.stage_name(),
        error
    );
}

/// Asserts that the run failed with the given error name.
pub fn assert_error_name(error: &PipelineError, expected: &str) {
    assert_eq!(
        error.stage_error.error_name, expected,
        "Expected error name {:?}, got {:?}",
        expected, error.stage_error.error_name
    );
}

/// Asserts that the validation violations include `violation`.
pub fn assert_violation(error: &PipelineError, violation: &str) {
    let violations = error.stage_error.violations();
    assert!(
        violations.iter().any(|v| v == violation),
        "Expected violation '{}', got {:?}",
        violation,
        violations
    );
}

/// Asserts that the run failed because a stage panicked.
pub fn assert_unknown_failure(error: &PipelineError) {
    assert_eq!(
        error.stage_error.message, UNKNOWN_ERROR_MESSAGE,
        "Expected an unknown failure, got: {}",
        error
    );
    assert_error_name(error, UNKNOWN_ERROR_NAME);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{StageError, StageFailure, ValidationError};
    use std::sync::Arc;

    fn failed(failure: StageFailure) -> PipelineError {
        PipelineError::new(StageError::new("Check", failure, Arc::new(1_i32), "1"))
    }

    #[test]
    fn test_assert_failed_at() {
        assert_failed_at(&failed(StageFailure::msg("boom")), "Check");
    }

    #[test]
    #[should_panic(expected = "Expected failure at stage 'Other'")]
    fn test_assert_failed_at_fails() {
        assert_failed_at(&failed(StageFailure::msg("boom")), "Other");
    }

    #[test]
    fn test_assert_violation() {
        let err = failed(ValidationError::new("Validation failed", vec!["must be positive".into()]).into());
        assert_violation(&err, "must be positive");
        assert_error_name(&err, "ValidationError");
    }

    #[test]
    fn test_assert_unknown_failure() {
        assert_unknown_failure(&failed(StageFailure::Unknown { detail: None }));
    }
}
