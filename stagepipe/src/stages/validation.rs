//! Rule-based input validation.

use super::{Stage, StageValue};
use crate::errors::{StageFailure, ValidationError};
use async_trait::async_trait;
use std::fmt;
use tracing::warn;

/// A single validation rule.
///
/// Returns every violation it finds; an empty list means the input passed.
#[async_trait]
pub trait ValidationRule<T: StageValue>: Send + Sync {
    /// Validates the input.
    async fn validate(&self, data: &T) -> Vec<String>;
}

/// A rule backed by a closure returning violations.
pub struct FnRule<F> {
    func: F,
}

impl<F> FnRule<F> {
    /// Creates a new closure rule.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<T, F> ValidationRule<T> for FnRule<F>
where
    T: StageValue,
    F: Fn(&T) -> Vec<String> + Send + Sync,
{
    async fn validate(&self, data: &T) -> Vec<String> {
        (self.func)(data)
    }
}

/// A rule reporting a fixed message when a predicate does not hold.
pub struct PredicateRule<F> {
    message: String,
    predicate: F,
}

impl<F> PredicateRule<F> {
    /// Creates a rule failing with `message` whenever `predicate` returns false.
    pub fn new(message: impl Into<String>, predicate: F) -> Self {
        Self {
            message: message.into(),
            predicate,
        }
    }
}

#[async_trait]
impl<T, F> ValidationRule<T> for PredicateRule<F>
where
    T: StageValue,
    F: Fn(&T) -> bool + Send + Sync,
{
    async fn validate(&self, data: &T) -> Vec<String> {
        if (self.predicate)(data) {
            Vec::new()
        } else {
            vec![self.message.clone()]
        }
    }
}

/// Stage running every rule and failing with all collected violations.
///
/// Its `handle_error` hook logs the violations and re-raises: validation
/// failures are never recovered at this layer.
pub struct ValidationStage<T: StageValue> {
    name: String,
    rules: Vec<Box<dyn ValidationRule<T>>>,
}

impl<T: StageValue> ValidationStage<T> {
    /// Creates a validation stage without rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "ValidationStage".to_string(),
            rules: Vec::new(),
        }
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a rule.
    #[must_use]
    pub fn rule(mut self, rule: impl ValidationRule<T> + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Appends a predicate rule.
    #[must_use]
    pub fn require(
        self,
        message: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.rule(PredicateRule::new(message, predicate))
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl<T: StageValue> Default for ValidationStage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StageValue> fmt::Debug for ValidationStage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationStage")
            .field("name", &self.name)
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[async_trait]
impl<T: StageValue> Stage<T, T> for ValidationStage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: T) -> Result<T, StageFailure> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            violations.extend(rule.validate(&input).await);
        }

        if violations.is_empty() {
            Ok(input)
        } else {
            Err(ValidationError::new("Validation failed", violations).into())
        }
    }

    fn has_error_handler(&self) -> bool {
        true
    }

    async fn handle_error(&self, error: StageFailure, _context: T) -> Result<T, StageFailure> {
        if let StageFailure::Validation(err) = &error {
            warn!(stage = %self.name, violations = ?err.violations, "Validation errors");
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Signup {
        email: String,
        age: u32,
    }

    struct SlowRule;

    #[async_trait]
    impl ValidationRule<Signup> for SlowRule {
        async fn validate(&self, data: &Signup) -> Vec<String> {
            tokio::task::yield_now().await;
            if data.email.contains('@') {
                Vec::new()
            } else {
                vec!["email must contain @".to_string()]
            }
        }
    }

    fn signup(email: &str, age: u32) -> Signup {
        Signup {
            email: email.to_string(),
            age,
        }
    }

    #[tokio::test]
    async fn test_passes_valid_input_through() {
        let stage = ValidationStage::new()
            .rule(SlowRule)
            .require("must be adult", |s: &Signup| s.age >= 18);

        let input = signup("a@b.c", 30);
        assert_eq!(stage.execute(input.clone()).await.unwrap(), input);
    }

    #[tokio::test]
    async fn test_aggregates_violations_from_all_rules() {
        let stage = ValidationStage::new()
            .rule(SlowRule)
            .require("must be adult", |s: &Signup| s.age >= 18)
            .rule(FnRule::new(|s: &Signup| {
                if s.email.is_empty() {
                    vec!["email is required".to_string(), "email too short".to_string()]
                } else {
                    Vec::new()
                }
            }));

        let err = stage.execute(signup("", 3)).await.unwrap_err();
        match err {
            StageFailure::Validation(err) => {
                assert_eq!(err.message, "Validation failed");
                assert_eq!(
                    err.violations,
                    vec![
                        "email must contain @".to_string(),
                        "must be adult".to_string(),
                        "email is required".to_string(),
                        "email too short".to_string(),
                    ]
                );
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_rules_accepts_everything() {
        let stage: ValidationStage<i32> = ValidationStage::default();
        assert_eq!(stage.rule_count(), 0);
        assert_eq!(stage.execute(-5).await.unwrap(), -5);
    }

    #[tokio::test]
    async fn test_handle_error_always_reraises() {
        let stage = ValidationStage::new().require("must be positive", |x: &i32| *x > 0);
        assert!(stage.has_error_handler());

        let failure = stage.execute(-1).await.unwrap_err();
        let err = stage.handle_error(failure, -1).await.unwrap_err();
        assert_eq!(err.name(), "ValidationError");

        let err = stage
            .handle_error(StageFailure::msg("other"), -1)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "other");
    }

    #[test]
    fn test_custom_name() {
        let stage: ValidationStage<i32> = ValidationStage::new().with_name("PositiveCheck");
        assert_eq!(stage.name(), "PositiveCheck");
    }
}
