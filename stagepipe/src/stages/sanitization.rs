//! Field-level sanitization.
//!
//! A rule names one field of the input and reaches it through an accessor.
//! The sanitizer receives the current field value and returns its
//! replacement. Fields without a rule are never read or written, so any
//! `T: StageValue` can be sanitized. An absent value is modelled as an
//! `Option` field, which the sanitizer receives as `None`.

use super::{Stage, StageValue};
use crate::errors::{SanitizationError, StageFailure};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

type SanitizeFn<T> = Arc<dyn Fn(&mut T) -> anyhow::Result<()> + Send + Sync>;

/// Sanitizer for a single field of `T`.
pub struct SanitizationRule<T> {
    field: String,
    sanitize: SanitizeFn<T>,
}

impl<T> SanitizationRule<T> {
    /// Creates a rule replacing the field reached by `access` with the
    /// result of `sanitize`.
    pub fn new<V, A, F>(field: impl Into<String>, access: A, sanitize: F) -> Self
    where
        V: Clone,
        A: Fn(&mut T) -> &mut V + Send + Sync + 'static,
        F: Fn(V) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            sanitize: Arc::new(move |target| {
                let slot = access(target);
                *slot = sanitize(slot.clone())?;
                Ok(())
            }),
        }
    }

    /// Trims surrounding whitespace from a string field.
    pub fn trim<A>(field: impl Into<String>, access: A) -> Self
    where
        A: Fn(&mut T) -> &mut String + Send + Sync + 'static,
    {
        Self::map_string(field, access, |s| s.trim().to_string())
    }

    /// Lowercases a string field.
    pub fn lowercase<A>(field: impl Into<String>, access: A) -> Self
    where
        A: Fn(&mut T) -> &mut String + Send + Sync + 'static,
    {
        Self::map_string(field, access, str::to_lowercase)
    }

    /// Replaces every match of `pattern` in a string field.
    pub fn replace_pattern<A>(
        field: impl Into<String>,
        access: A,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self, regex::Error>
    where
        A: Fn(&mut T) -> &mut String + Send + Sync + 'static,
    {
        let regex = Regex::new(pattern)?;
        let replacement = replacement.into();
        Ok(Self::map_string(field, access, move |s| {
            regex.replace_all(s, replacement.as_str()).into_owned()
        }))
    }

    /// Returns the field this rule sanitizes.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    fn map_string<A, M>(field: impl Into<String>, access: A, map: M) -> Self
    where
        A: Fn(&mut T) -> &mut String + Send + Sync + 'static,
        M: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            sanitize: Arc::new(move |target| {
                let slot = access(target);
                *slot = map(slot.as_str());
                Ok(())
            }),
        }
    }

    fn apply(&self, target: &mut T) -> Result<(), SanitizationError> {
        match catch_unwind(AssertUnwindSafe(|| (self.sanitize)(target))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                debug!(field = %self.field, error = %err, "Sanitizer failed");
                Err(SanitizationError::for_field(&self.field))
            }
            Err(_) => {
                debug!(field = %self.field, "Sanitizer panicked");
                Err(SanitizationError::for_field(&self.field))
            }
        }
    }
}

impl<T> Clone for SanitizationRule<T> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            sanitize: Arc::clone(&self.sanitize),
        }
    }
}

impl<T> fmt::Debug for SanitizationRule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizationRule")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

/// Stage applying sanitization rules in order to its own copy of the input.
///
/// A failing or panicking sanitizer aborts the stage with a
/// [`SanitizationError`] naming its field; the partially sanitized copy is
/// discarded.
pub struct SanitizationStage<T> {
    name: String,
    rules: Vec<SanitizationRule<T>>,
}

impl<T> SanitizationStage<T> {
    /// Creates a sanitization stage.
    #[must_use]
    pub fn new(rules: Vec<SanitizationRule<T>>) -> Self {
        Self {
            name: "SanitizationStage".to_string(),
            rules,
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
    pub fn rule(mut self, rule: SanitizationRule<T>) -> Self {
        self.rules.push(rule);
        self
    }
}

impl<T> fmt::Debug for SanitizationStage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizationStage")
            .field("name", &self.name)
            .field("rules", &self.rules)
            .finish()
    }
}

#[async_trait]
impl<T> Stage<T, T> for SanitizationStage<T>
where
    T: StageValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut input: T) -> Result<T, StageFailure> {
        for rule in &self.rules {
            rule.apply(&mut input)?;
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Contact {
        name: String,
        email: String,
        notes: Option<String>,
        trace_id: u64,
    }

    fn contact() -> Contact {
        Contact {
            name: "  Ada  ".into(),
            email: "ADA@Example.COM".into(),
            notes: None,
            trace_id: 42,
        }
    }

    fn name(c: &mut Contact) -> &mut String {
        &mut c.name
    }

    fn email(c: &mut Contact) -> &mut String {
        &mut c.email
    }

    fn notes(c: &mut Contact) -> &mut Option<String> {
        &mut c.notes
    }

    #[tokio::test]
    async fn test_applies_rules_to_declared_fields_only() {
        let stage = SanitizationStage::new(vec![
            SanitizationRule::trim("name", name),
            SanitizationRule::lowercase("email", email),
        ]);

        let input = contact();
        let output = stage.execute(input.clone()).await.unwrap();

        assert_eq!(
            output,
            Contact {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                notes: None,
                trace_id: 42,
            }
        );
        assert_eq!(input.name, "  Ada  ");
    }

    #[tokio::test]
    async fn test_undeclared_fields_keep_their_value() {
        let stage = SanitizationStage::new(vec![SanitizationRule::trim("email", email)]);
        let mut input = contact();
        input.email = " a@b ".into();
        input.trace_id = 7;

        let output = stage.execute(input).await.unwrap();
        assert_eq!(output.email, "a@b");
        assert_eq!(output.trace_id, 7);
        assert_eq!(output.name, "  Ada  ");
    }

    #[tokio::test]
    async fn test_rules_run_in_order() {
        let stage = SanitizationStage::new(vec![SanitizationRule::trim("name", name)]).rule(
            SanitizationRule::new("name", name, |v: String| Ok(format!("[{v}]"))),
        );

        let output = stage.execute(contact()).await.unwrap();
        assert_eq!(output.name, "[Ada]");
    }

    #[tokio::test]
    async fn test_absent_optional_field_is_presented_as_none() {
        let stage = SanitizationStage::new(vec![SanitizationRule::new(
            "notes",
            notes,
            |v: Option<String>| {
                assert!(v.is_none());
                Ok(Some("none".to_string()))
            },
        )]);

        let output = stage.execute(contact()).await.unwrap();
        assert_eq!(output.notes.as_deref(), Some("none"));
    }

    #[tokio::test]
    async fn test_replace_pattern() {
        let stage = SanitizationStage::new(vec![
            SanitizationRule::replace_pattern("email", email, r"[^a-zA-Z0-9@.]", "_").unwrap(),
        ]);
        let mut input = contact();
        input.email = "a+b@c.d".into();

        assert_eq!(stage.execute(input).await.unwrap().email, "a_b@c.d");
        assert!(SanitizationRule::replace_pattern("email", email, "(", "").is_err());
    }

    #[tokio::test]
    async fn test_failing_sanitizer_names_field() {
        let stage = SanitizationStage::new(vec![
            SanitizationRule::trim("name", name),
            SanitizationRule::new("email", email, |_: String| -> anyhow::Result<String> {
                anyhow::bail!("bad email")
            }),
        ]);

        match stage.execute(contact()).await.unwrap_err() {
            StageFailure::Sanitization(err) => {
                assert_eq!(err.field, "email");
                assert_eq!(err.message, "Failed to sanitize field email");
            }
            other => panic!("expected sanitization failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_sanitizer_names_field() {
        let stage = SanitizationStage::new(vec![SanitizationRule::new(
            "name",
            name,
            |_: String| -> anyhow::Result<String> { panic!("boom") },
        )]);

        match stage.execute(contact()).await.unwrap_err() {
            StageFailure::Sanitization(err) => assert_eq!(err.field, "name"),
            other => panic!("expected sanitization failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scalar_input() {
        let stage: SanitizationStage<String> =
            SanitizationStage::new(vec![SanitizationRule::trim("value", |s: &mut String| s)]);
        assert_eq!(stage.execute("  x ".to_string()).await.unwrap(), "x");

        let passthrough: SanitizationStage<String> = SanitizationStage::new(Vec::new());
        assert_eq!(passthrough.execute("  x ".to_string()).await.unwrap(), "  x ");
    }
}
