//! Mapping stages.

use super::{Stage, StageValue};
use crate::errors::{panic_detail, StageFailure, TransformationError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::warn;

type TransformFn<In, Out> = Arc<dyn Fn(In) -> BoxFuture<'static, anyhow::Result<Out>> + Send + Sync>;
type FallbackFn<In, Out> = Arc<dyn Fn(In) -> Out + Send + Sync>;

/// Stage applying a mapping function to its input.
///
/// Every failure of the function, including a panic, is wrapped into a
/// [`TransformationError`] that keeps the original cause.
///
/// Recovery policy: a [`TransformationError`] is logged and re-raised so it is
/// never wrapped twice.
///
/// By default every other failure is re-raised too. This differs from the
/// passthrough policy, where any other failure is recovered by returning the
/// input unchanged. Passthrough needs `In == Out`, so it is opt-in through
/// [`TransformationStage::passthrough_on_error`].
pub struct TransformationStage<In, Out> {
    name: String,
    transform: TransformFn<In, Out>,
    fallback: Option<FallbackFn<In, Out>>,
}

impl<In, Out> TransformationStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    /// Creates a stage from a synchronous, fallible function.
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(In) -> anyhow::Result<Out> + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        Self {
            name: "TransformationStage".to_string(),
            transform: Arc::new(move |input: In| {
                let transform = Arc::clone(&transform);
                async move { transform(input) }.boxed()
            }),
            fallback: None,
        }
    }

    /// Creates a stage from an async, fallible function.
    pub fn from_async<F, Fut>(transform: F) -> Self
    where
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        Self {
            name: "TransformationStage".to_string(),
            transform: Arc::new(move |input: In| transform(input).boxed()),
            fallback: None,
        }
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: StageValue> TransformationStage<T, T> {
    /// Recovers from failures other than [`TransformationError`] by returning
    /// the input unchanged.
    #[must_use]
    pub fn passthrough_on_error(mut self) -> Self {
        self.fallback = Some(Arc::new(|input: T| input));
        self
    }
}

impl<In, Out> fmt::Debug for TransformationStage<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationStage")
            .field("name", &self.name)
            .field("passthrough", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl<In, Out> Stage<In, Out> for TransformationStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        let outcome = AssertUnwindSafe(async { (self.transform)(input).await })
            .catch_unwind()
            .await;

        let cause = match outcome {
            Ok(Ok(output)) => return Ok(output),
            Ok(Err(err)) => err,
            Err(payload) => anyhow::anyhow!(panic_detail(&*payload)
                .unwrap_or_else(|| "transformation panicked".to_string())),
        };

        Err(TransformationError::new("Transformation failed", cause).into())
    }

    fn has_error_handler(&self) -> bool {
        true
    }

    async fn handle_error(&self, error: StageFailure, context: In) -> Result<Out, StageFailure> {
        if let StageFailure::Transformation(err) = &error {
            warn!(stage = %self.name, cause = %err.cause(), "Transformation errors");
            return Err(error);
        }

        match &self.fallback {
            Some(fallback) => Ok(fallback(context)),
            None => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        value: i64,
    }

    #[tokio::test]
    async fn test_sync_transform() {
        let stage = TransformationStage::new(|item: Item| {
            Ok(Item {
                value: item.value * 2,
                ..item
            })
        });

        let output = stage
            .execute(Item {
                id: "123".into(),
                value: 42,
            })
            .await
            .unwrap();
        assert_eq!(output.value, 84);
        assert_eq!(output.id, "123");
    }

    #[tokio::test]
    async fn test_async_transform_changes_type() {
        let stage = TransformationStage::from_async(|x: u64| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(format!("v{x}"))
        });

        assert_eq!(stage.execute(7).await.unwrap(), "v7");
    }

    #[tokio::test]
    async fn test_error_is_wrapped_with_cause() {
        let stage = TransformationStage::new(|x: i32| -> anyhow::Result<i32> {
            anyhow::bail!("cannot map {x}")
        });

        match stage.execute(3).await.unwrap_err() {
            StageFailure::Transformation(err) => {
                assert_eq!(err.message(), "Transformation failed");
                assert_eq!(err.cause().to_string(), "cannot map 3");
            }
            other => panic!("expected transformation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_is_wrapped() {
        let stage = TransformationStage::new(|_: i32| -> anyhow::Result<i32> { panic!("raw string") });

        match stage.execute(3).await.unwrap_err() {
            StageFailure::Transformation(err) => assert_eq!(err.cause().to_string(), "raw string"),
            other => panic!("expected transformation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_error_reraises_transformation_errors() {
        let stage = TransformationStage::new(|x: i32| Ok(x)).passthrough_on_error();
        let failure: StageFailure =
            TransformationError::new("Transformation failed", anyhow::anyhow!("x")).into();

        let err = stage.handle_error(failure, 5).await.unwrap_err();
        assert_eq!(err.name(), "TransformationError");
    }

    #[tokio::test]
    async fn test_handle_error_passes_context_through_for_other_errors() {
        let stage = TransformationStage::new(|x: i32| Ok(x + 1)).passthrough_on_error();
        let recovered = stage.handle_error(StageFailure::msg("generic"), 5).await;
        assert_eq!(recovered.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_handle_error_without_passthrough_reraises() {
        let stage = TransformationStage::new(|x: i32| Ok(x.to_string()));
        let err = stage
            .handle_error(StageFailure::msg("generic"), 5)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "generic");
    }
}
