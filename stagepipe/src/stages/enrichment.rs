//! Enrichment from external sources.

use super::{Stage, StageValue};
use crate::errors::{panic_detail, EnrichmentError, StageFailure};
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use tracing::debug;

/// An external collaborator that augments a value.
#[async_trait]
pub trait EnrichmentSource<In, Out>: Send + Sync
where
    In: StageValue,
    Out: StageValue,
{
    /// Name reported in [`EnrichmentError`].
    fn name(&self) -> &str;

    /// Produces the enriched value.
    async fn enrich(&self, input: In) -> anyhow::Result<Out>;
}

/// A source backed by an async closure.
pub struct FnSource<In, Out, F> {
    name: String,
    func: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F, Fut> FnSource<In, Out, F>
where
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Out>> + Send,
{
    /// Creates a named closure source.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> fmt::Debug for FnSource<In, Out, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<In, Out, F, Fut> EnrichmentSource<In, Out> for FnSource<In, Out, F>
where
    In: StageValue,
    Out: StageValue,
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Out>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn enrich(&self, input: In) -> anyhow::Result<Out> {
        (self.func)(input).await
    }
}

/// Stage delegating to an [`EnrichmentSource`].
///
/// Source errors and panics never leave the stage as-is; they are always
/// reported as an [`EnrichmentError`] naming the source.
pub struct EnrichmentStage<In, Out> {
    name: String,
    source: Box<dyn EnrichmentSource<In, Out>>,
}

impl<In, Out> EnrichmentStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    /// Creates an enrichment stage.
    pub fn new(source: impl EnrichmentSource<In, Out> + 'static) -> Self {
        Self {
            name: "EnrichmentStage".to_string(),
            source: Box::new(source),
        }
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the source name.
    pub fn source_name(&self) -> &str {
        self.source.name()
    }
}

impl<In: StageValue, Out: StageValue> fmt::Debug for EnrichmentStage<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentStage")
            .field("name", &self.name)
            .field("source", &self.source.name())
            .finish()
    }
}

#[async_trait]
impl<In, Out> Stage<In, Out> for EnrichmentStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        let outcome = AssertUnwindSafe(self.source.enrich(input))
            .catch_unwind()
            .await;

        let reason = match outcome {
            Ok(Ok(output)) => return Ok(output),
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_detail(&*payload).unwrap_or_else(|| "source panicked".to_string()),
        };

        debug!(stage = %self.name, source = %self.source.name(), %reason, "Enrichment source failed");
        Err(EnrichmentError::new(self.source.name(), reason).into())
    }
}
