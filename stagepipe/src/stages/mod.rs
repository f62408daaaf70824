//! Stage trait and implementations.
//!
//! Stages are the units of work a [`Pipeline`](crate::pipeline::Pipeline)
//! runs in order. Each stage turns one typed input into one typed output and
//! may declare a recovery hook that the pipeline calls when `execute` fails.

use crate::errors::StageFailure;
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

mod caching;
mod enrichment;
mod logging;
mod masking;
mod retry;
mod sanitization;
mod transformation;
mod validation;

pub use caching::{CacheOptions, CachingStage};
pub use enrichment::{EnrichmentSource, EnrichmentStage, FnSource};
pub use logging::{Logger, LoggingOptions, LoggingStage, TracingLogger};
pub use masking::{mask_value, DEFAULT_MASK, WILDCARD};
pub use retry::{Delay, RetryConfig, RetryPolicy, RetryStage, TokioDelay};
pub use sanitization::{SanitizationRule, SanitizationStage};
pub use transformation::TransformationStage;
pub use validation::{FnRule, PredicateRule, ValidationRule, ValidationStage};

/// Bound shared by every value that flows between stages.
///
/// `Clone` lets the pipeline keep the value fed into a stage as failure
/// context and lets decorators re-feed an input on every attempt.
pub trait StageValue: Clone + Debug + Send + Sync + 'static {}

impl<T> StageValue for T where T: Clone + Debug + Send + Sync + 'static {}

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage<In, Out>: Send + Sync
where
    In: StageValue,
    Out: StageValue,
{
    /// Returns the name of the stage. Used only for diagnostics.
    fn name(&self) -> &str;

    /// Executes the stage.
    async fn execute(&self, input: In) -> Result<Out, StageFailure>;

    /// Returns true if the pipeline should hand failures to [`Stage::handle_error`].
    fn has_error_handler(&self) -> bool {
        false
    }

    /// Attempts to recover from a failure of [`Stage::execute`].
    ///
    /// `context` is the input the failed call received. Returning `Ok` lets the
    /// pipeline continue with the recovered value.
    async fn handle_error(&self, error: StageFailure, _context: In) -> Result<Out, StageFailure> {
        Err(error)
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for Arc<S>
where
    In: StageValue,
    Out: StageValue,
    S: Stage<In, Out> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        (**self).execute(input).await
    }

    fn has_error_handler(&self) -> bool {
        (**self).has_error_handler()
    }

    async fn handle_error(&self, error: StageFailure, context: In) -> Result<Out, StageFailure> {
        (**self).handle_error(error, context).await
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for Box<S>
where
    In: StageValue,
    Out: StageValue,
    S: Stage<In, Out> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        (**self).execute(input).await
    }

    fn has_error_handler(&self) -> bool {
        (**self).has_error_handler()
    }

    async fn handle_error(&self, error: StageFailure, context: In) -> Result<Out, StageFailure> {
        (**self).handle_error(error, context).await
    }
}

/// Runs a stage future, turning a panic into [`StageFailure::Unknown`].
pub(crate) async fn guard_panics<T, F>(future: F) -> Result<T, StageFailure>
where
    F: Future<Output = Result<T, StageFailure>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(StageFailure::from_panic(&*payload)),
    }
}

/// A stage backed by a synchronous closure.
pub struct FnStage<In, Out, F> {
    name: String,
    func: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> FnStage<In, Out, F>
where
    F: Fn(In) -> Result<Out, StageFailure> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> Debug for FnStage<In, Out, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<In, Out, F> Stage<In, Out> for FnStage<In, Out, F>
where
    In: StageValue,
    Out: StageValue,
    F: Fn(In) -> Result<Out, StageFailure> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        (self.func)(input)
    }
}

/// A stage backed by an async closure.
pub struct AsyncFnStage<In, Out, F> {
    name: String,
    func: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F, Fut> AsyncFnStage<In, Out, F>
where
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Out, StageFailure>> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> Debug for AsyncFnStage<In, Out, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<In, Out, F, Fut> Stage<In, Out> for AsyncFnStage<In, Out, F>
where
    In: StageValue,
    Out: StageValue,
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Out, StageFailure>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        (self.func)(input).await
    }
}
