//! Sequential execution over a type-erased stage list.

use crate::errors::{PipelineError, StageError, StageFailure};
use crate::stages::{guard_panics, Stage, StageValue};
use async_trait::async_trait;
use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

/// A value travelling between stages with its static type erased.
pub(crate) type Payload = Arc<dyn Any + Send + Sync>;

/// Object-safe view of a [`Stage`] used inside the pipeline's stage list.
#[async_trait]
pub(crate) trait ErasedStage: Send + Sync {
    fn name(&self) -> &str;

    fn has_error_handler(&self) -> bool;

    /// Renders a payload for diagnostics.
    fn describe(&self, payload: &Payload) -> String;

    async fn execute(&self, payload: &Payload) -> Result<Payload, StageFailure>;

    async fn handle_error(
        &self,
        error: StageFailure,
        payload: &Payload,
    ) -> Result<Payload, StageFailure>;
}

/// Adapter restoring the static types of a stage.
pub(crate) struct TypedStage<S, In, Out> {
    stage: S,
    _types: PhantomData<fn(In) -> Out>,
}

impl<S, In, Out> TypedStage<S, In, Out>
where
    S: Stage<In, Out>,
    In: StageValue,
    Out: StageValue,
{
    pub(crate) fn new(stage: S) -> Self {
        Self {
            stage,
            _types: PhantomData,
        }
    }

    fn input(payload: &Payload) -> Result<In, StageFailure> {
        payload.downcast_ref::<In>().cloned().ok_or_else(|| {
            StageFailure::msg(format!(
                "stage input is not a value of type {}",
                type_name::<In>()
            ))
        })
    }
}

#[async_trait]
impl<S, In, Out> ErasedStage for TypedStage<S, In, Out>
where
    S: Stage<In, Out>,
    In: StageValue,
    Out: StageValue,
{
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn has_error_handler(&self) -> bool {
        self.stage.has_error_handler()
    }

    fn describe(&self, payload: &Payload) -> String {
        payload
            .downcast_ref::<In>()
            .map_or_else(|| format!("<{}>", type_name::<In>()), |value| format!("{value:?}"))
    }

    async fn execute(&self, payload: &Payload) -> Result<Payload, StageFailure> {
        let input = Self::input(payload)?;
        let output = self.stage.execute(input).await?;
        Ok(Arc::new(output) as Payload)
    }

    async fn handle_error(
        &self,
        error: StageFailure,
        payload: &Payload,
    ) -> Result<Payload, StageFailure> {
        let context = Self::input(payload)?;
        let recovered = self.stage.handle_error(error, context).await?;
        Ok(Arc::new(recovered) as Payload)
    }
}

/// Runs every stage in order, feeding each output into the next stage.
///
/// Recovery happens in place: a stage whose `handle_error` succeeds hands its
/// recovered value to the next stage exactly as a successful `execute` would.
pub(crate) async fn run_stages(
    pipeline: &str,
    stages: &[Arc<dyn ErasedStage>],
    input: Payload,
) -> Result<Payload, PipelineError> {
    let run_id = Uuid::new_v4();
    let span = info_span!("pipeline.execute", pipeline = %pipeline, %run_id, stages = stages.len());

    async move {
        let mut result = input;

        for (index, stage) in stages.iter().enumerate() {
            debug!(stage = stage.name(), index, "Stage started");
            let started = Instant::now();

            let failure = match guard_panics(stage.execute(&result)).await {
                Ok(output) => {
                    debug!(
                        stage = stage.name(),
                        index,
                        duration_ms = millis_since(started),
                        "Stage completed"
                    );
                    result = output;
                    continue;
                }
                Err(failure) => failure,
            };

            let stage_error = StageError::new(
                stage.name(),
                failure.clone(),
                Arc::clone(&result),
                stage.describe(&result),
            );

            if !stage.has_error_handler() {
                error!(
                    stage = stage.name(),
                    index,
                    error = %failure,
                    duration_ms = millis_since(started),
                    "Stage failed"
                );
                return Err(PipelineError::new(stage_error));
            }

            warn!(
                stage = stage.name(),
                index,
                error = %failure,
                "Stage failed, attempting recovery"
            );

            match guard_panics(stage.handle_error(failure, &result)).await {
                Ok(recovered) => {
                    debug!(
                        stage = stage.name(),
                        index,
                        duration_ms = millis_since(started),
                        "Stage recovered"
                    );
                    result = recovered;
                }
                Err(recovery) => {
                    error!(
                        stage = stage.name(),
                        index,
                        error = %recovery,
                        duration_ms = millis_since(started),
                        "Stage recovery failed"
                    );
                    return Err(PipelineError::new(stage_error.recovery_failed(recovery)));
                }
            }
        }

        Ok(result)
    }
    .instrument(span)
    .await
}

/// Wall-clock time since `started`, in fractional milliseconds.
fn millis_since(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Recovers the statically typed output of a finished run.
pub(crate) fn into_output<Out: StageValue>(
    pipeline: &str,
    payload: Payload,
) -> Result<Out, PipelineError> {
    match payload.downcast::<Out>() {
        Ok(output) => Ok(Arc::try_unwrap(output).unwrap_or_else(|shared| Out::clone(&shared))),
        Err(payload) => {
            let failure = StageFailure::msg(format!(
                "pipeline output is not a value of type {}",
                type_name::<Out>()
            ));
            Err(PipelineError::new(StageError::new(
                pipeline,
                failure,
                payload,
                "<opaque>",
            )))
        }
    }
}
