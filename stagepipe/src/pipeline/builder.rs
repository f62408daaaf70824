//! Type-chained pipeline construction.

use super::engine::{into_output, run_stages, ErasedStage, TypedStage};
use super::execution::Execution;
use crate::stages::{Stage, StageValue};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// An ordered sequence of stages turning an `In` into an `Out`.
///
/// Each [`Pipeline::add_stage`] call consumes the pipeline and returns one
/// whose output type is the new stage's output type, so a stage can only be
/// appended if it accepts what the previous stage produces. The stage list
/// itself is type-erased.
///
/// A pipeline owns no data between runs; every [`Pipeline::execute`] call is
/// independent and many may be in flight at once.
pub struct Pipeline<In, Out> {
    name: Arc<str>,
    stages: Vec<Arc<dyn ErasedStage>>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<T: StageValue> Pipeline<T, T> {
    /// Creates an empty pipeline. Executing it returns the input unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::named("pipeline")
    }

    /// Creates an empty pipeline with a name used in diagnostics.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            stages: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<T: StageValue> Default for Pipeline<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> Pipeline<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    /// Appends a stage consuming this pipeline's current output type.
    #[must_use]
    pub fn add_stage<Next, S>(mut self, stage: S) -> Pipeline<In, Next>
    where
        Next: StageValue,
        S: Stage<Out, Next> + 'static,
    {
        self.stages.push(Arc::new(TypedStage::new(stage)));
        Pipeline {
            name: self.name,
            stages: self.stages,
            _types: PhantomData,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Returns the name of the stage at `index`.
    #[must_use]
    pub fn stage_name(&self, index: usize) -> Option<&str> {
        self.stages.get(index).map(|stage| stage.name())
    }

    /// Runs every stage over `input`.
    ///
    /// Nothing happens until the returned [`Execution`] is awaited or
    /// subscribed.
    pub fn execute(&self, input: In) -> Execution<Out> {
        let name = Arc::clone(&self.name);
        let stages = self.stages.clone();

        Execution::new(async move {
            let output = run_stages(&name, &stages, Arc::new(input)).await?;
            into_output::<Out>(&name, output)
        })
    }
}

impl<In, Out> Clone for Pipeline<In, Out> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            stages: self.stages.clone(),
            _types: PhantomData,
        }
    }
}

impl<In, Out> fmt::Debug for Pipeline<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|stage| stage.name()).collect();
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &names)
            .finish()
    }
}
