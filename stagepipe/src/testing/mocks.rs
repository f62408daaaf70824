//! Mock stages and collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, InMemoryCache};
use crate::errors::StageFailure;
use crate::stages::{Delay, Logger, Stage, StageValue};

/// A mock stage with scripted outcomes that records every call.
///
/// Outcomes queued with [`MockStage::then_ok`] / [`MockStage::then_err`] are
/// consumed first, in order; after that the fallback set by
/// [`MockStage::returning`] or [`MockStage::failing`] is used.
#[derive(Debug)]
pub struct MockStage<In, Out> {
    name: String,
    script: Mutex<VecDeque<Result<Out, StageFailure>>>,
    fallback: Option<Result<Out, StageFailure>>,
    panic_message: Option<&'static str>,
    latency: Option<Duration>,
    inputs: Mutex<Vec<In>>,
}

impl<In, Out> MockStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    /// Creates a mock stage without outcomes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            panic_message: None,
            latency: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful outcome.
    #[must_use]
    pub fn then_ok(self, output: Out) -> Self {
        self.script.lock().push_back(Ok(output));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn then_err(self, failure: StageFailure) -> Self {
        self.script.lock().push_back(Err(failure));
        self
    }

    /// Returns `output` once the script is exhausted.
    #[must_use]
    pub fn returning(mut self, output: Out) -> Self {
        self.fallback = Some(Ok(output));
        self
    }

    /// Fails with `failure` once the script is exhausted.
    #[must_use]
    pub fn failing(mut self, failure: StageFailure) -> Self {
        self.fallback = Some(Err(failure));
        self
    }

    /// Panics with `message` on every call.
    #[must_use]
    pub fn panicking(mut self, message: &'static str) -> Self {
        self.panic_message = Some(message);
        self
    }

    /// Sleeps for `latency` before producing each outcome.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns the inputs of every call, in order.
    #[must_use]
    pub fn inputs(&self) -> Vec<In> {
        self.inputs.lock().clone()
    }

    fn next_outcome(&self) -> Result<Out, StageFailure> {
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        self.fallback.clone().unwrap_or_else(|| {
            Err(StageFailure::msg(format!(
                "{} has no scripted outcome",
                self.name
            )))
        })
    }
}

#[async_trait]
impl<In, Out> Stage<In, Out> for MockStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        self.inputs.lock().push(input);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = self.panic_message {
            panic!("{message}");
        }
        self.next_outcome()
    }
}

type Recovery<In, Out> = Arc<dyn Fn(In) -> Result<Out, StageFailure> + Send + Sync>;

/// A stage that always fails, with an optional recovery hook.
pub struct FailingStage<In, Out> {
    name: String,
    message: String,
    recovery: Option<Recovery<In, Out>>,
    recovered: AtomicBool,
}

impl<In, Out> FailingStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    /// Creates a stage failing with `message` and no recovery hook.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            recovery: None,
            recovered: AtomicBool::new(false),
        }
    }

    /// Installs a recovery hook that maps the failed input.
    #[must_use]
    pub fn recovering_with(
        mut self,
        recovery: impl Fn(In) -> Result<Out, StageFailure> + Send + Sync + 'static,
    ) -> Self {
        self.recovery = Some(Arc::new(recovery));
        self
    }

    /// Returns true once the recovery hook has been called.
    #[must_use]
    pub fn recovery_called(&self) -> bool {
        self.recovered.load(Ordering::SeqCst)
    }
}

impl<In, Out> std::fmt::Debug for FailingStage<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingStage")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("recovers", &self.recovery.is_some())
            .finish()
    }
}

#[async_trait]
impl<In, Out> Stage<In, Out> for FailingStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: In) -> Result<Out, StageFailure> {
        Err(StageFailure::msg(self.message.clone()))
    }

    fn has_error_handler(&self) -> bool {
        self.recovery.is_some()
    }

    async fn handle_error(&self, error: StageFailure, context: In) -> Result<Out, StageFailure> {
        self.recovered.store(true, Ordering::SeqCst);
        match &self.recovery {
            Some(recovery) => recovery(context),
            None => Err(error),
        }
    }
}

/// A [`Delay`] that records requested waits and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingDelay {
    /// Creates a new recording delay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every requested wait, in order.
    #[must_use]
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().clone()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn wait(&self, duration: Duration) {
        self.waits.lock().push(duration);
    }
}

/// A [`Logger`] keeping every record in memory.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    infos: Mutex<Vec<(String, Option<Value>)>>,
    errors: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingLogger {
    /// Creates a new recording logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `info` records.
    #[must_use]
    pub fn infos(&self) -> Vec<(String, Option<Value>)> {
        self.infos.lock().clone()
    }

    /// Returns the `error` records with the rendered error.
    #[must_use]
    pub fn errors(&self) -> Vec<(String, Option<String>)> {
        self.errors.lock().clone()
    }
}

impl Logger for RecordingLogger {
    fn info(&self, message: &str, data: Option<&Value>) {
        self.infos
            .lock()
            .push((message.to_string(), data.cloned()));
    }

    fn error(&self, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.errors
            .lock()
            .push((message.to_string(), error.map(ToString::to_string)));
    }
}

/// A [`Cache`] over [`InMemoryCache`] recording every call.
#[derive(Debug)]
pub struct RecordingCache<V> {
    store: InMemoryCache<V>,
    gets: Mutex<Vec<String>>,
    sets: Mutex<Vec<(String, Option<u64>)>>,
    force_miss: bool,
    get_error: Option<String>,
}

impl<V> RecordingCache<V> {
    /// Creates an empty recording cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: InMemoryCache::new(),
            gets: Mutex::new(Vec::new()),
            sets: Mutex::new(Vec::new()),
            force_miss: false,
            get_error: None,
        }
    }

    /// Makes every `get` report a miss.
    #[must_use]
    pub fn always_miss(mut self) -> Self {
        self.force_miss = true;
        self
    }

    /// Makes every `get` fail with `message`.
    #[must_use]
    pub fn failing_get(mut self, message: impl Into<String>) -> Self {
        self.get_error = Some(message.into());
        self
    }

    /// Returns the keys passed to `get`.
    #[must_use]
    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().clone()
    }

    /// Returns the keys and TTLs passed to `set`.
    #[must_use]
    pub fn sets(&self) -> Vec<(String, Option<u64>)> {
        self.sets.lock().clone()
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &InMemoryCache<V> {
        &self.store
    }
}

impl<V> Default for RecordingCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Cache<V> for RecordingCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>> {
        self.gets.lock().push(key.to_string());
        if let Some(message) = &self.get_error {
            anyhow::bail!("{message}");
        }
        if self.force_miss {
            return Ok(None);
        }
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: V, ttl_seconds: Option<u64>) -> anyhow::Result<()> {
        self.sets.lock().push((key.to_string(), ttl_seconds));
        self.store.set(key, value, ttl_seconds).await
    }
}
