//! Cache decorator with single-flight deduplication.
//!
//! Concurrent executions that compute the same key share one pending
//! computation. The in-flight map is guarded by a mutex, and registration
//! (lookup, start, insert) happens under one lock acquisition, so a key never
//! has two computations running at once.
//!
//! The computation runs on its own tokio task. It settles and leaves the
//! in-flight map even when every caller waiting on it has been dropped.

use super::{guard_panics, Stage, StageValue};
use crate::cache::Cache;
use crate::errors::StageFailure;
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for [`CachingStage`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// TTL handed to [`Cache::set`] verbatim.
    pub ttl_seconds: Option<u64>,
}

impl CacheOptions {
    /// Creates options without a TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TTL in seconds.
    #[must_use]
    pub fn with_ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = Some(ttl);
        self
    }
}

type KeyFn<In> = Arc<dyn Fn(&In) -> String + Send + Sync>;
type SharedOutcome<Out> = Shared<BoxFuture<'static, Result<Out, StageFailure>>>;
type InFlightMap<Out> = Arc<Mutex<HashMap<String, InFlight<Out>>>>;

struct InFlight<Out> {
    id: u64,
    outcome: SharedOutcome<Out>,
}

/// Stage serving results of an inner stage from a [`Cache`].
///
/// On a miss the inner stage runs once and its output is stored with the
/// configured TTL. Every caller that arrives while that computation is
/// pending receives the same result, failure included. Failures are not
/// cached.
pub struct CachingStage<In, Out> {
    name: String,
    inner: Arc<dyn Stage<In, Out>>,
    cache: Arc<dyn Cache<Out>>,
    key_generator: KeyFn<In>,
    options: CacheOptions,
    in_flight: InFlightMap<Out>,
    next_id: AtomicU64,
}

impl<In, Out> CachingStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    /// Wraps `inner` with `cache`, addressing entries by `key_generator(input)`.
    ///
    /// Executing the stage must happen within a tokio runtime.
    pub fn new(
        inner: impl Stage<In, Out> + 'static,
        cache: impl Cache<Out> + 'static,
        key_generator: impl Fn(&In) -> String + Send + Sync + 'static,
        options: CacheOptions,
    ) -> Self {
        Self {
            name: "CachingStage".to_string(),
            inner: Arc::new(inner),
            cache: Arc::new(cache),
            key_generator: Arc::new(key_generator),
            options,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the options.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Returns the number of keys with a pending computation.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn start(&self, key: String, input: In, id: u64) -> SharedOutcome<Out> {
        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let ttl = self.options.ttl_seconds;

        let task = tokio::spawn(async move {
            let outcome = guard_panics(load(&*inner, &*cache, &key, input, ttl)).await;

            let mut pending = in_flight.lock();
            if pending.get(&key).is_some_and(|entry| entry.id == id) {
                pending.remove(&key);
            }
            drop(pending);

            outcome
        });

        task.map(|joined| {
            joined.unwrap_or_else(|err| {
                warn!(error = %err, "Cached computation did not finish");
                Err(StageFailure::Unknown { detail: Some(err.to_string()) })
            })
        })
        .boxed()
        .shared()
    }
}

async fn load<In, Out>(
    inner: &dyn Stage<In, Out>,
    cache: &dyn Cache<Out>,
    key: &str,
    input: In,
    ttl_seconds: Option<u64>,
) -> Result<Out, StageFailure>
where
    In: StageValue,
    Out: StageValue,
{
    if let Some(hit) = cache.get(key).await? {
        debug!(key, "Cache hit");
        return Ok(hit);
    }

    debug!(key, stage = %inner.name(), "Cache miss");
    let output = inner.execute(input).await?;
    cache.set(key, output.clone(), ttl_seconds).await?;
    Ok(output)
}

impl<In: StageValue, Out: StageValue> fmt::Debug for CachingStage<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingStage")
            .field("name", &self.name)
            .field("inner", &self.inner.name())
            .field("options", &self.options)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

#[async_trait]
impl<In, Out> Stage<In, Out> for CachingStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        let key = (self.key_generator)(&input);

        let outcome = {
            let mut pending = self.in_flight.lock();
            if let Some(entry) = pending.get(&key) {
                debug!(stage = %self.name, key = %key, "Joining in-flight computation");
                entry.outcome.clone()
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let outcome = self.start(key.clone(), input, id);
                pending.insert(key, InFlight {
                    id,
                    outcome: outcome.clone(),
                });
                outcome
            }
        };

        outcome.await
    }
}
