//! The single-value result of a pipeline run.
//!
//! An [`Execution`] is lazy: no stage runs until it is awaited or subscribed.
//! Dropping it (or unsubscribing) abandons the run, including any retry
//! backoff timer a stage is waiting on.

use crate::errors::PipelineError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// A pending pipeline run resolving to exactly one output or one error.
#[must_use = "an execution does nothing until it is awaited or subscribed"]
pub struct Execution<T> {
    future: BoxFuture<'static, Result<T, PipelineError>>,
}

impl<T> Execution<T>
where
    T: Send + 'static,
{
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        Self {
            future: future.boxed(),
        }
    }

    /// Starts the run on the tokio runtime and reports its outcome to `subscriber`.
    ///
    /// The subscriber receives either `on_next` followed by `on_complete`, or a
    /// single `on_error`. Must be called from within a tokio runtime.
    pub fn subscribe<S>(self, mut subscriber: S) -> Subscription
    where
        S: Subscriber<T> + 'static,
    {
        let handle = tokio::spawn(async move {
            match self.await {
                Ok(value) => {
                    subscriber.on_next(value);
                    subscriber.on_complete();
                }
                Err(error) => subscriber.on_error(error),
            }
        });

        Subscription { handle }
    }
}

impl<T> Future for Execution<T> {
    type Output = Result<T, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for Execution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution").finish_non_exhaustive()
    }
}

/// Receiver of the terminal event of a subscribed [`Execution`].
pub trait Subscriber<T>: Send {
    /// Receives the final output.
    fn on_next(&mut self, value: T);

    /// Receives the pipeline failure. No other event follows.
    fn on_error(&mut self, error: PipelineError);

    /// Called after `on_next`.
    fn on_complete(&mut self) {}
}

type NextFn<T> = Box<dyn FnMut(T) + Send>;
type ErrorFn = Box<dyn FnMut(PipelineError) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;

/// A [`Subscriber`] assembled from optional closures.
pub struct CallbackSubscriber<T> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T> CallbackSubscriber<T> {
    /// Creates a subscriber that ignores every event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    /// Sets the output callback.
    #[must_use]
    pub fn with_next(mut self, callback: impl FnMut(T) + Send + 'static) -> Self {
        self.next = Some(Box::new(callback));
        self
    }

    /// Sets the error callback.
    #[must_use]
    pub fn with_error(mut self, callback: impl FnMut(PipelineError) + Send + 'static) -> Self {
        self.error = Some(Box::new(callback));
        self
    }

    /// Sets the completion callback.
    #[must_use]
    pub fn with_complete(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.complete = Some(Box::new(callback));
        self
    }
}

impl<T> Default for CallbackSubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CallbackSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSubscriber")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

impl<T> Subscriber<T> for CallbackSubscriber<T> {
    fn on_next(&mut self, value: T) {
        if let Some(callback) = self.next.as_mut() {
            callback(value);
        }
    }

    fn on_error(&mut self, error: PipelineError) {
        if let Some(callback) = self.error.as_mut() {
            callback(error);
        }
    }

    fn on_complete(&mut self) {
        if let Some(callback) = self.complete.as_mut() {
            callback();
        }
    }
}

/// Handle to a subscribed run.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Abandons the run. The subscriber receives no further events.
    pub fn unsubscribe(&self) {
        self.handle.abort();
    }

    /// Returns true once the run has delivered its terminal event or was abandoned.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits until the run has finished or was abandoned.
    pub async fn closed(self) {
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                tracing::warn!(error = %err, "Subscriber task terminated abnormally");
            }
        }
    }
}
