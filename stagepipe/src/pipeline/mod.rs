//! Pipeline building and execution.
//!
//! This module provides:
//! - The type-chained [`Pipeline`] builder
//! - The sequential execution engine with per-stage recovery
//! - [`Execution`], the lazy single-value result of a run, and its subscribers

mod builder;
mod engine;
mod execution;

pub use builder::Pipeline;
pub use execution::{CallbackSubscriber, Execution, Subscriber, Subscription};
