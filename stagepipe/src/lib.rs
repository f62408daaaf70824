//! # Stagepipe
//!
//! Typed, composable processing pipelines.
//!
//! A pipeline is an ordered list of stages applied to one input value to
//! produce one output value. Stagepipe provides:
//!
//! - **Type-chained composition**: each stage must accept what the previous one produces
//! - **Per-stage recovery**: stages may turn their own failures into values
//! - **Decorators**: retry with exponential backoff, caching with single-flight deduplication
//! - **Ready-made stages**: validation, transformation, sanitization, enrichment and masked logging
//! - **Structured failures**: one [`PipelineError`](errors::PipelineError) per failed run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagepipe::prelude::*;
//!
//! let pipeline = Pipeline::new()
//!     .add_stage(ValidationStage::new().require("must be positive", |x: &i32| *x > 0))
//!     .add_stage(TransformationStage::new(|x: i32| Ok(x * 2)));
//!
//! assert_eq!(pipeline.execute(5).await?, 10);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{hashed_key, Cache, InMemoryCache};
    pub use crate::errors::{
        EnrichmentError, PipelineError, RetryError, SanitizationError, StageError,
        StageFailure, TransformationError, ValidationError,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{CallbackSubscriber, Execution, Pipeline, Subscriber, Subscription};
    pub use crate::stages::{
        AsyncFnStage, CacheOptions, CachingStage, Delay, EnrichmentSource, EnrichmentStage,
        FnRule, FnSource, FnStage, Logger, LoggingOptions, LoggingStage, PredicateRule,
        RetryConfig, RetryPolicy, RetryStage, SanitizationRule, SanitizationStage, Stage,
        StageValue, TokioDelay, TracingLogger, TransformationStage, ValidationRule,
        ValidationStage,
    };
}
