//! Testing utilities for stagepipe pipelines.
//!
//! This module provides:
//! - Scripted mock stages
//! - Recording doubles for the delay, logger and cache collaborators
//! - Assertions over pipeline failures

mod assertions;
mod mocks;

pub use assertions::{
    assert_error_name, assert_failed_at, assert_unknown_failure, assert_violation,
};
pub use mocks::{FailingStage, MockStage, RecordingCache, RecordingDelay, RecordingLogger};
