//! Observability utilities.

mod subscriber;

pub use subscriber::{init_tracing, LogFormat};
