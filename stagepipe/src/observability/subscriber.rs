//! `tracing` subscriber setup for binaries and tests embedding pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format of the installed subscriber.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per record.
    Json,
    /// Human-readable output.
    #[default]
    Terminal,
}

impl LogFormat {
    /// Builds a formatting layer filtered by `filter`.
    pub fn layer(self, filter: EnvFilter) -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
        match self {
            Self::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(filter)
                .boxed(),
            Self::Terminal => tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(filter)
                .boxed(),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "terminal" => Ok(Self::Terminal),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Installs a global subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Returns false if a
/// global subscriber was already installed, in which case nothing changes.
pub fn init_tracing(format: LogFormat, default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(format.layer(filter))
        .try_init()
        .is_ok()
}
