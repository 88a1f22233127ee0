//! # pdfrag-telemetry
//!
//! Logging setup for the `pdfrag` binary and an in-memory layer that records
//! spans and events so tests can assert on what the pipeline reported.
//!
//! ```rust,ignore
//! use pdfrag_telemetry::{LogFormat, init_telemetry};
//!
//! init_telemetry(LogFormat::Json, "info,pdfrag=debug")?;
//! tracing::info!(collection = "pdf_documents", "ready");
//! ```

mod capture;

pub use capture::{CaptureLayer, CapturedEvent, CapturedSpan, TraceCapture};

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Pretty,
    /// One JSON object per event, with the current span attached.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected 'pretty' or 'json'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `default_filter` when the
/// variable is unset or unparsable.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber. Output goes to stderr so stdout stays free
/// for command results.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(format: LogFormat, default_filter: &str) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}
