//! Process-wide structured logging setup.
//!
//! One call at process start wires `tracing` to stderr with an
//! environment-driven filter. Every stage transition, rate-limiter wait,
//! and lease event elsewhere in the workspace goes through `tracing`'s
//! macros directly; this crate only owns the subscriber wiring so there is
//! exactly one place that decides the output format.

mod telemetry;

pub use telemetry::NoopRequestTelemetry;
pub use telemetry::RequestTelemetry;
pub use telemetry::TracingRequestTelemetry;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, for local development.
    #[default]
    Pretty,
    /// One JSON object per line, for ingestion by a log shipper.
    Json,
}

/// Initializes the global `tracing` subscriber.
///
/// `RUST_LOG` (or `LEADLINE_LOG`, checked first) controls the filter;
/// defaults to `info` when neither is set. Safe to call at most once per
/// process — a second call is a logic error in the caller, not something
/// this crate tries to paper over, so it returns `Err` rather than
/// panicking or silently no-op-ing.
pub fn init(format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_env("LEADLINE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
    }
}
