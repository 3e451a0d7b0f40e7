//! A uniform hook for outbound-call telemetry, implemented by whichever
//! collaborator makes the call (the provider client, a CRM adapter) and
//! invoked around each attempt. Kept separate from `tracing`'s ambient
//! macros so a caller can additionally aggregate into counters/timers
//! without every call site growing its own bookkeeping.

use std::time::Duration;

use leadline_error::PipelineError;
use tracing::debug;
use tracing::warn;

/// Reports one attempt's outcome, a scheduled retry, or final exhaustion
/// for a named outbound operation (e.g. `"provider.get_call_details"`,
/// `"crm.create_or_update_lead"`).
pub trait RequestTelemetry: Send + Sync {
    fn on_attempt(&self, operation: &str, attempt: u32, error: Option<&PipelineError>, duration: Duration);
    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration);
    fn on_exhausted(&self, operation: &str, attempt: u32, error: &PipelineError);
}

/// Discards every event. The default for call sites that don't need
/// telemetry beyond the `tracing` events already emitted around them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRequestTelemetry;

impl RequestTelemetry for NoopRequestTelemetry {
    fn on_attempt(&self, _operation: &str, _attempt: u32, _error: Option<&PipelineError>, _duration: Duration) {}
    fn on_retry(&self, _operation: &str, _attempt: u32, _delay: Duration) {}
    fn on_exhausted(&self, _operation: &str, _attempt: u32, _error: &PipelineError) {}
}

/// Emits each event as a `tracing` event rather than aggregating it
/// anywhere, for deployments with no metrics backend wired up yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRequestTelemetry;

impl RequestTelemetry for TracingRequestTelemetry {
    fn on_attempt(&self, operation: &str, attempt: u32, error: Option<&PipelineError>, duration: Duration) {
        match error {
            Some(error) => {
                debug!(operation, attempt, %error, ?duration, "outbound attempt failed");
            }
            None => {
                debug!(operation, attempt, ?duration, "outbound attempt succeeded");
            }
        }
    }

    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration) {
        debug!(operation, attempt, ?delay, "outbound attempt scheduled for retry");
    }

    fn on_exhausted(&self, operation: &str, attempt: u32, error: &PipelineError) {
        warn!(operation, attempt, %error, "outbound operation exhausted its retry budget");
    }
}
