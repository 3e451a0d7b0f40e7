//! Environment variable overrides for [`crate::AppConfig`].
//!
//! Every field is independently overridable so an operator can tune e.g.
//! just the rate limit without supplying a whole config file. Unset
//! variables leave the field at whatever the file/default layer already
//! produced.

use std::env;
use std::time::Duration;

use crate::AppConfig;

pub const ENV_BIND_ADDR: &str = "LEADLINE_BIND_ADDR";
pub const ENV_WORKER_COUNT: &str = "LEADLINE_WORKER_COUNT";
pub const ENV_TENANT_CONCURRENCY_LIMIT: &str = "LEADLINE_TENANT_CONCURRENCY_LIMIT";
pub const ENV_TENANT_QUEUE_CAPACITY: &str = "LEADLINE_TENANT_QUEUE_CAPACITY";
pub const ENV_PROVIDER_RATE_LIMIT_PER_MINUTE: &str = "LEADLINE_PROVIDER_RATE_LIMIT_PER_MINUTE";
pub const ENV_PROVIDER_GLOBAL_INFLIGHT_CEILING: &str = "LEADLINE_PROVIDER_GLOBAL_INFLIGHT_CEILING";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "LEADLINE_RETRY_MAX_ATTEMPTS";
pub const ENV_REQUEST_DEADLINE_SECS: &str = "LEADLINE_REQUEST_DEADLINE_SECS";
pub const ENV_LEASE_DURATION_SECS: &str = "LEADLINE_LEASE_DURATION_SECS";

/// Applies `LEADLINE_*` environment variable overrides onto `config` in
/// place. Malformed values are logged and ignored rather than failing
/// startup — an operator typo in one knob should not prevent the service
/// from booting with everything else configured correctly.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(v) = parse_env(ENV_BIND_ADDR) {
        config.bind_addr.0 = v;
    }
    if let Some(v) = parse_env(ENV_WORKER_COUNT) {
        config.scheduler.worker_count = v;
    }
    if let Some(v) = parse_env(ENV_TENANT_CONCURRENCY_LIMIT) {
        config.scheduler.tenant_concurrency_limit = v;
    }
    if let Some(v) = parse_env(ENV_TENANT_QUEUE_CAPACITY) {
        config.scheduler.tenant_queue_capacity = v;
    }
    if let Some(v) = parse_env(ENV_PROVIDER_RATE_LIMIT_PER_MINUTE) {
        config.provider_client.rate_limit_per_minute = v;
    }
    if let Some(v) = parse_env(ENV_PROVIDER_GLOBAL_INFLIGHT_CEILING) {
        config.provider_client.global_inflight_ceiling = v;
    }
    if let Some(v) = parse_env(ENV_RETRY_MAX_ATTEMPTS) {
        config.provider_client.retry.max_attempts = v;
    }
    if let Some::<u64>(v) = parse_env(ENV_REQUEST_DEADLINE_SECS) {
        config.orchestrator.request_deadline = Duration::from_secs(v);
    }
    if let Some::<u64>(v) = parse_env(ENV_LEASE_DURATION_SECS) {
        config.orchestrator.lease_duration = Duration::from_secs(v);
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    match env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "ignoring unparseable env override");
                None
            }
        },
        Err(_) => None,
    }
}
