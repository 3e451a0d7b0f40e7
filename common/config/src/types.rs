//! Typed process configuration.
//!
//! This is process-wide configuration only: the `W`/`K_t`/rate-limiter/
//! retry/deadline defaults a fresh deployment boots with. Per-tenant
//! `WorkflowConfig` (transcription, analysis, spam thresholds, CRM wiring)
//! lives in the Tenant Registry and is read per-request, never here.

use std::net::SocketAddr;
use std::time::Duration;

/// Scheduler / admission defaults.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Global worker pool size (`W`).
    pub worker_count: usize,
    /// Per-tenant concurrency ceiling (`K_t`).
    pub tenant_concurrency_limit: usize,
    /// Per-tenant queue capacity before admission returns `busy`.
    pub tenant_queue_capacity: usize,
    /// Default tenant priority weight for weighted round-robin.
    pub default_tenant_priority: u32,
    /// Global in-flight depth above which shedding begins
    /// (`queue_depth_threshold`, default `worker_count * 10`).
    pub shedding_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 64,
            tenant_concurrency_limit: 8,
            tenant_queue_capacity: 1024,
            default_tenant_priority: 1,
            shedding_threshold: 640,
        }
    }
}

/// Provider-client rate limiting and retry defaults.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProviderClientConfig {
    /// Per-tenant token-bucket capacity and refill rate (tokens / minute).
    pub rate_limit_per_minute: u32,
    /// Global ceiling on in-flight requests to the provider across tenants.
    pub global_inflight_ceiling: usize,
    pub retry: RetryConfig,
}

impl Default for ProviderClientConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 120,
            global_inflight_ceiling: 200,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff parameters shared by every retrying stage.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt.
    pub multiplier: f64,
    /// Symmetric jitter ratio, e.g. `0.25` for ±25%.
    pub jitter_ratio: f64,
    #[serde(with = "humantime_serde")]
    pub overall_deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_ratio: 0.25,
            overall_deadline: Duration::from_secs(30),
        }
    }
}

/// Orchestrator timing defaults.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Advance-lease duration before it must be renewed or is considered
    /// expired.
    #[serde(with = "humantime_serde")]
    pub lease_duration: Duration,
    /// Overall per-Request deadline from admission.
    #[serde(with = "humantime_serde")]
    pub request_deadline: Duration,
    /// Deadline for a transcription long-running operation on ≤30 min audio.
    #[serde(with = "humantime_serde")]
    pub transcription_deadline: Duration,
    /// Idempotency claim lease duration.
    #[serde(with = "humantime_serde")]
    pub idempotency_lease: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(120),
            request_deadline: Duration::from_secs(600),
            transcription_deadline: Duration::from_secs(120),
            idempotency_lease: Duration::from_secs(600),
        }
    }
}

/// Tenant registry cache defaults.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TenantCacheConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for TenantCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 10_000,
        }
    }
}

/// Webhook signature verification defaults.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    #[serde(with = "humantime_serde")]
    pub clock_skew_tolerance: Duration,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            clock_skew_tolerance: Duration::from_secs(300),
        }
    }
}

/// Root process configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: BindAddr,
    pub scheduler: SchedulerConfig,
    pub provider_client: ProviderClientConfig,
    pub orchestrator: OrchestratorConfig,
    pub tenant_cache: TenantCacheConfig,
    pub signature: SignatureConfig,
}

/// Newtype so `AppConfig` can derive `Default` while the actual default
/// bind address stays in one place.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BindAddr(pub SocketAddr);

impl Default for BindAddr {
    fn default() -> Self {
        Self(([0, 0, 0, 0], 8080).into())
    }
}
