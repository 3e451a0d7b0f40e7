//! Provider Client: the telephony vendor's REST API — call metadata,
//! recording URL resolution, and recording download.

mod rate_limit;
mod retry;

pub use rate_limit::TokenBucketLimiter;
pub use retry::RetryExecutor;

use std::collections::HashMap;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use leadline_config::RetryConfig;
use leadline_error::ErrorClass;
use leadline_error::PipelineError;
use leadline_model::CredentialHandle;
use leadline_otel::NoopRequestTelemetry;
use leadline_otel::RequestTelemetry;
use parking_lot::RwLock;
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tracing::debug;

/// Bearer-token credentials for one tenant's provider account, resolved
/// by the caller through the Tenant Registry's secret-store collaborator
/// before the first call.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub base_url: String,
    pub bearer_token: String,
}

/// Resolves the opaque `CredentialHandle` held on a Tenant into the raw
/// material an adapter needs, at the moment of use — secret material
/// never lives on the `Tenant` row itself.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve_provider_credentials(
        &self,
        handle: &CredentialHandle,
    ) -> Result<ProviderCredentials, PipelineError>;
}

/// In-process resolver used by the app crate's in-memory wiring and by
/// tests. A production deployment swaps this for a client of the real
/// secret-store collaborator.
#[derive(Default)]
pub struct InMemorySecretResolver {
    entries: RwLock<HashMap<String, ProviderCredentials>>,
}

impl InMemorySecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: CredentialHandle, credentials: ProviderCredentials) {
        self.entries.write().insert(handle.0, credentials);
    }
}

#[async_trait]
impl SecretResolver for InMemorySecretResolver {
    async fn resolve_provider_credentials(
        &self,
        handle: &CredentialHandle,
    ) -> Result<ProviderCredentials, PipelineError> {
        self.entries
            .read()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| PipelineError::fatal("auth", format!("no credentials registered for handle {}", handle.0)))
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn get_call_details(
        &self,
        credentials: &ProviderCredentials,
        call_id: &str,
    ) -> Result<serde_json::Value, PipelineError>;

    /// `Ok(None)` means the provider has no recording for this call
    /// (e.g. a missed or declined call) — a `skip`, not an error.
    async fn get_recording_url(
        &self,
        credentials: &ProviderCredentials,
        call_id: &str,
    ) -> Result<Option<String>, PipelineError>;

    async fn download_recording(
        &self,
        credentials: &ProviderCredentials,
        url: &str,
    ) -> Result<(Bytes, String), PipelineError>;
}

pub struct HttpProviderClient {
    http: reqwest::Client,
    limiter: TokenBucketLimiter,
    retry: RetryExecutor,
    /// Caps in-flight outbound provider calls across every tenant,
    /// independent of each tenant's own rate limit.
    inflight: Arc<Semaphore>,
}

impl HttpProviderClient {
    pub fn new(rate_limit_per_minute: u32, global_inflight_ceiling: usize, retry_config: RetryConfig) -> Self {
        Self::with_telemetry(
            rate_limit_per_minute,
            global_inflight_ceiling,
            retry_config,
            Arc::new(NoopRequestTelemetry),
        )
    }

    pub fn with_telemetry(
        rate_limit_per_minute: u32,
        global_inflight_ceiling: usize,
        retry_config: RetryConfig,
        telemetry: Arc<dyn RequestTelemetry>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            limiter: TokenBucketLimiter::new(rate_limit_per_minute),
            retry: RetryExecutor::with_telemetry(retry_config, telemetry),
            inflight: Arc::new(Semaphore::new(global_inflight_ceiling.max(1))),
        }
    }

    async fn get(
        &self,
        credentials: &ProviderCredentials,
        operation: &str,
        path: &str,
    ) -> Result<reqwest::Response, PipelineError> {
        let url = format!("{}{}", credentials.base_url, path);
        self.retry
            .execute(operation, || async {
                self.limiter.acquire().await;
                let _permit = self
                    .inflight
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(&credentials.bearer_token)
                    .send()
                    .await
                    .map_err(|e| leadline_error::wrap(ErrorClass::Transient, "network", &e))?;
                classify_status(response).await
            })
            .await
    }
}

/// Maps a provider HTTP response to the pipeline's error taxonomy:
/// 401/403 → `auth` (fatal, not retried), 404 → `not_found` (discard,
/// not retried), 429 → `rate_limited` (transient, honoring
/// `Retry-After`), 5xx → `service_unavailable`
/// (transient).
async fn classify_status(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(PipelineError::fatal("auth", format!("provider returned {status}")))
        }
        StatusCode::NOT_FOUND => Err(PipelineError::discard(
            "not_found",
            format!("provider returned {status}"),
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = rate_limit::parse_retry_after(response.headers());
            debug!(?retry_after, "provider rate limit hit");
            Err(PipelineError::transient(
                "rate_limited",
                format!("provider returned 429, retry_after={retry_after:?}"),
            ))
        }
        s if s.is_server_error() => Err(PipelineError::transient(
            "service_unavailable",
            format!("provider returned {status}"),
        )),
        s => Err(PipelineError::fatal(
            "unexpected_status",
            format!("provider returned unexpected status {s}"),
        )),
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn get_call_details(
        &self,
        credentials: &ProviderCredentials,
        call_id: &str,
    ) -> Result<serde_json::Value, PipelineError> {
        let response = self
            .get(credentials, "provider.get_call_details", &format!("/calls/{call_id}"))
            .await?;
        response
            .json()
            .await
            .map_err(|e| leadline_error::wrap(ErrorClass::Fatal, "bad_response_body", &e))
    }

    async fn get_recording_url(
        &self,
        credentials: &ProviderCredentials,
        call_id: &str,
    ) -> Result<Option<String>, PipelineError> {
        let response = self
            .get(
                credentials,
                "provider.get_recording_url",
                &format!("/calls/{call_id}/recording"),
            )
            .await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| leadline_error::wrap(ErrorClass::Fatal, "bad_response_body", &e))?;
        Ok(body
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    async fn download_recording(
        &self,
        credentials: &ProviderCredentials,
        url: &str,
    ) -> Result<(Bytes, String), PipelineError> {
        let response = self
            .retry
            .execute("provider.download_recording", || async {
                self.limiter.acquire().await;
                let _permit = self
                    .inflight
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                let response = self
                    .http
                    .get(url)
                    .bearer_auth(&credentials.bearer_token)
                    .send()
                    .await
                    .map_err(|e| leadline_error::wrap(ErrorClass::Transient, "network", &e))?;
                classify_status(response).await
            })
            .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| leadline_error::wrap(ErrorClass::Transient, "network", &e))?;
        Ok((bytes, content_type))
    }
}
