//! The axum HTTP surface: the inbound webhook endpoint and the
//! tenant-scoped management API. Handlers are thin: they parse, call
//! into the core crates, and map `PipelineError` classes to HTTP status
//! per [`error::ApiError`].

mod error;
mod management;
mod webhook;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use leadline_config::AppConfig;
use leadline_provider_client::SecretResolver;
use leadline_scheduler::Scheduler;
use leadline_signature::SignatureVerifier;
use leadline_store_event_log::EventLog;
use leadline_store_idempotency::IdempotencyStore;
use leadline_store_request::RequestStore;
use leadline_store_tenant::TenantRegistry;
use leadline_store_tenant::TenantStore;

/// Everything a handler needs, shared behind `Arc` clones per request
/// the way axum's `State` extractor expects.
#[derive(Clone)]
pub struct AppState {
    pub tenant_registry: Arc<dyn TenantRegistry>,
    pub tenant_store: Arc<dyn TenantStore>,
    pub idempotency_store: Arc<dyn IdempotencyStore>,
    pub event_log: Arc<dyn EventLog>,
    pub request_store: Arc<dyn RequestStore>,
    pub scheduler: Arc<Scheduler>,
    pub secret_resolver: Arc<dyn SecretResolver>,
    pub signature_verifier: SignatureVerifier,
    pub config: Arc<AppConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/webhook/phone", post(webhook::receive_phone_webhook))
        .route(
            "/v1/tenants/{tenant_id}",
            get(management::get_tenant).put(management::put_tenant),
        )
        .route("/v1/tenants/{tenant_id}/requests", get(management::list_requests))
        .route("/v1/tenants/{tenant_id}/requests/{request_id}", get(management::get_request))
        .route(
            "/v1/tenants/{tenant_id}/requests/{request_id}/retry",
            post(management::retry_request),
        )
        .route("/v1/health", get(management::health))
        .route("/v1/health/detailed", get(management::health_detailed))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::body::to_bytes;
    use axum::http::Request as HttpRequest;
    use axum::http::StatusCode;
    use hmac::Hmac;
    use hmac::Mac;
    use leadline_analyzer::FakeRawAnalyzerClient;
    use leadline_analyzer::LlmAnalyzer;
    use leadline_blob_store::InMemoryBlobStore;
    use leadline_crm_adapters::CrmAdapterRegistry;
    use leadline_model::CredentialHandle;
    use leadline_model::QuotaLimits;
    use leadline_model::Tenant;
    use leadline_model::TenantStatus;
    use leadline_model::WorkflowConfig;
    use leadline_model::ids::ProviderCompanyId;
    use leadline_orchestrator::Collaborators;
    use leadline_orchestrator::Orchestrator;
    use leadline_provider_client::InMemorySecretResolver;
    use leadline_provider_client::ProviderClient;
    use leadline_provider_client::ProviderCredentials;
    use leadline_store_call_recording::InMemoryCallRecordingStore;
    use leadline_store_event_log::InMemoryEventLog;
    use leadline_store_idempotency::InMemoryIdempotencyStore;
    use leadline_store_request::InMemoryRequestStore;
    use leadline_store_tenant::CachedTenantRegistry;
    use leadline_store_tenant::InMemoryTenantStore;
    use leadline_transcriber::FakeTranscriber;
    use sha2::Sha256;
    use std::time::Duration as StdDuration;
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    use tower::ServiceExt;

    const WEBHOOK_SECRET: &str = "unit-test-secret";

    struct NoRecordingClient;

    #[async_trait::async_trait]
    impl ProviderClient for NoRecordingClient {
        async fn get_call_details(
            &self,
            _credentials: &ProviderCredentials,
            call_id: &str,
        ) -> Result<serde_json::Value, leadline_error::PipelineError> {
            Ok(serde_json::json!({"id": call_id}))
        }

        async fn get_recording_url(
            &self,
            _credentials: &ProviderCredentials,
            _call_id: &str,
        ) -> Result<Option<String>, leadline_error::PipelineError> {
            Ok(None)
        }

        async fn download_recording(
            &self,
            _credentials: &ProviderCredentials,
            _url: &str,
        ) -> Result<(bytes::Bytes, String), leadline_error::PipelineError> {
            unreachable!("no recording path is taken in these tests")
        }
    }

    fn sample_tenant() -> Tenant {
        Tenant {
            id: leadline_model::ids::TenantId::new(),
            display_name: "Acme Roofing".to_string(),
            status: TenantStatus::Active,
            provider_company_id: ProviderCompanyId("acme".to_string()),
            webhook_secret_handle: CredentialHandle("webhook-handle".to_string()),
            provider_credentials_handle: CredentialHandle("provider-handle".to_string()),
            workflow: WorkflowConfig::default(),
            quota: QuotaLimits { quota_rpm: 600 },
            priority: 1,
        }
    }

    /// Wires a full `AppState` from in-memory collaborators. The tenant
    /// store backing the cache and the store exposed for direct writes
    /// are deliberately separate instances — none of these tests exercise
    /// `PUT /v1/tenants/{id}`, so they never need to observe each other.
    async fn test_state(tenant: Tenant) -> AppState {
        let backing_store = InMemoryTenantStore::new();
        backing_store.upsert(tenant).await.unwrap();
        let tenant_registry: Arc<dyn TenantRegistry> =
            Arc::new(CachedTenantRegistry::new(backing_store, StdDuration::from_secs(60), 10));
        let tenant_store: Arc<dyn TenantStore> = Arc::new(InMemoryTenantStore::new());

        let secret_resolver = Arc::new(InMemorySecretResolver::new());
        secret_resolver.register(
            CredentialHandle("webhook-handle".to_string()),
            ProviderCredentials {
                base_url: "https://provider.example".to_string(),
                bearer_token: WEBHOOK_SECRET.to_string(),
            },
        );
        secret_resolver.register(
            CredentialHandle("provider-handle".to_string()),
            ProviderCredentials {
                base_url: "https://provider.example".to_string(),
                bearer_token: "provider-tok".to_string(),
            },
        );

        let request_store: Arc<dyn RequestStore> = Arc::new(InMemoryRequestStore::new());
        let collaborators = Collaborators {
            tenant_registry: Arc::clone(&tenant_registry),
            request_store: Arc::clone(&request_store),
            provider_client: Arc::new(NoRecordingClient),
            secret_resolver: Arc::clone(&secret_resolver) as Arc<dyn leadline_provider_client::SecretResolver>,
            blob_store: Arc::new(InMemoryBlobStore::new()),
            transcriber: Arc::new(FakeTranscriber::new("x")),
            analyzer: Arc::new(LlmAnalyzer::new(FakeRawAnalyzerClient::valid())),
            crm_adapters: Arc::new(CrmAdapterRegistry::new()),
            call_recordings: Arc::new(InMemoryCallRecordingStore::new()),
            telemetry: Collaborators::noop_telemetry(),
        };
        let config = AppConfig::default();
        let orchestrator = Arc::new(Orchestrator::new(
            collaborators,
            config.provider_client.retry.clone(),
            config.orchestrator.lease_duration,
        ));
        let scheduler = Arc::new(Scheduler::new(
            orchestrator,
            Arc::clone(&request_store),
            Arc::clone(&tenant_registry),
            config.scheduler.clone(),
        ));

        AppState {
            tenant_registry,
            tenant_store,
            idempotency_store: Arc::new(InMemoryIdempotencyStore::new(config.orchestrator.idempotency_lease)),
            event_log: Arc::new(InMemoryEventLog::new()),
            request_store,
            scheduler,
            secret_resolver: secret_resolver as Arc<dyn leadline_provider_client::SecretResolver>,
            signature_verifier: SignatureVerifier::new(config.signature.clock_skew_tolerance),
            config: Arc::new(config),
        }
    }

    fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn now_timestamp() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string()
    }

    #[tokio::test]
    async fn correctly_signed_webhook_is_admitted() {
        let tenant = sample_tenant();
        let state = test_state(tenant.clone()).await;
        let app = router(state);

        let timestamp = now_timestamp();
        let body = serde_json::json!({"call_id": "CA123", "company_id": "acme"}).to_string();
        let signature = sign(WEBHOOK_SECRET, &timestamp, body.as_bytes());
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/v1/webhook/phone")
            .header("content-type", "application/json")
            .header(webhook::TIMESTAMP_HEADER, &timestamp)
            .header(webhook::SIGNATURE_HEADER, &signature)
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_with_401() {
        let tenant = sample_tenant();
        let state = test_state(tenant.clone()).await;
        let app = router(state);

        let timestamp = now_timestamp();
        let body = serde_json::json!({"call_id": "CA123", "company_id": "acme"}).to_string();
        let signature = sign("wrong-secret", &timestamp, body.as_bytes());
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/v1/webhook/phone")
            .header("content-type", "application/json")
            .header(webhook::TIMESTAMP_HEADER, &timestamp)
            .header(webhook::SIGNATURE_HEADER, &signature)
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "signature_mismatch");
    }

    #[tokio::test]
    async fn unknown_tenant_is_rejected_with_403() {
        let tenant = sample_tenant();
        let state = test_state(tenant).await;
        let app = router(state);

        let timestamp = now_timestamp();
        let body = serde_json::json!({"call_id": "CA123", "company_id": "someone-else"}).to_string();
        let signature = sign(WEBHOOK_SECRET, &timestamp, body.as_bytes());
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/v1/webhook/phone")
            .header("content-type", "application/json")
            .header(webhook::TIMESTAMP_HEADER, &timestamp)
            .header(webhook::SIGNATURE_HEADER, &signature)
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let tenant = sample_tenant();
        let state = test_state(tenant).await;
        let app = router(state);

        let request = HttpRequest::builder()
            .method("GET")
            .uri("/v1/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
