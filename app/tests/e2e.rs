//! End-to-end scenarios driven entirely through the HTTP surface, with
//! every external collaborator wired as an in-memory fake behind the
//! same trait objects the process uses. Each test owns its own
//! `wiring::Runtime`; none of them share state.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use axum::body::Body;
use axum::body::to_bytes;
use axum::http::Request as HttpRequest;
use axum::http::StatusCode;
use bytes::Bytes;
use hmac::Hmac;
use hmac::Mac;
use leadline_app::wiring;
use leadline_config::AppConfig;
use leadline_error::PipelineError;
use leadline_model::CredentialHandle;
use leadline_model::QuotaLimits;
use leadline_model::Stage;
use leadline_model::Tenant;
use leadline_model::TenantStatus;
use leadline_model::WorkflowConfig;
use leadline_model::ids::ProviderCompanyId;
use leadline_model::ids::TenantId;
use leadline_provider_client::ProviderClient;
use leadline_provider_client::ProviderCredentials;
use leadline_store_request::Pagination;
use leadline_store_request::RequestFilter;
use leadline_webhook_server::router;
use sha2::Sha256;
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "e2e-webhook-secret";
const SIGNATURE_HEADER: &str = "x-webhook-signature";
const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// A `ProviderClient` scripted per test: `call_details_failures` transient
/// 503s before `get_call_details` succeeds, then a fixed recording.
struct ScriptedProviderClient {
    call_details_failures: u32,
    call_details_attempts: AtomicU32,
    recording_url: Option<String>,
    recording_bytes: Bytes,
    recording_content_type: String,
}

impl ScriptedProviderClient {
    fn with_recording(content_type: &str, bytes: Bytes) -> Self {
        Self {
            call_details_failures: 0,
            call_details_attempts: AtomicU32::new(0),
            recording_url: Some("https://provider.example/rec".to_string()),
            recording_bytes: bytes,
            recording_content_type: content_type.to_string(),
        }
    }

    fn failing_call_details(times: u32) -> Self {
        Self {
            call_details_failures: times,
            ..Self::with_recording("audio/wav", Bytes::from_static(b"RIFF-fake-wav-body"))
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for ScriptedProviderClient {
    async fn get_call_details(
        &self,
        _credentials: &ProviderCredentials,
        call_id: &str,
    ) -> Result<serde_json::Value, PipelineError> {
        let attempt = self.call_details_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.call_details_failures {
            return Err(PipelineError::transient("service_unavailable", "503 from provider"));
        }
        Ok(serde_json::json!({"id": call_id, "duration_seconds": 180}))
    }

    async fn get_recording_url(
        &self,
        _credentials: &ProviderCredentials,
        _call_id: &str,
    ) -> Result<Option<String>, PipelineError> {
        Ok(self.recording_url.clone())
    }

    async fn download_recording(
        &self,
        _credentials: &ProviderCredentials,
        _url: &str,
    ) -> Result<(Bytes, String), PipelineError> {
        Ok((self.recording_bytes.clone(), self.recording_content_type.clone()))
    }
}

fn sample_tenant(provider_company_id: &str, workflow: WorkflowConfig) -> Tenant {
    Tenant {
        id: TenantId::new(),
        display_name: "Acme Roofing".to_string(),
        status: TenantStatus::Active,
        provider_company_id: ProviderCompanyId(provider_company_id.to_string()),
        webhook_secret_handle: CredentialHandle("webhook-handle".to_string()),
        provider_credentials_handle: CredentialHandle("provider-handle".to_string()),
        workflow,
        quota: QuotaLimits { quota_rpm: 600 },
        priority: 1,
    }
}

fn crm_enabled_workflow() -> WorkflowConfig {
    let mut workflow = WorkflowConfig::default();
    workflow.crm.enabled = true;
    workflow.crm.provider = "fake".to_string();
    workflow.crm.push_when_score_at_least = 1;
    workflow
}

async fn build_runtime(provider_client: Arc<dyn ProviderClient>) -> wiring::Runtime {
    let mut config = AppConfig::default();
    config.scheduler.worker_count = 4;
    wiring::build(config, provider_client)
}

async fn seed_tenant(runtime: &wiring::Runtime, tenant: &Tenant) {
    runtime.state.tenant_store.upsert(tenant.clone()).await.unwrap();
    runtime.secret_resolver.register(
        tenant.webhook_secret_handle.clone(),
        ProviderCredentials {
            base_url: "https://provider.example".to_string(),
            bearer_token: WEBHOOK_SECRET.to_string(),
        },
    );
    runtime.secret_resolver.register(
        tenant.provider_credentials_handle.clone(),
        ProviderCredentials {
            base_url: "https://provider.example".to_string(),
            bearer_token: "provider-tok".to_string(),
        },
    );
}

fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn now_timestamp() -> String {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string()
}

fn webhook_request(secret: &str, company_id: &str, call_id: &str, event_id: &str) -> HttpRequest<Body> {
    let timestamp = now_timestamp();
    let body = serde_json::json!({"call_id": call_id, "company_id": company_id, "event_id": event_id}).to_string();
    let signature = sign(secret, &timestamp, body.as_bytes());
    HttpRequest::builder()
        .method("POST")
        .uri("/v1/webhook/phone")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, &timestamp)
        .header(SIGNATURE_HEADER, &signature)
        .body(Body::from(body))
        .unwrap()
}

async fn wait_for_terminal(runtime: &wiring::Runtime, tenant_id: TenantId, event_id: &str) -> leadline_model::Request {
    for _ in 0..500 {
        let page = runtime
            .state
            .request_store
            .list_by_tenant(tenant_id, RequestFilter::default(), Pagination { offset: 0, limit: 50 })
            .await
            .unwrap();
        if let Some(found) = page.items.into_iter().find(|r| r.provider_event_id.0 == event_id) {
            if found.terminal {
                return found;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("request for event {event_id} never reached a terminal stage");
}

#[tokio::test]
async fn happy_path_reaches_delivered() {
    let provider = Arc::new(ScriptedProviderClient::with_recording("audio/mpeg", Bytes::from_static(b"mp3-bytes")));
    let runtime = build_runtime(provider).await;
    let tenant = sample_tenant("acme", crm_enabled_workflow());
    seed_tenant(&runtime, &tenant).await;
    let scheduler = Arc::clone(&runtime.scheduler);
    scheduler.start();

    let app = router(runtime.state.clone());
    let response = app
        .oneshot(webhook_request(WEBHOOK_SECRET, "acme", "CAL_A", "E_A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let request = wait_for_terminal(&runtime, tenant.id, "E_A").await;
    scheduler.stop();

    assert_eq!(request.stage, Stage::Delivered);
    let score = request.analysis.as_ref().unwrap().score;
    assert!((1..=100).contains(&score));
    let blob_uri = request.blob_uri.expect("happy path stores the recording");
    assert!(blob_uri.ends_with("calls/CAL_A.mp3"), "unexpected blob uri: {blob_uri}");
    assert!(request.external_call_id.is_some(), "crm delivery should set an external id");
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let provider = Arc::new(ScriptedProviderClient::with_recording("audio/mpeg", Bytes::from_static(b"mp3-bytes")));
    let runtime = build_runtime(provider).await;
    let tenant = sample_tenant("acme", crm_enabled_workflow());
    seed_tenant(&runtime, &tenant).await;
    let scheduler = Arc::clone(&runtime.scheduler);
    scheduler.start();

    let app = router(runtime.state.clone());
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(webhook_request(WEBHOOK_SECRET, "acme", "CAL_A", "E_A"))
            .await
            .unwrap();
        assert!(response.status() == StatusCode::ACCEPTED || response.status() == StatusCode::OK);
    }

    let request = wait_for_terminal(&runtime, tenant.id, "E_A").await;
    scheduler.stop();

    let page = runtime
        .state
        .request_store
        .list_by_tenant(tenant.id, RequestFilter::default(), Pagination { offset: 0, limit: 50 })
        .await
        .unwrap();
    let matching: Vec<_> = page.items.iter().filter(|r| r.provider_event_id.0 == "E_A").collect();
    assert_eq!(matching.len(), 1, "exactly one Request row should exist for this event id");
    assert_eq!(request.stage, Stage::Delivered);
}

#[tokio::test]
async fn bad_signature_is_rejected_and_not_admitted() {
    let provider = Arc::new(ScriptedProviderClient::with_recording("audio/mpeg", Bytes::from_static(b"mp3-bytes")));
    let runtime = build_runtime(provider).await;
    let tenant = sample_tenant("acme", WorkflowConfig::default());
    seed_tenant(&runtime, &tenant).await;

    let app = router(runtime.state.clone());
    let mut request = webhook_request(WEBHOOK_SECRET, "acme", "CAL_A", "E_A");
    // Flip one bit of the (already hex-encoded) signature header.
    let bad_signature = {
        let mut sig = request.headers().get(SIGNATURE_HEADER).unwrap().to_str().unwrap().to_string();
        let first = sig.chars().next().unwrap();
        let flipped = if first == '0' { '1' } else { '0' };
        sig.replace_range(0..1, &flipped.to_string());
        sig
    };
    request.headers_mut().insert(SIGNATURE_HEADER, bad_signature.parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["code"], "signature_mismatch");

    let page = runtime
        .state
        .request_store
        .list_by_tenant(tenant.id, RequestFilter::default(), Pagination { offset: 0, limit: 50 })
        .await
        .unwrap();
    assert_eq!(page.total, 0, "a rejected signature must never admit a Request");
}

#[tokio::test]
async fn unknown_tenant_is_rejected() {
    let provider = Arc::new(ScriptedProviderClient::with_recording("audio/mpeg", Bytes::from_static(b"mp3-bytes")));
    let runtime = build_runtime(provider).await;
    // No tenant is seeded for "someone-else" at all.
    let app = router(runtime.state.clone());
    let response = app
        .oneshot(webhook_request(WEBHOOK_SECRET, "someone-else", "CAL_A", "E_A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let events = runtime.event_log.snapshot();
    assert_eq!(events.len(), 1);
    assert!(events[0].tenant_id.is_none());
}

#[tokio::test]
async fn provider_transient_then_success_retries_and_delivers() {
    let provider = Arc::new(ScriptedProviderClient::failing_call_details(2));
    let runtime = build_runtime(provider).await;
    let tenant = sample_tenant("acme", WorkflowConfig::default());
    seed_tenant(&runtime, &tenant).await;
    let scheduler = Arc::clone(&runtime.scheduler);
    scheduler.start();

    let app = router(runtime.state.clone());
    let started = Instant::now();
    let response = app
        .oneshot(webhook_request(WEBHOOK_SECRET, "acme", "CAL_A", "E_A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let request = wait_for_terminal(&runtime, tenant.id, "E_A").await;
    let elapsed = started.elapsed();
    scheduler.stop();

    assert!(request.stage.is_terminal());
    assert_eq!(request.attempt_count(Stage::Admitted), 3, "two failures plus the successful attempt");
    assert!(elapsed >= Duration::from_millis(500), "backoff between attempts should take real wall time");
    assert!(elapsed <= Duration::from_secs(30), "retry budget is bounded by the overall deadline");
}

#[tokio::test]
async fn unsupported_audio_skips_transcription() {
    // An empty, vendor-unrecognized payload: the in-memory transcriber
    // treats any blob uri outside .wav/.mp3 as an unsupported format.
    let provider = Arc::new(ScriptedProviderClient::with_recording("application/octet-stream", Bytes::new()));
    let runtime = build_runtime(provider).await;
    let tenant = sample_tenant("acme", crm_enabled_workflow());
    seed_tenant(&runtime, &tenant).await;
    let scheduler = Arc::clone(&runtime.scheduler);
    scheduler.start();

    let app = router(runtime.state.clone());
    let response = app
        .oneshot(webhook_request(WEBHOOK_SECRET, "acme", "CAL_A", "E_A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let request = wait_for_terminal(&runtime, tenant.id, "E_A").await;
    scheduler.stop();

    assert!(request.transcript.is_none(), "unsupported format must leave the transcript absent");
    assert!(request.analysis.is_some(), "analysis still runs on metadata alone");
    assert_eq!(
        request.stage,
        Stage::Delivered,
        "the fixed analyzer score clears the default minimum, so this should deliver"
    );
}

#[tokio::test]
async fn low_score_lead_is_discarded_at_the_gate() {
    let provider = Arc::new(ScriptedProviderClient::with_recording("audio/mpeg", Bytes::from_static(b"mp3-bytes")));
    let runtime = build_runtime(provider).await;
    let mut workflow = crm_enabled_workflow();
    // Above the fixed analyzer score of 85, forcing a gate discard.
    workflow.analysis.min_score_to_deliver = 90;
    let tenant = sample_tenant("acme", workflow);
    seed_tenant(&runtime, &tenant).await;
    let scheduler = Arc::clone(&runtime.scheduler);
    scheduler.start();

    let app = router(runtime.state.clone());
    let response = app
        .oneshot(webhook_request(WEBHOOK_SECRET, "acme", "CAL_A", "E_A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let request = wait_for_terminal(&runtime, tenant.id, "E_A").await;
    scheduler.stop();

    assert_eq!(request.stage, Stage::Discarded);
    assert_eq!(request.error.as_ref().unwrap().code, "score_below_minimum");
}
