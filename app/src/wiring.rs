//! Builds the collaborator graph the orchestrator and HTTP surface run
//! on top of. One place assembles every trait object so `main` and the
//! integration tests wire up identically.

use std::sync::Arc;

use leadline_analyzer::FakeRawAnalyzerClient;
use leadline_analyzer::LlmAnalyzer;
use leadline_blob_store::InMemoryBlobStore;
use leadline_config::AppConfig;
use leadline_crm_adapters::CrmAdapterRegistry;
use leadline_crm_adapters::FakeCrmAdapter;
use leadline_orchestrator::Collaborators;
use leadline_orchestrator::Orchestrator;
use leadline_otel::RequestTelemetry;
use leadline_otel::TracingRequestTelemetry;
use leadline_provider_client::HttpProviderClient;
use leadline_provider_client::InMemorySecretResolver;
use leadline_provider_client::ProviderClient;
use leadline_provider_client::SecretResolver;
use leadline_scheduler::Scheduler;
use leadline_signature::SignatureVerifier;
use leadline_store_call_recording::InMemoryCallRecordingStore;
use leadline_store_event_log::EventLog;
use leadline_store_event_log::InMemoryEventLog;
use leadline_store_idempotency::IdempotencyStore;
use leadline_store_idempotency::InMemoryIdempotencyStore;
use leadline_store_request::InMemoryRequestStore;
use leadline_store_request::RequestStore;
use leadline_store_tenant::CachedTenantRegistry;
use leadline_store_tenant::InMemoryTenantStore;
use leadline_store_tenant::TenantRegistry;
use leadline_store_tenant::TenantStore;
use leadline_transcriber::FakeTranscriber;
use leadline_webhook_server::AppState;

/// Everything `main` needs beyond the `AppState` axum reads from: the
/// scheduler must be started and stopped independently of the HTTP
/// server's own lifecycle. `secret_resolver` and `event_log` are kept as
/// their concrete in-memory types (rather than only the trait objects
/// already inside `state`) so test setup can seed credentials directly
/// and assertions can inspect audit rows the `EventLog` trait itself
/// doesn't expose a read path for.
pub struct Runtime {
    pub state: AppState,
    pub scheduler: Arc<Scheduler>,
    pub secret_resolver: Arc<InMemorySecretResolver>,
    pub event_log: Arc<InMemoryEventLog>,
}

/// Process wiring: `HttpProviderClient` is the only outbound integration
/// with a real implementation in this workspace. Tests substitute a fake
/// through [`build`] directly.
pub fn build_for_process(config: AppConfig) -> Runtime {
    let telemetry: Arc<dyn RequestTelemetry> = Arc::new(TracingRequestTelemetry);
    let provider_client = Arc::new(HttpProviderClient::with_telemetry(
        config.provider_client.rate_limit_per_minute,
        config.provider_client.global_inflight_ceiling,
        config.provider_client.retry.clone(),
        Arc::clone(&telemetry),
    ));
    build_with_telemetry(config, provider_client, telemetry)
}

/// Exercised by [`build_for_process`]; kept separate so tests can keep
/// calling [`build`] without naming a telemetry implementation.
pub fn build_with_telemetry(
    config: AppConfig,
    provider_client: Arc<dyn ProviderClient>,
    telemetry: Arc<dyn RequestTelemetry>,
) -> Runtime {
    build_inner(config, provider_client, telemetry)
}

/// Assembles the process's collaborator graph from `config` and a
/// caller-supplied provider client.
///
/// The transcriber, analyzer, and CRM vendor adapters have no committed
/// HTTP backend, so this wiring runs the in-process stand-ins documented
/// on each of their crates until a concrete vendor integration is added.
/// Everything storage-shaped runs in memory — swapping in a durable
/// backend means providing a new `TenantStore`/`RequestStore`/etc. impl,
/// not touching this function's shape.
pub fn build(config: AppConfig, provider_client: Arc<dyn ProviderClient>) -> Runtime {
    build_inner(config, provider_client, Collaborators::noop_telemetry())
}

fn build_inner(
    config: AppConfig,
    provider_client: Arc<dyn ProviderClient>,
    telemetry: Arc<dyn RequestTelemetry>,
) -> Runtime {
    let tenant_backing_store = Arc::new(InMemoryTenantStore::new());
    let tenant_registry: Arc<dyn TenantRegistry> = Arc::new(CachedTenantRegistry::new(
        Arc::clone(&tenant_backing_store),
        config.tenant_cache.ttl,
        config.tenant_cache.max_entries,
    ));
    let tenant_store: Arc<dyn TenantStore> = tenant_backing_store;

    let secret_resolver = Arc::new(InMemorySecretResolver::new());
    let request_store: Arc<dyn RequestStore> = Arc::new(InMemoryRequestStore::new());
    let idempotency_store: Arc<dyn IdempotencyStore> =
        Arc::new(InMemoryIdempotencyStore::new(config.orchestrator.idempotency_lease));
    let event_log = Arc::new(InMemoryEventLog::new());

    let crm_adapters = Arc::new(CrmAdapterRegistry::new());
    crm_adapters.register(Arc::new(FakeCrmAdapter::new("fake")));

    let collaborators = Collaborators {
        tenant_registry: Arc::clone(&tenant_registry),
        request_store: Arc::clone(&request_store),
        provider_client,
        secret_resolver: Arc::clone(&secret_resolver) as Arc<dyn SecretResolver>,
        blob_store: Arc::new(InMemoryBlobStore::new()),
        transcriber: Arc::new(FakeTranscriber::new(
            "thanks for calling, we can get someone out next week for an estimate",
        )),
        analyzer: Arc::new(LlmAnalyzer::new(FakeRawAnalyzerClient::valid())),
        crm_adapters,
        call_recordings: Arc::new(InMemoryCallRecordingStore::new()),
        telemetry,
    };

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

    let signature_verifier = SignatureVerifier::new(config.signature.clock_skew_tolerance);

    let state = AppState {
        tenant_registry,
        tenant_store,
        idempotency_store,
        event_log: Arc::clone(&event_log) as Arc<dyn EventLog>,
        request_store,
        scheduler: Arc::clone(&scheduler),
        secret_resolver: Arc::clone(&secret_resolver) as Arc<dyn SecretResolver>,
        signature_verifier,
        config: Arc::new(config),
    };

    Runtime { state, scheduler, secret_resolver, event_log }
}
