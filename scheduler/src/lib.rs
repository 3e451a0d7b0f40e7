//! Scheduler / Admission: a fair-share worker pool that drains per-tenant
//! queues under a weighted round-robin discipline, plus the admission
//! checks (quota, queue capacity, shedding) run once per Request before
//! it ever reaches a queue.
//!
//! The worker loop uses a fixed set of tasks woken by a notification with
//! a periodic poll as a fallback, a `CancellationToken` for shutdown, and
//! "contention → brief delay → requeue" instead of blocking a worker.

mod admission;
mod lanes;

pub use admission::SlidingWindowCounter;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use leadline_config::SchedulerConfig;
use leadline_error::ErrorClass;
use leadline_error::PipelineError;
use leadline_model::Request;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use leadline_orchestrator::Orchestrator;
use leadline_store_request::RequestStore;
use leadline_store_tenant::TenantRegistry;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use lanes::TenantLanes;

/// Brief delay before a worker re-attempts a Request it found under
/// lease contention or a stale-CAS conflict — not a stage retry, just
/// giving the other writer a moment to finish.
const CONTENTION_RETRY_DELAY: Duration = Duration::from_millis(25);
const POLL_FALLBACK: Duration = Duration::from_millis(100);

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    request_store: Arc<dyn RequestStore>,
    tenant_registry: Arc<dyn TenantRegistry>,
    lanes: TenantLanes,
    quotas: DashMap<TenantId, SlidingWindowCounter>,
    config: SchedulerConfig,
    global_in_flight: AtomicUsize,
    notify: Notify,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        request_store: Arc<dyn RequestStore>,
        tenant_registry: Arc<dyn TenantRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            orchestrator,
            request_store,
            tenant_registry,
            lanes: TenantLanes::new(),
            quotas: DashMap::new(),
            config,
            global_in_flight: AtomicUsize::new(0),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Runs §4.1–§4.3's admission checks for an already-verified,
    /// already-deduplicated Request, persists it, and enqueues it on its
    /// tenant's lane. Returns the same error taxonomy every other stage
    /// uses so the webhook layer can map it to an HTTP status uniformly.
    pub async fn admit(&self, request: Request) -> Result<(), PipelineError> {
        let tenant = self.tenant_registry.get(request.tenant_id).await?;
        if !tenant.is_usable() {
            return Err(PipelineError::fatal("tenant_disabled", "tenant is not active"));
        }

        let shedding = self.global_in_flight.load(Ordering::Acquire) >= self.config.shedding_threshold;
        if shedding && tenant.priority <= self.config.default_tenant_priority {
            return Err(PipelineError::discard(
                "shed",
                "global in-flight depth exceeds the shedding threshold",
            ));
        }
        if self.lanes.queue_len(tenant.id) >= self.config.tenant_queue_capacity {
            return Err(PipelineError::transient("busy", "tenant queue is full"));
        }
        let admitted = self
            .quotas
            .entry(tenant.id)
            .or_insert_with(|| SlidingWindowCounter::new(Duration::from_secs(60)))
            .try_admit(tenant.quota.quota_rpm);
        if !admitted {
            return Err(PipelineError::discard(
                "quota_exceeded",
                format!("tenant exceeded {} requests/minute", tenant.quota.quota_rpm),
            ));
        }

        let request_id = request.id;
        self.request_store.create(request).await?;
        self.lanes.push(tenant.id, tenant.priority, request_id);
        self.global_in_flight.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
        Ok(())
    }

    /// Places an already-persisted, non-terminal Request back onto its
    /// tenant's lane without re-running admission checks — used by the
    /// management API's retry operation, which has
    /// already reset the Request's stage via
    /// [`leadline_store_request::RequestStore::retry_failed`].
    pub async fn requeue(&self, tenant_id: TenantId, request_id: RequestId) -> Result<(), PipelineError> {
        let tenant = self.tenant_registry.get(tenant_id).await?;
        self.lanes.push(tenant.id, tenant.priority, request_id);
        self.global_in_flight.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
        Ok(())
    }

    /// Spawns `worker_count` workers and returns immediately; they run
    /// until [`Scheduler::stop`] is called.
    pub fn start(self: &Arc<Self>) {
        debug!(workers = self.config.worker_count, "starting scheduler worker pool");
        for worker_id in 0..self.config.worker_count {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                scheduler.worker_loop(worker_id).await;
            });
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let worker_label = format!("worker-{worker_id}");
        self.drain_ready(&worker_label).await;
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!(worker_id, "scheduler worker cancelled");
                    break;
                }

                () = self.notify.notified() => {
                    self.drain_ready(&worker_label).await;
                }

                () = tokio::time::sleep(POLL_FALLBACK) => {
                    self.drain_ready(&worker_label).await;
                }
            }
        }
    }

    /// Drains every Request this worker can currently pick under the
    /// tenant concurrency ceiling, advancing each by exactly one stage.
    async fn drain_ready(self: &Arc<Self>, worker_label: &str) {
        while let Some((tenant_id, request_id)) = self.lanes.next_ready(self.config.tenant_concurrency_limit) {
            let priority = self.lanes.priority(tenant_id);
            let result = self.orchestrator.advance(tenant_id, request_id, worker_label).await;
            self.handle_outcome(tenant_id, request_id, priority, result);
        }
    }

    fn handle_outcome(
        self: &Arc<Self>,
        tenant_id: TenantId,
        request_id: RequestId,
        priority: u32,
        result: Result<Request, PipelineError>,
    ) {
        self.lanes.release(tenant_id);
        match result {
            Ok(request) if request.terminal => {
                self.global_in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Ok(request) => match request.next_attempt_at {
                Some(at) if at > Utc::now() => {
                    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    self.requeue_after(tenant_id, request_id, priority, delay);
                }
                _ => {
                    self.lanes.push(tenant_id, priority, request_id);
                    self.notify.notify_one();
                }
            },
            Err(error) if error.class == ErrorClass::Transient => {
                warn!(%request_id, %error, "scheduler observed contention, retrying shortly");
                self.requeue_after(tenant_id, request_id, priority, CONTENTION_RETRY_DELAY);
            }
            Err(error) => {
                warn!(%request_id, %error, "scheduler dropped a request it could not advance");
                self.global_in_flight.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    fn requeue_after(self: &Arc<Self>, tenant_id: TenantId, request_id: RequestId, priority: u32, delay: Duration) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.lanes.push(tenant_id, priority, request_id);
            scheduler.notify.notify_one();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadline_config::RetryConfig;
    use leadline_model::CredentialHandle;
    use leadline_model::QuotaLimits;
    use leadline_model::SourceTag;
    use leadline_model::TenantStatus;
    use leadline_model::WorkflowConfig;
    use leadline_model::ids::CallId;
    use leadline_model::ids::ProviderCompanyId;
    use leadline_model::ids::ProviderEventId;
    use leadline_analyzer::FakeRawAnalyzerClient;
    use leadline_analyzer::LlmAnalyzer;
    use leadline_blob_store::InMemoryBlobStore;
    use leadline_crm_adapters::CrmAdapterRegistry;
    use leadline_orchestrator::Collaborators;
    use leadline_provider_client::InMemorySecretResolver;
    use leadline_provider_client::ProviderClient;
    use leadline_provider_client::ProviderCredentials;
    use leadline_store_call_recording::InMemoryCallRecordingStore;
    use leadline_store_request::InMemoryRequestStore;
    use leadline_store_tenant::CachedTenantRegistry;
    use leadline_store_tenant::InMemoryTenantStore;
    use leadline_store_tenant::TenantStore;
    use leadline_transcriber::FakeTranscriber;

    struct NoRecordingClient;

    #[async_trait::async_trait]
    impl ProviderClient for NoRecordingClient {
        async fn get_call_details(
            &self,
            _credentials: &ProviderCredentials,
            call_id: &str,
        ) -> Result<serde_json::Value, PipelineError> {
            Ok(serde_json::json!({"id": call_id}))
        }

        async fn get_recording_url(
            &self,
            _credentials: &ProviderCredentials,
            _call_id: &str,
        ) -> Result<Option<String>, PipelineError> {
            Ok(None)
        }

        async fn download_recording(
            &self,
            _credentials: &ProviderCredentials,
            _url: &str,
        ) -> Result<(bytes::Bytes, String), PipelineError> {
            unreachable!("no recording path is taken in this test")
        }
    }

    fn sample_tenant(priority: u32, quota_rpm: u32) -> leadline_model::Tenant {
        leadline_model::Tenant {
            id: TenantId::new(),
            display_name: "Acme Roofing".to_string(),
            status: TenantStatus::Active,
            provider_company_id: ProviderCompanyId("acme".to_string()),
            webhook_secret_handle: CredentialHandle("webhook-handle".to_string()),
            provider_credentials_handle: CredentialHandle("provider-handle".to_string()),
            workflow: WorkflowConfig::default(),
            quota: QuotaLimits { quota_rpm },
            priority,
        }
    }

    async fn build_scheduler(priority: u32, quota_rpm: u32) -> (Arc<Scheduler>, TenantId, Arc<dyn RequestStore>) {
        let tenant = sample_tenant(priority, quota_rpm);
        let tenant_id = tenant.id;
        let tenant_store = InMemoryTenantStore::new();
        tenant_store.upsert(tenant).await.unwrap();
        let tenant_registry: Arc<dyn TenantRegistry> =
            Arc::new(CachedTenantRegistry::new(tenant_store, Duration::from_secs(60), 10));

        let secret_resolver = Arc::new(InMemorySecretResolver::new());
        secret_resolver.register(
            CredentialHandle("provider-handle".to_string()),
            ProviderCredentials {
                base_url: "https://provider.example".to_string(),
                bearer_token: "tok".to_string(),
            },
        );
        let request_store: Arc<dyn RequestStore> = Arc::new(InMemoryRequestStore::new());
        let collaborators = Collaborators {
            tenant_registry: Arc::clone(&tenant_registry),
            request_store: Arc::clone(&request_store),
            provider_client: Arc::new(NoRecordingClient),
            secret_resolver,
            blob_store: Arc::new(InMemoryBlobStore::new()),
            transcriber: Arc::new(FakeTranscriber::new("x")),
            analyzer: Arc::new(LlmAnalyzer::new(FakeRawAnalyzerClient::valid())),
            crm_adapters: Arc::new(CrmAdapterRegistry::new()),
            call_recordings: Arc::new(InMemoryCallRecordingStore::new()),
            telemetry: Collaborators::noop_telemetry(),
        };
        let orchestrator = Arc::new(Orchestrator::new(collaborators, RetryConfig::default(), Duration::from_secs(120)));
        let scheduler = Arc::new(Scheduler::new(
            orchestrator,
            request_store.clone(),
            tenant_registry,
            SchedulerConfig::default(),
        ));
        (scheduler, tenant_id, request_store)
    }

    #[tokio::test]
    async fn admitted_request_runs_to_a_terminal_stage() {
        let (scheduler, tenant_id, request_store) = build_scheduler(1, 600).await;
        let request = Request::admit(
            tenant_id,
            SourceTag::Phone,
            Some(CallId("CAL_A".to_string())),
            ProviderEventId("E_A".to_string()),
            chrono::Duration::minutes(10),
        );
        let request_id = request.id;
        scheduler.admit(request).await.unwrap();

        scheduler.start();
        let mut terminal = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let current = request_store.get(tenant_id, request_id).await.unwrap();
            if current.terminal {
                terminal = true;
                break;
            }
        }
        scheduler.stop();
        assert!(terminal, "request never reached a terminal stage");
    }

    #[tokio::test]
    async fn quota_exceeded_refuses_admission() {
        let (scheduler, tenant_id, _request_store) = build_scheduler(1, 1).await;
        let first = Request::admit(
            tenant_id,
            SourceTag::Phone,
            Some(CallId("CAL_A".to_string())),
            ProviderEventId("E_A".to_string()),
            chrono::Duration::minutes(10),
        );
        scheduler.admit(first).await.unwrap();

        let second = Request::admit(
            tenant_id,
            SourceTag::Phone,
            Some(CallId("CAL_B".to_string())),
            ProviderEventId("E_B".to_string()),
            chrono::Duration::minutes(10),
        );
        let err = scheduler.admit(second).await.unwrap_err();
        assert_eq!(err.code, "quota_exceeded");
    }
}
