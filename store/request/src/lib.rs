//! Request Store: the durable, tenant-scoped record of every in-flight
//! and terminal `Request`. `UpdateStage` is the only mutation path and
//! is a single-transaction compare-and-swap on `stage`, carrying any
//! stage artifact alongside it so a stage can never advance without its
//! artifact landing in the same write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use leadline_error::PipelineError;
use leadline_model::AnalysisResult;
use leadline_model::AdvanceLease;
use leadline_model::Request;
use leadline_model::RequestError;
use leadline_model::SourceTag;
use leadline_model::Stage;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use parking_lot::RwLock;

/// Fields a stage handler may set while advancing a `Request`. `None`
/// leaves the corresponding column untouched.
#[derive(Debug, Clone, Default)]
pub struct RequestPatch {
    pub external_call_id: Option<String>,
    pub blob_uri: Option<String>,
    pub transcript: Option<String>,
    pub call_metadata: Option<serde_json::Value>,
    pub recording_url: Option<String>,
    pub analysis: Option<AnalysisResult>,
    pub lead_score: Option<u8>,
    pub error: Option<RequestError>,
    pub terminal: Option<bool>,
    pub lease: Option<AdvanceLease>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
}

impl RequestPatch {
    fn apply(self, request: &mut Request) {
        if let Some(v) = self.external_call_id {
            request.external_call_id = Some(v);
        }
        if let Some(v) = self.blob_uri {
            request.blob_uri = Some(v);
        }
        if let Some(v) = self.call_metadata {
            request.call_metadata = Some(v);
        }
        if let Some(v) = self.recording_url {
            request.recording_url = Some(v);
        }
        if let Some(v) = self.transcript {
            request.transcript = Some(v);
        }
        if let Some(v) = self.analysis {
            request.analysis = Some(v);
        }
        if let Some(v) = self.lead_score {
            request.lead_score = Some(v);
        }
        if let Some(v) = self.error {
            request.error = Some(v);
        }
        if let Some(v) = self.terminal {
            request.terminal = v;
        }
        if let Some(v) = self.lease {
            request.lease = v;
        }
        if let Some(v) = self.next_attempt_at {
            request.next_attempt_at = v;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub stage: Option<Stage>,
    pub source: Option<SourceTag>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl RequestFilter {
    fn matches(&self, request: &Request) -> bool {
        if let Some(stage) = self.stage {
            if request.stage != stage {
                return false;
            }
        }
        if let Some(source) = self.source {
            if request.source != source {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if request.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if request.created_at > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, request: Request) -> Result<(), PipelineError>;

    async fn get(&self, tenant_id: TenantId, request_id: RequestId) -> Result<Request, PipelineError>;

    /// Compare-and-swap on `stage`: rejects with a `stage_conflict`
    /// (retryable — the caller re-fetches and re-decides) if the
    /// Request's current stage is not `from`. `increment_attempt_for`,
    /// when set, bumps that stage's attempt counter as part of the same
    /// write.
    #[allow(clippy::too_many_arguments)]
    async fn update_stage(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        from: Stage,
        to: Stage,
        patch: RequestPatch,
        increment_attempt_for: Option<Stage>,
    ) -> Result<Request, PipelineError>;

    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        filter: RequestFilter,
        page: Pagination,
    ) -> Result<Page<Request>, PipelineError>;

    /// Writes a patch in place without changing `stage` — used by the
    /// orchestrator to acquire/renew the advance-lease and to record a
    /// transient failure (attempt count, error, `next_attempt_at`)
    /// while a retry is scheduled for the same stage. Still a
    /// compare-and-swap: rejects with `stage_conflict` if the Request's
    /// current stage is not `stage`.
    async fn record_attempt(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        stage: Stage,
        patch: RequestPatch,
        increment_attempt: bool,
    ) -> Result<Request, PipelineError>;

    /// Resets a `FAILED` Request back to `last_active_stage`, clearing
    /// its terminal flag, error, lease, and any pending retry delay, so
    /// the scheduler can pick it up again. Rejects with `not_failed` if
    /// the Request is not currently FAILED.
    async fn retry_failed(&self, tenant_id: TenantId, request_id: RequestId) -> Result<Request, PipelineError>;
}

/// In-process `RequestStore` used by the app crate's in-memory wiring
/// and by tests. A production deployment swaps this for a table keyed
/// on `(tenant_id, request_id)` with secondary indexes for the
/// management API's listing queries, using a `WHERE stage = $from`
/// guard for the CAS.
#[derive(Default)]
pub struct InMemoryRequestStore {
    rows: RwLock<HashMap<(TenantId, RequestId), Request>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, request: Request) -> Result<(), PipelineError> {
        let key = (request.tenant_id, request.id);
        self.rows.write().insert(key, request);
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, request_id: RequestId) -> Result<Request, PipelineError> {
        self.rows
            .read()
            .get(&(tenant_id, request_id))
            .cloned()
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no request {request_id}")))
    }

    async fn update_stage(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        from: Stage,
        to: Stage,
        patch: RequestPatch,
        increment_attempt_for: Option<Stage>,
    ) -> Result<Request, PipelineError> {
        let mut rows = self.rows.write();
        let request = rows
            .get_mut(&(tenant_id, request_id))
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no request {request_id}")))?;

        if request.stage != from {
            return Err(PipelineError::transient(
                "stage_conflict",
                format!(
                    "request {request_id} is at stage {:?}, expected {:?}",
                    request.stage, from
                ),
            ));
        }
        if !from.can_transition_to(to) {
            return Err(PipelineError::fatal(
                "illegal_transition",
                format!("{:?} cannot transition to {:?}", from, to),
            ));
        }

        if let Some(stage) = increment_attempt_for {
            let count = request.attempts.entry(stage.as_ref().to_string()).or_insert(0);
            *count += 1;
        }
        if to.is_terminal() {
            request.last_active_stage = from;
        }
        patch.apply(request);
        request.stage = to;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn record_attempt(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        stage: Stage,
        patch: RequestPatch,
        increment_attempt: bool,
    ) -> Result<Request, PipelineError> {
        let mut rows = self.rows.write();
        let request = rows
            .get_mut(&(tenant_id, request_id))
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no request {request_id}")))?;

        if request.stage != stage {
            return Err(PipelineError::transient(
                "stage_conflict",
                format!(
                    "request {request_id} is at stage {:?}, expected {:?}",
                    request.stage, stage
                ),
            ));
        }
        if increment_attempt {
            let count = request.attempts.entry(stage.as_ref().to_string()).or_insert(0);
            *count += 1;
        }
        patch.apply(request);
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn retry_failed(&self, tenant_id: TenantId, request_id: RequestId) -> Result<Request, PipelineError> {
        let mut rows = self.rows.write();
        let request = rows
            .get_mut(&(tenant_id, request_id))
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no request {request_id}")))?;

        if request.stage != Stage::Failed {
            return Err(PipelineError::fatal(
                "not_failed",
                format!("request {request_id} is at stage {:?}, not FAILED", request.stage),
            ));
        }
        request.stage = request.last_active_stage;
        request.error = None;
        request.terminal = false;
        request.lease = AdvanceLease::default();
        request.next_attempt_at = None;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        filter: RequestFilter,
        page: Pagination,
    ) -> Result<Page<Request>, PipelineError> {
        let mut matching: Vec<Request> = self
            .rows
            .read()
            .values()
            .filter(|r| r.tenant_id == tenant_id && filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(Page { items, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadline_model::ids::CallId;
    use leadline_model::ids::ProviderEventId;

    fn sample_request(tenant_id: TenantId) -> Request {
        Request::admit(
            tenant_id,
            SourceTag::Phone,
            Some(CallId("CA1".to_string())),
            ProviderEventId("E1".to_string()),
            chrono::Duration::minutes(10),
        )
    }

    #[tokio::test]
    async fn update_stage_rejects_when_current_stage_does_not_match_from() {
        let store = InMemoryRequestStore::new();
        let tenant_id = TenantId::new();
        let request = sample_request(tenant_id);
        let request_id = request.id;
        store.create(request).await.unwrap();

        let err = store
            .update_stage(
                tenant_id,
                request_id,
                Stage::FetchRecording,
                Stage::StoreAudio,
                RequestPatch::default(),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "stage_conflict");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn update_stage_advances_and_applies_patch_atomically() {
        let store = InMemoryRequestStore::new();
        let tenant_id = TenantId::new();
        let request = sample_request(tenant_id);
        let request_id = request.id;
        store.create(request).await.unwrap();

        let patch = RequestPatch {
            external_call_id: Some("provider-call-123".to_string()),
            ..Default::default()
        };
        let updated = store
            .update_stage(
                tenant_id,
                request_id,
                Stage::Admitted,
                Stage::FetchMeta,
                patch,
                Some(Stage::Admitted),
            )
            .await
            .unwrap();

        assert_eq!(updated.stage, Stage::FetchMeta);
        assert_eq!(updated.external_call_id.as_deref(), Some("provider-call-123"));
        assert_eq!(updated.attempt_count(Stage::Admitted), 1);
    }

    #[tokio::test]
    async fn record_attempt_bumps_counter_without_changing_stage() {
        let store = InMemoryRequestStore::new();
        let tenant_id = TenantId::new();
        let request = sample_request(tenant_id);
        let request_id = request.id;
        store.create(request).await.unwrap();

        let patch = RequestPatch {
            next_attempt_at: Some(Some(Utc::now() + chrono::Duration::seconds(5))),
            ..Default::default()
        };
        let updated = store
            .record_attempt(tenant_id, request_id, Stage::Admitted, patch, true)
            .await
            .unwrap();

        assert_eq!(updated.stage, Stage::Admitted);
        assert_eq!(updated.attempt_count(Stage::Admitted), 1);
        assert!(updated.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn retry_failed_resets_to_last_active_stage() {
        let store = InMemoryRequestStore::new();
        let tenant_id = TenantId::new();
        let request = sample_request(tenant_id);
        let request_id = request.id;
        store.create(request).await.unwrap();

        store
            .update_stage(
                tenant_id,
                request_id,
                Stage::Admitted,
                Stage::FetchMeta,
                RequestPatch::default(),
                None,
            )
            .await
            .unwrap();
        store
            .update_stage(
                tenant_id,
                request_id,
                Stage::FetchMeta,
                Stage::Failed,
                RequestPatch {
                    terminal: Some(true),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let retried = store.retry_failed(tenant_id, request_id).await.unwrap();
        assert_eq!(retried.stage, Stage::FetchMeta);
        assert!(!retried.terminal);
    }

    #[tokio::test]
    async fn retry_failed_rejects_a_request_that_is_not_failed() {
        let store = InMemoryRequestStore::new();
        let tenant_id = TenantId::new();
        let request = sample_request(tenant_id);
        let request_id = request.id;
        store.create(request).await.unwrap();

        let err = store.retry_failed(tenant_id, request_id).await.unwrap_err();
        assert_eq!(err.code, "not_failed");
    }

    #[tokio::test]
    async fn list_by_tenant_excludes_other_tenants() {
        let store = InMemoryRequestStore::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        store.create(sample_request(tenant_a)).await.unwrap();
        store.create(sample_request(tenant_b)).await.unwrap();

        let page = store
            .list_by_tenant(tenant_a, RequestFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].tenant_id, tenant_a);
    }
}
