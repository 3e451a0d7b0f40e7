//! CRM Adapter Registry: dispatches an enriched lead to the
//! tenant-configured CRM through a uniform adapter interface, idempotent
//! on the Request id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use leadline_error::PipelineError;
use leadline_model::ids::TenantId;
use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrmOutcome {
    Created { external_id: String },
    Updated { external_id: String },
}

/// One CRM vendor integration. `fields` has already had the tenant's
/// `WorkflowConfig.crm.field_mapping` applied by the caller — the
/// adapter only knows the vendor's wire format, never the pipeline's
/// internal field names.
#[async_trait]
pub trait CrmAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn create_or_update_lead(
        &self,
        tenant_id: TenantId,
        fields: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<CrmOutcome, PipelineError>;
}

/// Thread-safe registry selecting an adapter by
/// `WorkflowConfig.crm.provider`.
#[derive(Default)]
pub struct CrmAdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn CrmAdapter>>>,
}

impl CrmAdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn CrmAdapter>) {
        let name = adapter.name().to_string();
        debug!(provider = %name, "registering CRM adapter");
        self.adapters.write().insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CrmAdapter>> {
        self.adapters.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.adapters.read().contains_key(name)
    }
}

/// In-process adapter used by the app crate's in-memory wiring and by
/// tests. Tracks `idempotency_key`s it has already seen so a retried
/// delivery returns the same `external_id` instead of minting a new
/// lead, mirroring the guarantee a real vendor's dedupe token provides.
pub struct FakeCrmAdapter {
    name: String,
    seen: RwLock<HashMap<String, String>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl FakeCrmAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl CrmAdapter for FakeCrmAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_or_update_lead(
        &self,
        _tenant_id: TenantId,
        _fields: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<CrmOutcome, PipelineError> {
        if let Some(external_id) = self.seen.read().get(idempotency_key).cloned() {
            return Ok(CrmOutcome::Updated { external_id });
        }
        let external_id = format!(
            "lead-{}",
            self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        );
        self.seen
            .write()
            .insert(idempotency_key.to_string(), external_id.clone());
        Ok(CrmOutcome::Created { external_id })
    }
}
