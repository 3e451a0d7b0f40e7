//! An in-process `TenantStore`, used by the app crate's in-memory wiring
//! and by tests across the workspace. A production deployment swaps this
//! for a durable-database-backed implementor of the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use leadline_error::PipelineError;
use leadline_model::Tenant;
use leadline_model::ids::ProviderCompanyId;
use leadline_model::ids::TenantId;
use parking_lot::RwLock;

use crate::TenantStore;

#[derive(Default)]
pub struct InMemoryTenantStore {
    by_id: RwLock<HashMap<TenantId, Tenant>>,
    by_company: RwLock<HashMap<ProviderCompanyId, TenantId>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn resolve_by_provider_company_id(
        &self,
        provider_company_id: &ProviderCompanyId,
    ) -> Result<Option<Tenant>, PipelineError> {
        let Some(tenant_id) = self.by_company.read().get(provider_company_id).copied() else {
            return Ok(None);
        };
        Ok(self.by_id.read().get(&tenant_id).cloned())
    }

    async fn get(&self, tenant_id: TenantId) -> Result<Option<Tenant>, PipelineError> {
        Ok(self.by_id.read().get(&tenant_id).cloned())
    }

    async fn upsert(&self, tenant: Tenant) -> Result<(), PipelineError> {
        self.by_company
            .write()
            .insert(tenant.provider_company_id.clone(), tenant.id);
        self.by_id.write().insert(tenant.id, tenant);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadline_model::CredentialHandle;
    use leadline_model::QuotaLimits;
    use leadline_model::TenantStatus;
    use leadline_model::WorkflowConfig;

    fn sample_tenant(company: &str) -> Tenant {
        Tenant {
            id: TenantId::new(),
            display_name: "Acme Roofing".to_string(),
            status: TenantStatus::Active,
            provider_company_id: ProviderCompanyId(company.to_string()),
            webhook_secret_handle: CredentialHandle("secret-handle-1".to_string()),
            provider_credentials_handle: CredentialHandle("provider-handle-1".to_string()),
            workflow: WorkflowConfig::default(),
            quota: QuotaLimits::default(),
            priority: 1,
        }
    }

    #[tokio::test]
    async fn resolves_by_company_id_after_upsert() {
        let store = InMemoryTenantStore::new();
        let tenant = sample_tenant("acme-roofing");
        store.upsert(tenant.clone()).await.unwrap();

        let resolved = store
            .resolve_by_provider_company_id(&ProviderCompanyId("acme-roofing".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved.unwrap().id, tenant.id);
    }

    #[tokio::test]
    async fn unknown_company_resolves_to_none() {
        let store = InMemoryTenantStore::new();
        let resolved = store
            .resolve_by_provider_company_id(&ProviderCompanyId("ghost".to_string()))
            .await
            .unwrap();
        assert!(resolved.is_none());
    }
}
