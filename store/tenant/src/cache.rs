//! Read-through TTL cache in front of a `TenantStore`.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use leadline_error::PipelineError;
use leadline_model::CredentialHandle;
use leadline_model::Tenant;
use leadline_model::ids::ProviderCompanyId;
use leadline_model::ids::TenantId;
use parking_lot::RwLock;
use tracing::debug;

use crate::TenantRegistry;
use crate::TenantStore;
use crate::not_found;

struct CacheEntry {
    tenant: Tenant,
    inserted_at: Instant,
}

/// `TenantRegistry` backed by `S`, caching resolved tenants for `ttl` and
/// evicting the oldest entry once `max_entries` is reached.
///
/// Both lookup paths (by tenant id and by provider company id) share one
/// cache keyed on `TenantId`; a company-id miss still pays one store
/// round trip even on an id-cache hit, since the company→id mapping
/// isn't itself cached (it changes even less often and is cheap to read).
pub struct CachedTenantRegistry<S: TenantStore> {
    store: S,
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<TenantId, CacheEntry>>,
}

impl<S: TenantStore> CachedTenantRegistry<S> {
    pub fn new(store: S, ttl: Duration, max_entries: usize) -> Self {
        Self {
            store,
            ttl,
            max_entries,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, tenant_id: TenantId) -> Option<Tenant> {
        let entries = self.entries.read();
        let entry = entries.get(&tenant_id)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.tenant.clone())
    }

    fn insert(&self, tenant: Tenant) {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries && !entries.contains_key(&tenant.id) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(id, _)| *id)
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            tenant.id,
            CacheEntry {
                tenant,
                inserted_at: Instant::now(),
            },
        );
    }

    async fn fetch_by_id(&self, tenant_id: TenantId) -> Result<Tenant, PipelineError> {
        if let Some(tenant) = self.cached(tenant_id) {
            debug!(%tenant_id, "tenant cache hit");
            return Ok(tenant);
        }
        let tenant = self
            .store
            .get(tenant_id)
            .await?
            .ok_or_else(|| not_found(tenant_id))?;
        self.insert(tenant.clone());
        Ok(tenant)
    }
}

#[async_trait]
impl<S: TenantStore> TenantRegistry for CachedTenantRegistry<S> {
    async fn resolve_by_provider_company_id(
        &self,
        provider_company_id: &ProviderCompanyId,
    ) -> Result<Tenant, PipelineError> {
        let tenant = self
            .store
            .resolve_by_provider_company_id(provider_company_id)
            .await?
            .ok_or_else(|| not_found(&provider_company_id.0))?;
        self.insert(tenant.clone());
        Ok(tenant)
    }

    async fn get(&self, tenant_id: TenantId) -> Result<Tenant, PipelineError> {
        self.fetch_by_id(tenant_id).await
    }

    async fn credentials(
        &self,
        tenant_id: TenantId,
        purpose: &str,
    ) -> Result<CredentialHandle, PipelineError> {
        let tenant = self.fetch_by_id(tenant_id).await?;
        if !tenant.is_usable() {
            return Err(PipelineError::fatal(
                "tenant_disabled",
                format!("tenant {tenant_id} is not active"),
            ));
        }
        match purpose {
            "webhook_secret" => Ok(tenant.webhook_secret_handle.clone()),
            "provider" => Ok(tenant.provider_credentials_handle.clone()),
            other => Err(not_found(format!("no credential handle for purpose {other}"))),
        }
    }
}
