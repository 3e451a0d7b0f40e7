//! Tenant Registry: resolves provider-supplied company ids and tenant
//! ids to `Tenant` rows and credential handles, backed by a durable
//! store behind a bounded, time-based read-through cache.

mod cache;
mod memory_store;

pub use cache::CachedTenantRegistry;
pub use memory_store::InMemoryTenantStore;

use std::sync::Arc;

use async_trait::async_trait;
use leadline_error::PipelineError;
use leadline_model::CredentialHandle;
use leadline_model::Tenant;
use leadline_model::ids::ProviderCompanyId;
use leadline_model::ids::TenantId;

/// The durable backend a `CachedTenantRegistry` reads through to.
///
/// Administrative writes (onboarding, suspending a tenant) go directly
/// to implementors of this trait; the cache only ever observes them
/// after its TTL expires — invalidation is time-based, since
/// administrative writes do not need to be immediate.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn resolve_by_provider_company_id(
        &self,
        provider_company_id: &ProviderCompanyId,
    ) -> Result<Option<Tenant>, PipelineError>;

    async fn get(&self, tenant_id: TenantId) -> Result<Option<Tenant>, PipelineError>;

    async fn upsert(&self, tenant: Tenant) -> Result<(), PipelineError>;
}

/// Lets a `CachedTenantRegistry` read through an `Arc`-shared store that
/// administrative handlers also hold directly, so writes through one
/// handle are visible to the other once the cache entry expires.
#[async_trait]
impl<T: TenantStore + ?Sized> TenantStore for Arc<T> {
    async fn resolve_by_provider_company_id(
        &self,
        provider_company_id: &ProviderCompanyId,
    ) -> Result<Option<Tenant>, PipelineError> {
        (**self).resolve_by_provider_company_id(provider_company_id).await
    }

    async fn get(&self, tenant_id: TenantId) -> Result<Option<Tenant>, PipelineError> {
        (**self).get(tenant_id).await
    }

    async fn upsert(&self, tenant: Tenant) -> Result<(), PipelineError> {
        (**self).upsert(tenant).await
    }
}

/// The read path every pipeline collaborator uses to resolve tenants.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    async fn resolve_by_provider_company_id(
        &self,
        provider_company_id: &ProviderCompanyId,
    ) -> Result<Tenant, PipelineError>;

    async fn get(&self, tenant_id: TenantId) -> Result<Tenant, PipelineError>;

    /// Resolves an opaque credential handle for `purpose` (e.g.
    /// `"webhook_secret"`). Never returns raw secret material — the
    /// handle is only meaningful to the secret-store collaborator.
    async fn credentials(
        &self,
        tenant_id: TenantId,
        purpose: &str,
    ) -> Result<CredentialHandle, PipelineError>;
}

/// Unknown or inactive tenant is `fatal` (HTTP 403, not retried), not
/// `discard` — a misconfigured/missing tenant is an immediate failure,
/// not an intentionally-skipped event.
pub(crate) fn not_found(tenant_id_or_company: impl std::fmt::Display) -> PipelineError {
    PipelineError::fatal("not_found", format!("unknown tenant: {tenant_id_or_company}"))
}
