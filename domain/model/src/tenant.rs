//! `Tenant`: the per-customer configuration row resolved from an
//! inbound webhook's provider company id.

use serde::Deserialize;
use serde::Serialize;

use crate::WorkflowConfig;
use crate::ids::ProviderCompanyId;
use crate::ids::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    pub fn is_active(self) -> bool {
        matches!(self, TenantStatus::Active)
    }
}

/// An opaque reference to a secret resolved through the secret-store
/// collaborator: never the material itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialHandle(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Requests per minute admitted before admission returns
    /// `quota_exceeded`.
    pub quota_rpm: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self { quota_rpm: 600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    pub status: TenantStatus,
    pub provider_company_id: ProviderCompanyId,
    /// Handle for the webhook HMAC secret; resolved at signature-verify
    /// time through the secret-store collaborator.
    pub webhook_secret_handle: CredentialHandle,
    /// Handle for the telephony provider's bearer credentials; resolved
    /// by the Provider Client at the moment of use.
    pub provider_credentials_handle: CredentialHandle,
    pub workflow: WorkflowConfig,
    pub quota: QuotaLimits,
    /// Weighted round-robin priority used by the scheduler; higher gets
    /// proportionally more worker time.
    pub priority: u32,
}

impl Tenant {
    pub fn is_usable(&self) -> bool {
        self.status.is_active()
    }
}
