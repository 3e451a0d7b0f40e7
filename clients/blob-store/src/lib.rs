//! Blob Store Adapter: call audio storage under tenant-scoped keys,
//! with a time-based lifecycle policy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use chrono::Utc;
use leadline_error::PipelineError;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use parking_lot::RwLock;

/// Lifecycle storage class, advanced purely by object age: warm → cool
/// at 90 d → cold at 365 d → deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Warm,
    Cool,
    Cold,
}

impl StorageClass {
    const COOL_AFTER: chrono::Duration = chrono::Duration::days(90);
    const COLD_AFTER: chrono::Duration = chrono::Duration::days(365);

    pub fn for_age(age: chrono::Duration) -> Self {
        if age >= Self::COLD_AFTER {
            StorageClass::Cold
        } else if age >= Self::COOL_AFTER {
            StorageClass::Cool
        } else {
            StorageClass::Warm
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub tenant_id: TenantId,
    pub request_id: RequestId,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl BlobMetadata {
    pub fn storage_class(&self, now: DateTime<Utc>) -> StorageClass {
        StorageClass::for_age(now - self.created_at)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under a tenant-scoped key and returns the
    /// resulting URI. The adapter owns prefixing — callers never
    /// construct the tenant segment themselves.
    async fn put(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, PipelineError>;

    async fn get(&self, uri: &str) -> Result<Bytes, PipelineError>;

    async fn signed_read_url(&self, uri: &str, ttl: Duration) -> Result<String, PipelineError>;
}

struct StoredObject {
    bytes: Bytes,
    metadata: BlobMetadata,
}

/// In-process `BlobStore` used by the app crate's in-memory wiring and
/// by tests. A production deployment swaps this for an object-storage
/// bucket and mints real presigned URLs in `signed_read_url`.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self, uri: &str) -> Option<BlobMetadata> {
        self.objects.read().get(uri).map(|o| o.metadata.clone())
    }
}

fn tenant_scoped_uri(tenant_id: TenantId, key: &str) -> String {
    format!("mem://{tenant_id}/{key}")
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, PipelineError> {
        let uri = tenant_scoped_uri(tenant_id, key);
        self.objects.write().insert(
            uri.clone(),
            StoredObject {
                bytes,
                metadata: BlobMetadata {
                    tenant_id,
                    request_id,
                    content_type: content_type.to_string(),
                    created_at: Utc::now(),
                },
            },
        );
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Bytes, PipelineError> {
        self.objects
            .read()
            .get(uri)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no blob at {uri}")))
    }

    async fn signed_read_url(&self, uri: &str, ttl: Duration) -> Result<String, PipelineError> {
        if !self.objects.read().contains_key(uri) {
            return Err(PipelineError::fatal("not_found", format!("no blob at {uri}")));
        }
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        Ok(format!("{uri}?expires={}", expires_at.timestamp()))
    }
}
