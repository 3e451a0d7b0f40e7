//! `CallRecording`: optional sibling of a phone-call `Request`, tracking
//! the audio artifact independently so its lifecycle (size, duration,
//! transcription progress) is queryable without loading the whole
//! Request.

use serde::Deserialize;
use serde::Serialize;

use crate::ids::CallRecordingId;
use crate::ids::RequestId;
use crate::ids::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TranscriptionStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecording {
    pub id: CallRecordingId,
    pub tenant_id: TenantId,
    pub request_id: RequestId,
    /// Always under a tenant-scoped prefix, enforced by the Blob Store
    /// Adapter that issued it.
    pub blob_uri: String,
    pub size_bytes: u64,
    pub duration_seconds: Option<f64>,
    pub format: String,
    pub transcription_status: TranscriptionStatus,
}
