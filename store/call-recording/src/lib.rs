//! Call Recording Store: the durable record of each audio artifact a
//! `Request` produces, kept independent of the `Request` row so its
//! size, duration, and transcription progress are queryable without
//! loading the whole lead.

use std::collections::HashMap;

use async_trait::async_trait;
use leadline_error::PipelineError;
use leadline_model::CallRecording;
use leadline_model::TranscriptionStatus;
use leadline_model::ids::CallRecordingId;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use parking_lot::RwLock;

#[async_trait]
pub trait CallRecordingStore: Send + Sync {
    async fn create(&self, recording: CallRecording) -> Result<(), PipelineError>;

    async fn get_by_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<CallRecording, PipelineError>;

    async fn update_transcription_status(
        &self,
        tenant_id: TenantId,
        id: CallRecordingId,
        status: TranscriptionStatus,
    ) -> Result<CallRecording, PipelineError>;
}

/// In-process `CallRecordingStore` used by the app crate's in-memory
/// wiring and by tests. A production deployment swaps this for a table
/// keyed on `id` with a secondary index on `(tenant_id, request_id)`.
#[derive(Default)]
pub struct InMemoryCallRecordingStore {
    rows: RwLock<HashMap<CallRecordingId, CallRecording>>,
}

impl InMemoryCallRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallRecordingStore for InMemoryCallRecordingStore {
    async fn create(&self, recording: CallRecording) -> Result<(), PipelineError> {
        self.rows.write().insert(recording.id, recording);
        Ok(())
    }

    async fn get_by_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<CallRecording, PipelineError> {
        self.rows
            .read()
            .values()
            .find(|r| r.tenant_id == tenant_id && r.request_id == request_id)
            .cloned()
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no call recording for request {request_id}")))
    }

    async fn update_transcription_status(
        &self,
        tenant_id: TenantId,
        id: CallRecordingId,
        status: TranscriptionStatus,
    ) -> Result<CallRecording, PipelineError> {
        let mut rows = self.rows.write();
        let recording = rows
            .get_mut(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no call recording {id}")))?;
        recording.transcription_status = status;
        Ok(recording.clone())
    }
}
