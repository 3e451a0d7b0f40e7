//! Event Log: an append-only audit record of every inbound webhook.
//! Never consulted on the hot path for correctness — the Request Store
//! is the source of truth for in-flight work.

use async_trait::async_trait;
use leadline_error::PipelineError;
use leadline_model::WebhookEvent;
use leadline_model::WebhookProcessingStatus;
use leadline_model::ids::WebhookEventId;
use parking_lot::Mutex;
use tracing::debug;

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: WebhookEvent) -> Result<WebhookEventId, PipelineError>;

    async fn update_status(
        &self,
        id: WebhookEventId,
        status: WebhookProcessingStatus,
        error: Option<String>,
    ) -> Result<(), PipelineError>;
}

/// In-process event log used by the app crate's in-memory wiring and by
/// tests. A production deployment swaps this for an append-only table;
/// `update_status` still never deletes or reorders rows.
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<WebhookEvent>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<WebhookEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: WebhookEvent) -> Result<WebhookEventId, PipelineError> {
        let id = event.id;
        debug!(%id, source = event.source.as_ref(), "webhook event appended");
        self.events.lock().push(event);
        Ok(id)
    }

    async fn update_status(
        &self,
        id: WebhookEventId,
        status: WebhookProcessingStatus,
        error: Option<String>,
    ) -> Result<(), PipelineError> {
        let mut events = self.events.lock();
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| PipelineError::fatal("not_found", format!("no webhook event {id}")))?;
        event.status = status;
        if error.is_some() {
            event.processed_at = Some(chrono::Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadline_model::SourceTag;

    #[tokio::test]
    async fn append_then_update_status_mutates_the_same_row() {
        let log = InMemoryEventLog::new();
        let event = WebhookEvent::received(SourceTag::Phone, "call.completed", vec![1, 2, 3], true, None);
        let id = log.append(event).await.unwrap();

        log.update_status(id, WebhookProcessingStatus::Discarded, Some("tenant not found".to_string()))
            .await
            .unwrap();

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, WebhookProcessingStatus::Discarded);
    }

    #[tokio::test]
    async fn update_status_on_unknown_id_is_fatal_not_found() {
        let log = InMemoryEventLog::new();
        let err = log
            .update_status(WebhookEventId::new(), WebhookProcessingStatus::Failed, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, "not_found");
    }
}
