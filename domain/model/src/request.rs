//! `Request`: the durable state of one pipeline run, owned exclusively
//! by the worker currently holding its advance-lease.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::AnalysisResult;
use crate::Stage;
use crate::ids::CallId;
use crate::ids::ProviderEventId;
use crate::ids::RequestId;
use crate::ids::TenantId;
use crate::webhook_event::SourceTag;

/// The last failure recorded on a Request, surfaced verbatim by the
/// management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestError {
    pub class: String,
    pub code: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// An exclusive, renewable claim a worker holds while advancing a
/// Request's stage. Workers without a valid lease must not write.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdvanceLease {
    pub owner: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AdvanceLease {
    pub fn is_held_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        match (&self.owner, self.expires_at) {
            (Some(owner), Some(expires_at)) => owner == worker_id && expires_at > now,
            _ => false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub tenant_id: TenantId,
    pub source: SourceTag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stage: Stage,
    /// The stage this Request was actively working when it last entered
    /// a terminal stage, used by the management API's retry operation to
    /// reset a FAILED Request to where it left off.
    pub last_active_stage: Stage,
    /// Attempt count per stage, keyed by `Stage`'s `AsRef<str>` token so
    /// it serializes as a plain JSON object.
    pub attempts: HashMap<String, u32>,
    pub call_id: Option<CallId>,
    pub provider_event_id: ProviderEventId,
    pub external_call_id: Option<String>,
    /// Raw call metadata fetched in FETCH_META, consumed by ANALYZE
    /// alongside the transcript.
    pub call_metadata: Option<serde_json::Value>,
    pub recording_url: Option<String>,
    pub blob_uri: Option<String>,
    pub transcript: Option<String>,
    pub analysis: Option<AnalysisResult>,
    pub lead_score: Option<u8>,
    pub error: Option<RequestError>,
    pub terminal: bool,
    pub lease: AdvanceLease,
    /// Set when a stage schedules a retry: the scheduler must not pick
    /// this Request back up before this instant.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Absolute wall-clock deadline for the whole Request.
    pub deadline_at: DateTime<Utc>,
    /// Operator cancellation flag checked at every suspension point.
    pub cancel_requested: bool,
}

impl Request {
    pub fn admit(
        tenant_id: TenantId,
        source: SourceTag,
        call_id: Option<CallId>,
        provider_event_id: ProviderEventId,
        request_deadline: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            tenant_id,
            source,
            created_at: now,
            updated_at: now,
            stage: Stage::INITIAL,
            last_active_stage: Stage::INITIAL,
            attempts: HashMap::new(),
            call_id,
            provider_event_id,
            external_call_id: None,
            call_metadata: None,
            recording_url: None,
            blob_uri: None,
            transcript: None,
            analysis: None,
            lead_score: None,
            error: None,
            terminal: false,
            lease: AdvanceLease::default(),
            next_attempt_at: None,
            deadline_at: now + request_deadline,
            cancel_requested: false,
        }
    }

    pub fn attempt_count(&self, stage: Stage) -> u32 {
        self.attempts.get(stage.as_ref()).copied().unwrap_or(0)
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TenantId;

    fn sample() -> Request {
        Request::admit(
            TenantId::new(),
            SourceTag::Phone,
            Some(CallId("CAL_A".to_string())),
            ProviderEventId("E_A".to_string()),
            chrono::Duration::minutes(10),
        )
    }

    #[test]
    fn admit_starts_at_initial_stage_and_non_terminal() {
        let req = sample();
        assert_eq!(req.stage, Stage::Admitted);
        assert!(!req.terminal);
        assert_eq!(req.attempt_count(Stage::FetchMeta), 0);
    }

    #[test]
    fn lease_is_held_only_by_owner_before_expiry() {
        let mut req = sample();
        let now = Utc::now();
        req.lease = AdvanceLease {
            owner: Some("worker-1".to_string()),
            expires_at: Some(now + chrono::Duration::seconds(30)),
        };
        assert!(req.lease.is_held_by("worker-1", now));
        assert!(!req.lease.is_held_by("worker-2", now));
        assert!(!req.lease.is_held_by("worker-1", now + chrono::Duration::minutes(1)));
    }
}
