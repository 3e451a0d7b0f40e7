//! Idempotency Store: guarantees at-most-one in-flight attempt per
//! `(tenant, event-id)` pair.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use leadline_error::PipelineError;
use leadline_model::ids::TenantId;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;

/// The terminal result recorded against a claimed event id, returned
/// verbatim to a later claimant so it can short-circuit reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyOutcome {
    Completed,
    Discarded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyProcessing,
    AlreadyTerminal(IdempotencyOutcome),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn claim(
        &self,
        tenant_id: TenantId,
        event_id: &str,
    ) -> Result<ClaimOutcome, PipelineError>;

    async fn complete(
        &self,
        tenant_id: TenantId,
        event_id: &str,
        outcome: IdempotencyOutcome,
    ) -> Result<(), PipelineError>;
}

struct ClaimRow {
    lease_expires_at: DateTime<Utc>,
    terminal: Option<IdempotencyOutcome>,
}

/// In-process idempotency store used by the app crate's in-memory wiring
/// and by tests. A production deployment swaps this for a row in the
/// same durable database as the Request Store, using a conditional
/// insert for `claim`.
pub struct InMemoryIdempotencyStore {
    lease_duration: chrono::Duration,
    rows: Mutex<HashMap<(TenantId, String), ClaimRow>>,
}

impl InMemoryIdempotencyStore {
    pub fn new(lease_duration: std::time::Duration) -> Self {
        Self {
            lease_duration: chrono::Duration::from_std(lease_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(600)),
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(
        &self,
        tenant_id: TenantId,
        event_id: &str,
    ) -> Result<ClaimOutcome, PipelineError> {
        let now = Utc::now();
        let mut rows = self.rows.lock();
        match rows.get_mut(&(tenant_id, event_id.to_string())) {
            None => {
                rows.insert(
                    (tenant_id, event_id.to_string()),
                    ClaimRow {
                        lease_expires_at: now + self.lease_duration,
                        terminal: None,
                    },
                );
                Ok(ClaimOutcome::Claimed)
            }
            Some(row) => {
                if let Some(outcome) = row.terminal {
                    return Ok(ClaimOutcome::AlreadyTerminal(outcome));
                }
                if row.lease_expires_at > now {
                    return Ok(ClaimOutcome::AlreadyProcessing);
                }
                // Lease expired without completion: the prior claimant
                // presumably crashed. Re-claim for this caller.
                row.lease_expires_at = now + self.lease_duration;
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn complete(
        &self,
        tenant_id: TenantId,
        event_id: &str,
        outcome: IdempotencyOutcome,
    ) -> Result<(), PipelineError> {
        let mut rows = self.rows.lock();
        let row = rows
            .entry((tenant_id, event_id.to_string()))
            .or_insert_with(|| ClaimRow {
                lease_expires_at: Utc::now(),
                terminal: None,
            });
        row.terminal = Some(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_claim_succeeds_second_sees_already_processing() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(600));
        let tenant = TenantId::new();

        assert_eq!(store.claim(tenant, "evt-1").await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(
            store.claim(tenant, "evt-1").await.unwrap(),
            ClaimOutcome::AlreadyProcessing
        );
    }

    #[tokio::test]
    async fn completed_claim_reports_already_terminal() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(600));
        let tenant = TenantId::new();
        store.claim(tenant, "evt-1").await.unwrap();

        store
            .complete(tenant, "evt-1", IdempotencyOutcome::Completed)
            .await
            .unwrap();

        assert_eq!(
            store.claim(tenant, "evt-1").await.unwrap(),
            ClaimOutcome::AlreadyTerminal(IdempotencyOutcome::Completed)
        );
    }

    #[tokio::test]
    async fn expired_lease_allows_reclaim() {
        let store = InMemoryIdempotencyStore::new(Duration::from_millis(0));
        let tenant = TenantId::new();
        store.claim(tenant, "evt-1").await.unwrap();

        // Lease duration of zero means the very next claim sees it as
        // expired rather than in-flight.
        assert_eq!(store.claim(tenant, "evt-1").await.unwrap(), ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn different_tenants_do_not_share_a_claim() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(600));
        store.claim(TenantId::new(), "evt-1").await.unwrap();
        assert_eq!(
            store.claim(TenantId::new(), "evt-1").await.unwrap(),
            ClaimOutcome::Claimed
        );
    }
}
