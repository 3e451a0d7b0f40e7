//! `POST /v1/webhook/phone`: phone-call completion intake. Must answer
//! within the provider's ~10s timeout — everything past admission
//! happens on the scheduler's worker pool.

use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use bytes::Bytes;
use leadline_error::PipelineError;
use leadline_model::Request;
use leadline_model::SourceTag;
use leadline_model::Stage;
use leadline_model::WebhookEvent;
use leadline_model::WebhookProcessingStatus;
use leadline_model::ids::CallId;
use leadline_model::ids::ProviderCompanyId;
use leadline_model::ids::ProviderEventId;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use leadline_model::ids::WebhookEventId;
use leadline_store_idempotency::ClaimOutcome;
use leadline_store_idempotency::IdempotencyOutcome;
use serde::Deserialize;
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Only the fields admission needs. The full provider-supplied call
/// metadata is re-fetched from the provider itself during `FETCH_META`,
/// not trusted verbatim from the webhook body.
#[derive(Debug, Deserialize)]
struct PhoneWebhookBody {
    call_id: String,
    company_id: String,
    #[serde(default)]
    event_id: Option<String>,
}

pub async fn receive_phone_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    let parsed: PhoneWebhookBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::webhook(PipelineError::fatal("malformed", format!("invalid JSON body: {e}"))))?;

    let company_id = ProviderCompanyId(parsed.company_id.clone());
    let tenant = match state.tenant_registry.resolve_by_provider_company_id(&company_id).await {
        Ok(tenant) => tenant,
        Err(error) => {
            log_discarded_event(&state, None, &body, false, &error.message).await;
            return Err(ApiError::webhook(error));
        }
    };

    if let Err(error) = verify_signature(&state, tenant.id, &headers, &body).await {
        log_discarded_event(&state, Some(tenant.id), &body, false, &error.message).await;
        return Err(ApiError::webhook(error));
    }

    let event_id = parsed.event_id.clone().unwrap_or_else(|| parsed.call_id.clone());
    let claim = state
        .idempotency_store
        .claim(tenant.id, &event_id)
        .await
        .map_err(ApiError::webhook)?;

    let event = WebhookEvent::received(SourceTag::Phone, "call.completed", body.to_vec(), true, Some(tenant.id));
    let event_log_id = state.event_log.append(event).await.map_err(ApiError::webhook)?;

    match claim {
        ClaimOutcome::AlreadyProcessing => {
            update_event_status(&state, event_log_id, WebhookProcessingStatus::Processing, None).await;
            Ok((StatusCode::OK, "already processing"))
        }
        ClaimOutcome::AlreadyTerminal(outcome) => {
            update_event_status(&state, event_log_id, status_for_idempotency_outcome(outcome), None).await;
            Ok((StatusCode::OK, "already terminal"))
        }
        ClaimOutcome::Claimed => {
            let request_deadline = chrono::Duration::from_std(state.config.orchestrator.request_deadline)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
            let request = Request::admit(
                tenant.id,
                SourceTag::Phone,
                Some(CallId(parsed.call_id.clone())),
                ProviderEventId(event_id.clone()),
                request_deadline,
            );
            let request_id = request.id;
            match state.scheduler.admit(request).await {
                Ok(()) => {
                    spawn_completion_watcher(state.clone(), tenant.id, request_id, event_id, event_log_id);
                    Ok((StatusCode::ACCEPTED, "admitted"))
                }
                Err(error) => {
                    state
                        .idempotency_store
                        .complete(tenant.id, &event_id, IdempotencyOutcome::Failed)
                        .await
                        .ok();
                    update_event_status(&state, event_log_id, WebhookProcessingStatus::Failed, Some(error.message.clone()))
                        .await;
                    Err(ApiError::webhook(error))
                }
            }
        }
    }
}

async fn verify_signature(
    state: &AppState,
    tenant_id: TenantId,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), PipelineError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PipelineError::fatal("malformed", "missing signature header"))?;
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PipelineError::fatal("malformed", "missing timestamp header"))?;

    let handle = state.tenant_registry.credentials(tenant_id, "webhook_secret").await?;
    let credentials = state.secret_resolver.resolve_provider_credentials(&handle).await?;
    state
        .signature_verifier
        .verify(credentials.bearer_token.as_bytes(), timestamp, signature, body)
}

async fn log_discarded_event(state: &AppState, tenant_id: Option<TenantId>, body: &Bytes, signature_verified: bool, reason: &str) {
    let event = WebhookEvent::received(SourceTag::Phone, "call.completed", body.to_vec(), signature_verified, tenant_id);
    if let Ok(id) = state.event_log.append(event).await {
        update_event_status(state, id, WebhookProcessingStatus::Discarded, Some(reason.to_string())).await;
    }
}

async fn update_event_status(state: &AppState, id: WebhookEventId, status: WebhookProcessingStatus, error: Option<String>) {
    if let Err(e) = state.event_log.update_status(id, status, error).await {
        warn!(%id, error = %e, "failed to update webhook event status");
    }
}

fn status_for_idempotency_outcome(outcome: IdempotencyOutcome) -> WebhookProcessingStatus {
    match outcome {
        IdempotencyOutcome::Completed => WebhookProcessingStatus::Completed,
        IdempotencyOutcome::Discarded => WebhookProcessingStatus::Discarded,
        IdempotencyOutcome::Failed => WebhookProcessingStatus::Failed,
    }
}

/// Polls the Request until it reaches a terminal stage, then records the
/// outcome against both the Idempotency Store (`Complete`) and the audit
/// event row. The webhook response has already been sent; this only
/// closes out bookkeeping asynchronously.
fn spawn_completion_watcher(
    state: AppState,
    tenant_id: TenantId,
    request_id: RequestId,
    event_id: String,
    event_log_id: WebhookEventId,
) {
    tokio::spawn(async move {
        for _ in 0..600 {
            match state.request_store.get(tenant_id, request_id).await {
                Ok(request) if request.terminal => {
                    let outcome = match request.stage {
                        Stage::Delivered => IdempotencyOutcome::Completed,
                        Stage::Discarded => IdempotencyOutcome::Discarded,
                        _ => IdempotencyOutcome::Failed,
                    };
                    state.idempotency_store.complete(tenant_id, &event_id, outcome).await.ok();
                    update_event_status(&state, event_log_id, status_for_idempotency_outcome(outcome), None).await;
                    return;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%request_id, error = %error, "completion watcher lost track of request");
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!(%request_id, "completion watcher gave up waiting for a terminal stage");
    });
}
