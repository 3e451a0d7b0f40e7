//! Tenant-scoped management API: onboarding, workflow updates, and
//! failed-request visibility/retry for operators.

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use chrono::DateTime;
use chrono::Utc;
use leadline_model::Request;
use leadline_model::SourceTag;
use leadline_model::Stage;
use leadline_model::Tenant;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use leadline_store_request::Page;
use leadline_store_request::Pagination;
use leadline_store_request::RequestFilter;
use serde::Deserialize;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

pub async fn get_tenant(State(state): State<AppState>, Path(tenant_id): Path<TenantId>) -> Result<Json<Tenant>, ApiError> {
    let tenant = state.tenant_registry.get(tenant_id).await.map_err(ApiError::management)?;
    Ok(Json(tenant))
}

pub async fn put_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
    Json(mut tenant): Json<Tenant>,
) -> Result<Json<Tenant>, ApiError> {
    tenant.id = tenant_id;
    state.tenant_store.upsert(tenant.clone()).await.map_err(ApiError::management)?;
    Ok(Json(tenant))
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub stage: Option<Stage>,
    pub source: Option<SourceTag>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListRequestsResponse {
    pub items: Vec<Request>,
    pub total: usize,
}

pub async fn list_requests(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<ListRequestsResponse>, ApiError> {
    let filter = RequestFilter {
        stage: query.stage,
        source: query.source,
        created_from: query.created_from,
        created_to: query.created_to,
    };
    let mut pagination = Pagination::default();
    if let Some(offset) = query.offset {
        pagination.offset = offset;
    }
    if let Some(limit) = query.limit {
        pagination.limit = limit;
    }

    let Page { items, total } = state
        .request_store
        .list_by_tenant(tenant_id, filter, pagination)
        .await
        .map_err(ApiError::management)?;
    Ok(Json(ListRequestsResponse { items, total }))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path((tenant_id, request_id)): Path<(TenantId, RequestId)>,
) -> Result<Json<Request>, ApiError> {
    let request = state.request_store.get(tenant_id, request_id).await.map_err(ApiError::management)?;
    Ok(Json(request))
}

pub async fn retry_request(
    State(state): State<AppState>,
    Path((tenant_id, request_id)): Path<(TenantId, RequestId)>,
) -> Result<Json<Request>, ApiError> {
    let request = state.request_store.retry_failed(tenant_id, request_id).await.map_err(ApiError::management)?;
    state.scheduler.requeue(tenant_id, request_id).await.map_err(ApiError::management)?;
    Ok(Json(request))
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct DetailedHealth {
    pub scheduler_running: bool,
}

pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealth> {
    Json(DetailedHealth {
        scheduler_running: !state.scheduler.is_stopped(),
    })
}
