//! Maps the pipeline's `PipelineError` taxonomy onto HTTP responses.
//!
//! The webhook endpoint has its own status table; the management API
//! has none specified, so it falls back to a generic class-based
//! mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use leadline_error::ErrorClass;
use leadline_error::PipelineError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorBodyInner,
}

#[derive(Serialize)]
struct ErrorBodyInner {
    class: String,
    code: String,
    message: String,
}

pub struct ApiError {
    status: StatusCode,
    error: PipelineError,
}

impl ApiError {
    pub fn new(status: StatusCode, error: PipelineError) -> Self {
        Self { status, error }
    }

    /// Status table for errors surfaced directly by the inbound webhook
    /// handler (signature/admission failures).
    pub fn webhook(error: PipelineError) -> Self {
        let status = match error.code {
            "malformed" => StatusCode::BAD_REQUEST,
            "stale_timestamp" | "signature_mismatch" | "auth" => StatusCode::UNAUTHORIZED,
            "not_found" | "tenant_disabled" => StatusCode::FORBIDDEN,
            "already_processing" => StatusCode::CONFLICT,
            "busy" | "quota_exceeded" | "shed" => StatusCode::TOO_MANY_REQUESTS,
            _ => generic_status(&error),
        };
        Self::new(status, error)
    }

    /// Generic mapping used by the management API, where §6.2 leaves the
    /// status table unspecified beyond ordinary REST conventions.
    pub fn management(error: PipelineError) -> Self {
        let status = generic_status(&error);
        Self::new(status, error)
    }
}

fn generic_status(error: &PipelineError) -> StatusCode {
    match error.class {
        ErrorClass::Fatal if error.code == "not_found" => StatusCode::NOT_FOUND,
        ErrorClass::Fatal => StatusCode::BAD_REQUEST,
        ErrorClass::Discard => StatusCode::NOT_FOUND,
        ErrorClass::Skip => StatusCode::OK,
        ErrorClass::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Deadline => StatusCode::GATEWAY_TIMEOUT,
        ErrorClass::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorBodyInner {
                class: self.error.class.to_string(),
                code: self.error.code.to_string(),
                message: self.error.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
