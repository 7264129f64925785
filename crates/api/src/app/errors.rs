use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use procura_core::DomainError;
use procura_infra::{IngestionError, StoreError};

/// Map a domain rule violation to its response.
///
/// Rule violations are answered with `403` and a machine code; stale versions
/// get `409`.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let code = err.code();
    match &err {
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, code, err.to_string()),
        DomainError::InsufficientStock {
            product_id,
            requested,
            available,
        } => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "error": code,
                "message": err.to_string(),
                "product_id": product_id,
                "requested": requested,
                "available": available,
            })),
        )
            .into_response(),
        DomainError::InvalidTransition { from, to } => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "error": code,
                "message": err.to_string(),
                "from": from,
                "to": to,
            })),
        )
            .into_response(),
        _ => json_error(StatusCode::FORBIDDEN, code, err.to_string()),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Domain(e) => domain_error_to_response(e),
        StoreError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Storage(msg) => {
            error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "internal storage error")
        }
    }
}

/// Synchronous ingestion checks (URL validation) only; run failures are
/// reported on the job.
pub fn ingestion_error_to_response(err: IngestionError) -> axum::response::Response {
    match err {
        IngestionError::InvalidUrl(msg) => json_error(StatusCode::FORBIDDEN, "invalid_url", msg),
        IngestionError::Domain(e) => domain_error_to_response(e),
        IngestionError::Store(e) => store_error_to_response(e),
        other => json_error(StatusCode::BAD_GATEWAY, "ingestion_error", other.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
