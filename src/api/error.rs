//! Maps `AppError` onto HTTP status codes and a uniform JSON error body.

use crate::types::AppError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub fn to_status(error: &AppError) -> StatusCode {
    match error {
        AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Conflict(_) => StatusCode::CONFLICT,
        AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::StorageDegraded(_) => StatusCode::OK,
        AppError::PayloadTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
        AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AppError::InsufficientPanel(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::PolicyReject(_) => StatusCode::FORBIDDEN,
        AppError::Cancelled => StatusCode::CONFLICT,
        AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AppError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AppError::SerializationError(_) => StatusCode::BAD_REQUEST,
        AppError::TransportError(_) => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = to_status(&self);
        let body = ErrorBody {
            error: error_kind(&self).to_string(),
            code: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn error_kind(error: &AppError) -> &'static str {
    match error {
        AppError::InvalidRequest(_) => "invalid_request",
        AppError::NotFound(_) => "not_found",
        AppError::Conflict(_) => "conflict",
        AppError::StorageUnavailable(_) => "storage_unavailable",
        AppError::StorageDegraded(_) => "storage_degraded",
        AppError::PayloadTooLarge(_, _) => "payload_too_large",
        AppError::Timeout(_) => "timeout",
        AppError::InsufficientPanel(_) => "insufficient_panel",
        AppError::PolicyReject(_) => "policy_reject",
        AppError::Cancelled => "cancelled",
        AppError::ConfigError(_) => "config_error",
        AppError::IoError(_) => "io_error",
        AppError::SerializationError(_) => "serialization_error",
        AppError::TransportError(_) => "transport_error",
    }
}
