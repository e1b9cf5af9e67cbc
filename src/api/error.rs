//! HTTP mapping for domain errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::BayError;

/// Structured error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl BayError {
    fn status_code(&self) -> StatusCode {
        match self {
            BayError::NotFound(_) => StatusCode::NOT_FOUND,
            BayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BayError::Forbidden(_) => StatusCode::FORBIDDEN,
            BayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            BayError::CapacityExhausted(_) => StatusCode::CONFLICT,
            BayError::WaitTimeout(_) | BayError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BayError::ShipUnready(_) => StatusCode::SERVICE_UNAVAILABLE,
            BayError::Backend(_) => StatusCode::BAD_GATEWAY,
            BayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            BayError::NotFound(_) => "NOT_FOUND",
            BayError::Unauthorized(_) => "UNAUTHORIZED",
            BayError::Forbidden(_) => "FORBIDDEN",
            BayError::InvalidRequest(_) => "INVALID_REQUEST",
            BayError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            BayError::CapacityExhausted(_) => "CAPACITY_EXHAUSTED",
            BayError::WaitTimeout(_) => "WAIT_TIMEOUT",
            BayError::ShipUnready(_) => "SHIP_UNREADY",
            BayError::BackendTimeout(_) => "BACKEND_TIMEOUT",
            BayError::Backend(_) => "BACKEND_ERROR",
            BayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for BayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            BayError::Internal(e) => error!(error_code = code, error = ?e, "internal error"),
            BayError::Backend(msg) | BayError::ShipUnready(msg) => {
                warn!(error_code = code, message = %msg, "backend error");
            }
            _ => debug!(error_code = code, message = %message, "client error"),
        }

        let body = ErrorResponse {
            error: message,
            code,
        };
        (status, Json(body)).into_response()
    }
}
