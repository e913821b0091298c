use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::error::ServiceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Service(err) => match err {
                ServiceError::Invalid(msg) => (StatusCode::BAD_REQUEST, msg),
                ServiceError::Conflict(msg) => (StatusCode::CONFLICT, msg),
                ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
                ServiceError::RequiresCapability(msg) => (StatusCode::FORBIDDEN, msg),
                ServiceError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
                ServiceError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
                ServiceError::RuntimeUnavailable(msg) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("Container runtime unavailable: {msg}"),
                ),
                ServiceError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_status_codes() {
        let cases = [
            (ServiceError::invalid("x"), StatusCode::BAD_REQUEST),
            (ServiceError::conflict("x"), StatusCode::CONFLICT),
            (ServiceError::not_found("x"), StatusCode::NOT_FOUND),
            (ServiceError::RequiresCapability("x".into()), StatusCode::FORBIDDEN),
            (ServiceError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (ServiceError::upstream("x"), StatusCode::BAD_GATEWAY),
            (ServiceError::RuntimeUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ServiceError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
        assert_eq!(
            AppError::Unauthorized("no token".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
