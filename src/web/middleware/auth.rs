use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::web::{error::AppError, AppState};

/// Static bearer-token guard. Without a configured `api_token` every request
/// passes.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    if token != expected {
        warn!(path = %req.uri().path(), "Rejected request with invalid API token.");
        return Err(AppError::Unauthorized("Invalid API token".to_string()));
    }
    Ok(next.run(req).await)
}
