use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::web::{AppError, AppState};

async fn minecraft_releases_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let versions = app_state.meta.minecraft_releases().await?;
    Ok(Json(json!({ "versions": versions })))
}

async fn fabric_game_versions_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let versions = app_state.meta.fabric_game_versions().await?;
    Ok(Json(json!({ "versions": versions })))
}

async fn fabric_loaders_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let loaders = app_state.meta.fabric_loader_versions().await?;
    Ok(Json(json!({ "loaders": loaders })))
}

pub fn create_meta_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/minecraft/releases", get(minecraft_releases_handler))
        .route("/fabric/game-versions", get(fabric_game_versions_handler))
        .route("/fabric/loaders", get(fabric_loaders_handler))
}
