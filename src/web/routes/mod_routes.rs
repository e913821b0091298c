use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::mods::{
    ConfigFileResponse, ConfigListResponse, ModInstallRequest, ModInstallResponse,
    ModListResponse, ModpackInstallRequest, ModpackInstallResponse, SearchParams,
};
use crate::registry::{ModVersion, ProjectType, SearchResults};
use crate::web::models::{ConfigUpdateRequest, RestartQuery, VersionsQuery};
use crate::web::{AppError, AppState};

// --- Per-server mods, modpacks and mod configs ---

async fn list_mods_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<ModListResponse>, AppError> {
    Ok(Json(app_state.mods.list_mods(&server_id).await?))
}

async fn install_mod_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(query): Query<RestartQuery>,
    Json(payload): Json<ModInstallRequest>,
) -> Result<Json<ModInstallResponse>, AppError> {
    Ok(Json(
        app_state
            .mods
            .install_mod(&server_id, payload, query.restart)
            .await?,
    ))
}

async fn remove_mod_handler(
    State(app_state): State<Arc<AppState>>,
    Path((server_id, filename)): Path<(String, String)>,
    Query(query): Query<RestartQuery>,
) -> Result<Json<ModListResponse>, AppError> {
    Ok(Json(
        app_state
            .mods
            .remove_mod(&server_id, &filename, query.restart)
            .await?,
    ))
}

async fn install_modpack_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(query): Query<RestartQuery>,
    Json(payload): Json<ModpackInstallRequest>,
) -> Result<Json<ModpackInstallResponse>, AppError> {
    Ok(Json(
        app_state
            .mods
            .install_modpack(&server_id, payload, query.restart)
            .await?,
    ))
}

async fn list_config_files_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<ConfigListResponse>, AppError> {
    Ok(Json(app_state.mods.list_config_files(&server_id).await?))
}

async fn get_config_file_handler(
    State(app_state): State<Arc<AppState>>,
    Path((server_id, path)): Path<(String, String)>,
) -> Result<Json<ConfigFileResponse>, AppError> {
    Ok(Json(app_state.mods.get_config_file(&server_id, &path).await?))
}

async fn update_config_file_handler(
    State(app_state): State<Arc<AppState>>,
    Path((server_id, path)): Path<(String, String)>,
    Query(query): Query<RestartQuery>,
    Json(payload): Json<ConfigUpdateRequest>,
) -> Result<Json<ConfigFileResponse>, AppError> {
    Ok(Json(
        app_state
            .mods
            .update_config_file(&server_id, &path, &payload.content, query.restart)
            .await?,
    ))
}

pub fn create_server_mods_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{server_id}/mods",
            get(list_mods_handler).post(install_mod_handler),
        )
        .route(
            "/{server_id}/mods/{filename}",
            axum::routing::delete(remove_mod_handler),
        )
        .route("/{server_id}/modpacks", post(install_modpack_handler))
        .route("/{server_id}/mod-settings", get(list_config_files_handler))
        .route(
            "/{server_id}/mod-settings/{*path}",
            get(get_config_file_handler).put(update_config_file_handler),
        )
}

// --- Registry catalog ---

async fn search_mods_handler(
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResults>, AppError> {
    Ok(Json(app_state.mods.search(ProjectType::Mod, params).await?))
}

async fn search_modpacks_handler(
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResults>, AppError> {
    Ok(Json(
        app_state.mods.search(ProjectType::Modpack, params).await?,
    ))
}

async fn mod_versions_handler(
    State(app_state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<Vec<ModVersion>>, AppError> {
    let loader = query.loader.unwrap_or_else(|| "fabric".to_string());
    Ok(Json(
        app_state
            .mods
            .list_versions(&project_id, Some(&loader), query.game_version.as_deref())
            .await?,
    ))
}

async fn modpack_versions_handler(
    State(app_state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<Vec<ModVersion>>, AppError> {
    Ok(Json(
        app_state
            .mods
            .list_versions(
                &project_id,
                query.loader.as_deref(),
                query.game_version.as_deref(),
            )
            .await?,
    ))
}

pub fn create_catalog_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/mods/search", get(search_mods_handler))
        .route("/mods/{project_id}/versions", get(mod_versions_handler))
        .route("/modpacks/search", get(search_modpacks_handler))
        .route(
            "/modpacks/{project_id}/versions",
            get(modpack_versions_handler),
        )
}
