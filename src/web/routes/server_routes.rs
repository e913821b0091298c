use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::properties::ServerSettings;
use crate::servers::{
    CommandResponse, CreateServerRequest, ServerActionResponse, ServerInfo, SettingsResponse,
    WhitelistAction, WhitelistResponse,
};
use crate::web::models::{
    CommandRequest, DeleteServerQuery, LogsQuery, PortRequest, RestartQuery,
    ServerCreateResponse, WhitelistActionRequest,
};
use crate::web::{AppError, AppState};

async fn list_servers_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServerInfo>>, AppError> {
    Ok(Json(app_state.servers.list_servers().await?))
}

async fn create_server_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<ServerCreateResponse>), AppError> {
    let server = app_state.servers.create_server(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ServerCreateResponse {
            message: "Server created".to_string(),
            server,
        }),
    ))
}

async fn start_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<ServerActionResponse>, AppError> {
    Ok(Json(app_state.servers.start_server(&server_id).await?))
}

async fn stop_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<ServerActionResponse>, AppError> {
    Ok(Json(app_state.servers.stop_server(&server_id).await?))
}

async fn restart_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<ServerActionResponse>, AppError> {
    Ok(Json(app_state.servers.restart_server(&server_id).await?))
}

async fn delete_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(query): Query<DeleteServerQuery>,
) -> Result<Json<ServerActionResponse>, AppError> {
    Ok(Json(
        app_state
            .servers
            .delete_server(&server_id, query.retain_data)
            .await?,
    ))
}

async fn logs_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, AppError> {
    let text_plain = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];
    if query.follow {
        let stream = app_state
            .servers
            .follow_logs(&server_id, Some(query.tail))
            .await?;
        return Ok((text_plain, Body::from_stream(stream)).into_response());
    }
    let text = app_state
        .servers
        .logs_text(&server_id, Some(query.tail))
        .await?;
    Ok((text_plain, text).into_response())
}

async fn command_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Json(payload): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    Ok(Json(
        app_state
            .servers
            .send_command(&server_id, &payload.command)
            .await?,
    ))
}

async fn get_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<SettingsResponse>, AppError> {
    Ok(Json(app_state.servers.get_settings(&server_id).await?))
}

async fn update_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(query): Query<RestartQuery>,
    Json(payload): Json<ServerSettings>,
) -> Result<Json<SettingsResponse>, AppError> {
    Ok(Json(
        app_state
            .servers
            .update_settings(&server_id, payload, query.restart)
            .await?,
    ))
}

async fn get_whitelist_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<WhitelistResponse>, AppError> {
    let names = app_state.servers.get_whitelist(&server_id).await?;
    Ok(Json(WhitelistResponse { server_id, names }))
}

async fn update_whitelist_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Json(payload): Json<WhitelistActionRequest>,
) -> Result<Json<WhitelistResponse>, AppError> {
    let action: WhitelistAction = payload.action.parse()?;
    Ok(Json(
        app_state
            .servers
            .update_whitelist(&server_id, action, &payload.name)
            .await?,
    ))
}

async fn reassign_port_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Json(payload): Json<PortRequest>,
) -> Result<Json<ServerInfo>, AppError> {
    Ok(Json(
        app_state
            .servers
            .reassign_port(&server_id, payload.port)
            .await?,
    ))
}

pub fn create_servers_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_servers_handler).post(create_server_handler))
        .route("/{server_id}", axum::routing::delete(delete_server_handler))
        .route("/{server_id}/start", post(start_server_handler))
        .route("/{server_id}/stop", post(stop_server_handler))
        .route("/{server_id}/restart", post(restart_server_handler))
        .route("/{server_id}/logs", get(logs_handler))
        .route("/{server_id}/command", post(command_handler))
        .route(
            "/{server_id}/settings",
            get(get_settings_handler).patch(update_settings_handler),
        )
        .route(
            "/{server_id}/whitelist",
            get(get_whitelist_handler).post(update_whitelist_handler),
        )
        .route("/{server_id}/port", post(reassign_port_handler))
}
