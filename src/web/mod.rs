use axum::{
    extract::State,
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ManagerConfig;
use crate::meta::MetadataService;
use crate::mods::ModService;
use crate::servers::ServerManager;
use crate::web::{
    middleware::auth,
    models::BrandingApplyResponse,
    routes::{meta_routes, mod_routes, server_routes},
};

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub servers: Arc<ServerManager>,
    pub mods: Arc<ModService>,
    pub meta: Arc<MetadataService>,
    pub config: Arc<ManagerConfig>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

async fn apply_branding_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<BrandingApplyResponse>, AppError> {
    let updated = app_state.servers.apply_branding_to_all().await?;
    Ok(Json(BrandingApplyResponse { updated }))
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check_handler))
        .nest(
            "/servers",
            server_routes::create_servers_router()
                .merge(mod_routes::create_server_mods_router())
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .merge(
            mod_routes::create_catalog_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .nest(
            "/meta",
            meta_routes::create_meta_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .route(
            "/branding/apply",
            post(apply_branding_handler)
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
