use serde::{Deserialize, Serialize};

use crate::servers::ServerInfo;

fn default_true() -> bool {
    true
}

fn default_tail() -> u64 {
    200
}

#[derive(Deserialize)]
pub struct DeleteServerQuery {
    #[serde(default = "default_true")]
    pub retain_data: bool,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub follow: bool,
    #[serde(default = "default_tail")]
    pub tail: u64,
}

#[derive(Deserialize, Default)]
pub struct RestartQuery {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Deserialize)]
pub struct VersionsQuery {
    #[serde(default)]
    pub loader: Option<String>,
    #[serde(default)]
    pub game_version: Option<String>,
}

#[derive(Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Deserialize)]
pub struct WhitelistActionRequest {
    pub action: String,
    pub name: String,
}

#[derive(Deserialize, Default)]
pub struct PortRequest {
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Deserialize)]
pub struct ConfigUpdateRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct ServerCreateResponse {
    pub message: String,
    pub server: ServerInfo,
}

#[derive(Serialize)]
pub struct BrandingApplyResponse {
    pub updated: usize,
}
