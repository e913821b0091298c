//! Text config files under a modded server's `config/` folder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::ModService;
use crate::error::{ServiceError, ServiceResult};
use crate::sandbox;

pub const CONFIG_DIR: &str = "config";

/// Size ceiling for reading and writing a config file.
pub const MAX_CONFIG_BYTES: usize = 512 * 1024;

const CONFIG_EXTENSIONS: &[&str] = &[
    "cfg",
    "conf",
    "json",
    "json5",
    "properties",
    "toml",
    "txt",
    "yaml",
    "yml",
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigFileInfo {
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigListResponse {
    pub server_id: String,
    pub files: Vec<ConfigFileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFileResponse {
    pub server_id: String,
    pub path: String,
    pub content: String,
}

fn has_config_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| CONFIG_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// `/`-separated path of `real` relative to `root_real`.
fn display_path(root_real: &Path, real: &Path) -> String {
    real.strip_prefix(root_real)
        .unwrap_or(real)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_config_dir(config_dir: &Path) -> ServiceResult<Vec<ConfigFileInfo>> {
    let root_real = fs::canonicalize(config_dir)
        .map_err(|e| ServiceError::io("Failed to resolve config folder", e))?;

    let mut files: Vec<ConfigFileInfo> = WalkDir::new(&root_real)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry.file_name()))
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file() && has_config_extension(entry.path()))
        .filter_map(|entry| {
            let real = fs::canonicalize(entry.path()).ok()?;
            if !real.starts_with(&root_real) || real == root_real {
                return None;
            }
            let meta = fs::metadata(&real).ok()?;
            let modified_at = meta
                .modified()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            Some(ConfigFileInfo {
                path: display_path(&root_real, &real),
                size_bytes: meta.len(),
                modified_at,
            })
        })
        .collect();
    files.sort_by_key(|f| f.path.to_lowercase());
    Ok(files)
}

impl ModService {
    /// Config folder of a modded server, which the server generates on first
    /// start.
    async fn config_dir(&self, server_id: &str) -> ServiceResult<(crate::runtime::ContainerInfo, PathBuf)> {
        let (container, dir) = self.open_modded(server_id).await?;
        let config_dir = dir.join(CONFIG_DIR);
        if !config_dir.is_dir() {
            return Err(ServiceError::conflict(
                "Config folder not found. Start the server once to generate configs.",
            ));
        }
        Ok((container, config_dir))
    }

    fn existing_config_file(config_dir: &Path, path: &str) -> ServiceResult<PathBuf> {
        let full = sandbox::resolve_path(config_dir, path, Some(CONFIG_EXTENSIONS))?;
        if !full.is_file() {
            return Err(ServiceError::not_found("Config file not found"));
        }
        Ok(full)
    }

    /// Editable config files, sorted case-insensitively. A server without a
    /// config folder yet has none.
    pub async fn list_config_files(&self, server_id: &str) -> ServiceResult<ConfigListResponse> {
        let (_, dir) = self.open_modded(server_id).await?;
        let config_dir = dir.join(CONFIG_DIR);
        let files = if config_dir.is_dir() {
            tokio::task::spawn_blocking(move || walk_config_dir(&config_dir)).await??
        } else {
            Vec::new()
        };
        Ok(ConfigListResponse {
            server_id: server_id.to_string(),
            files,
        })
    }

    pub async fn get_config_file(&self, server_id: &str, path: &str) -> ServiceResult<ConfigFileResponse> {
        let (_, config_dir) = self.config_dir(server_id).await?;
        let full = Self::existing_config_file(&config_dir, path)?;

        let size = fs::metadata(&full)
            .map_err(|e| ServiceError::io("Failed to read config file", e))?
            .len();
        if size > MAX_CONFIG_BYTES as u64 {
            return Err(ServiceError::PayloadTooLarge(format!(
                "Config file too large to edit (>{MAX_CONFIG_BYTES} bytes)"
            )));
        }
        let data = fs::read(&full).map_err(|e| ServiceError::io("Failed to read config file", e))?;
        if data.contains(&0) {
            return Err(ServiceError::invalid("Config file appears to be binary"));
        }

        let root_real = fs::canonicalize(&config_dir)
            .map_err(|e| ServiceError::io("Failed to resolve config folder", e))?;
        Ok(ConfigFileResponse {
            server_id: server_id.to_string(),
            path: display_path(&root_real, &full),
            content: String::from_utf8_lossy(&data).into_owned(),
        })
    }

    /// Replaces the content of an existing config file.
    pub async fn update_config_file(
        &self,
        server_id: &str,
        path: &str,
        content: &str,
        restart: bool,
    ) -> ServiceResult<ConfigFileResponse> {
        let (container, config_dir) = self.config_dir(server_id).await?;
        let full = Self::existing_config_file(&config_dir, path)?;
        if content.len() > MAX_CONFIG_BYTES {
            return Err(ServiceError::PayloadTooLarge(format!(
                "Config content too large (>{MAX_CONFIG_BYTES} bytes)"
            )));
        }
        fs::write(&full, content).map_err(|e| ServiceError::io("Failed to save config file", e))?;

        self.servers.restart_if(&container, restart).await?;
        self.get_config_file(server_id, path).await
    }
}
