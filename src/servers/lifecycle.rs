use bytes::BytesMut;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ServerActionResponse, ServerInfo, ServerManager, CreateServerRequest, CONTAINER_DATA_PATH};
use crate::config::ManagerConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::labels::{self, ServerLabels};
use crate::runtime::{ContainerSpec, LogStream};
use crate::sandbox;

/// Variables the server image would otherwise use to expose query or bind
/// to a fixed address.
const STRIPPED_ENV: &[&str] = &["SERVER_IP", "ENABLE_QUERY", "QUERY_PORT"];

pub(crate) fn autopause_env(config: &ManagerConfig) -> BTreeMap<String, String> {
    let timeout = config.autopause_timeout_seconds.to_string();
    BTreeMap::from([
        ("ENABLE_AUTOPAUSE".to_string(), "TRUE".to_string()),
        ("AUTOPAUSE_TIMEOUT_EST".to_string(), timeout.clone()),
        ("AUTOPAUSE_TIMEOUT_INIT".to_string(), timeout),
        (
            "AUTOPAUSE_PERIOD".to_string(),
            config.autopause_period_seconds.to_string(),
        ),
    ])
}

fn build_env(
    config: &ManagerConfig,
    request: &CreateServerRequest,
    memory_mb: u32,
    rcon_password: Option<&str>,
    port: u16,
) -> BTreeMap<String, String> {
    let mut env = request.env.clone();
    for key in STRIPPED_ENV {
        env.remove(*key);
    }
    env.insert(
        "EULA".into(),
        if request.eula { "TRUE" } else { "FALSE" }.into(),
    );
    if let Some(version) = request.version.as_deref().filter(|v| !v.is_empty()) {
        env.insert("VERSION".into(), version.to_string());
    }
    if let Some(server_type) = request.server_type.as_deref().filter(|t| !t.is_empty()) {
        env.insert("TYPE".into(), server_type.to_ascii_uppercase());
    }
    env.insert("MEMORY".into(), format!("{memory_mb}M"));
    env.insert("SERVER_PORT".into(), port.to_string());
    env.insert("WHITELIST".into(), "FALSE".into());
    env.insert("ENFORCE_WHITELIST".into(), "FALSE".into());
    if config.autopause_enabled {
        env.extend(autopause_env(config));
    } else {
        env.insert("ENABLE_AUTOPAUSE".into(), "FALSE".into());
    }
    if let Some(password) = rcon_password {
        env.insert("ENABLE_RCON".into(), "TRUE".into());
        env.insert("RCON_PASSWORD".into(), password.to_string());
    }
    env
}

/// RCON flag and password; a password is generated when RCON is on and none
/// was given.
fn resolve_rcon(config: &ManagerConfig, request: &CreateServerRequest) -> Option<String> {
    let enabled = request.enable_rcon.unwrap_or(config.default_enable_rcon);
    if !enabled {
        return None;
    }
    Some(
        request
            .rcon_password
            .clone()
            .or_else(|| config.default_rcon_password.clone())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
    )
}

impl ServerManager {
    pub async fn list_servers(&self) -> ServiceResult<Vec<ServerInfo>> {
        let containers = self
            .runtime
            .list(&labels::managed_filter(&self.config))
            .await?;
        Ok(containers.iter().map(ServerInfo::from_container).collect())
    }

    /// Creates and starts a new server. All or nothing: a failure after the
    /// data directory exists removes the directory and any container again.
    pub async fn create_server(&self, request: CreateServerRequest) -> ServiceResult<ServerInfo> {
        self.create_server_with_id(request, Uuid::new_v4().simple().to_string())
            .await
    }

    pub(crate) async fn create_server_with_id(
        &self,
        request: CreateServerRequest,
        server_id: String,
    ) -> ServiceResult<ServerInfo> {
        request.validate()?;

        let display_name = request.name.trim().to_string();
        let dns_name = labels::sanitize_name(&display_name);
        let memory_mb = request.memory_mb.unwrap_or(self.config.default_memory_mb);
        let rcon_password = resolve_rcon(&self.config, &request);

        fs::create_dir_all(&self.config.data_root)
            .map_err(|e| ServiceError::io("Failed to create data root", e))?;
        let local_dir = self.config.data_root.join(&server_id);
        let host_dir = self.host_dir(&server_id);

        fs::create_dir(&local_dir).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => {
                ServiceError::conflict("Server data directory already exists")
            }
            _ => ServiceError::io("Failed to create server directory", e),
        })?;

        let mut created_id: Option<String> = None;
        let launched = self
            .launch(
                &request,
                &server_id,
                &display_name,
                &dns_name,
                memory_mb,
                rcon_password.as_deref(),
                &local_dir,
                &host_dir,
                &mut created_id,
            )
            .await;

        let container = match launched {
            Ok(container) => container,
            Err(e) => {
                error!(server_id = %server_id, error = %e, "Server creation failed, cleaning up.");
                if let Some(id) = created_id {
                    if let Err(remove_err) = self.runtime.remove(&id, true).await {
                        warn!(container_id = %id, error = %remove_err, "Failed to remove partial container.");
                    }
                }
                if let Err(cleanup_err) = sandbox::remove_dir_within(&self.config.data_root, &local_dir) {
                    warn!(dir = %local_dir.display(), error = %cleanup_err, "Failed to remove server directory.");
                }
                return Err(e);
            }
        };

        if let Some(port) = container.host_port() {
            if let Err(e) = self.dns.provision(&dns_name, port).await {
                warn!(dns_name = %dns_name, port, error = %e, "DNS provision failed; the reconciler will retry.");
            }
        }

        info!(server_id = %server_id, name = %display_name, container = %container.name, "Server created.");
        Ok(ServerInfo::from_container(&container))
    }

    #[allow(clippy::too_many_arguments)]
    async fn launch(
        &self,
        request: &CreateServerRequest,
        server_id: &str,
        display_name: &str,
        dns_name: &str,
        memory_mb: u32,
        rcon_password: Option<&str>,
        local_dir: &Path,
        host_dir: &Path,
        created_id: &mut Option<String>,
    ) -> ServiceResult<crate::runtime::ContainerInfo> {
        self.enforce_open_access(local_dir)?;
        self.branding.apply(local_dir).await;

        let port = self.ports.select_port(None).await?;
        let labels = ServerLabels {
            server_id: server_id.to_string(),
            name: display_name.to_string(),
            host_dir: host_dir.to_string_lossy().into_owned(),
            local_dir: local_dir.to_string_lossy().into_owned(),
            rcon_enabled: rcon_password.is_some(),
            memory_mb,
            version: request.version.clone().filter(|v| !v.is_empty()),
            server_type: request
                .server_type
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(str::to_ascii_uppercase),
            dns_name: dns_name.to_string(),
        };
        let spec = ContainerSpec {
            image: self.config.minecraft_image.clone(),
            name: format!("mc_{}_{}", dns_name, &server_id[..6]),
            env: build_env(&self.config, request, memory_mb, rcon_password, port),
            labels: labels.to_map(&self.config),
            binds: vec![(
                host_dir.to_string_lossy().into_owned(),
                CONTAINER_DATA_PATH.to_string(),
            )],
            ports: vec![(port, port)],
            memory_mb: Some(memory_mb),
        };

        let id = self.runtime.create(&spec).await?;
        *created_id = Some(id.clone());
        self.runtime.start(&id).await?;
        Ok(self.runtime.inspect(&id).await?)
    }

    pub async fn start_server(&self, server_id: &str) -> ServiceResult<ServerActionResponse> {
        let container = self.find_container(server_id).await?;
        let container = self.ensure_autopause_env(container, server_id).await?;
        let dir = self.checked_dir(&container, server_id)?;
        self.enforce_open_access(&dir)?;
        self.branding.apply(&dir).await;

        self.runtime.start(&container.id).await?;
        info!(server_id = %server_id, "Server started.");
        Ok(ServerActionResponse::new(server_id, "started"))
    }

    pub async fn stop_server(&self, server_id: &str) -> ServiceResult<ServerActionResponse> {
        let container = self.find_container(server_id).await?;
        self.runtime.stop(&container.id).await?;
        info!(server_id = %server_id, "Server stopped.");
        Ok(ServerActionResponse::new(server_id, "stopped"))
    }

    pub async fn restart_server(&self, server_id: &str) -> ServiceResult<ServerActionResponse> {
        let container = self.find_container(server_id).await?;
        let container = self.ensure_autopause_env(container, server_id).await?;
        let dir = self.checked_dir(&container, server_id)?;
        self.enforce_open_access(&dir)?;
        self.branding.apply(&dir).await;

        self.runtime.restart(&container.id).await?;
        info!(server_id = %server_id, "Server restarted.");
        Ok(ServerActionResponse::new(server_id, "restarted"))
    }

    /// Removes the server. The data directory is deleted only when
    /// `retain_data` is false, and never if it lies outside the data root.
    pub async fn delete_server(
        &self,
        server_id: &str,
        retain_data: bool,
    ) -> ServiceResult<ServerActionResponse> {
        let container = self.find_container(server_id).await?;
        let dns_name = labels::dns_name_of(&container);
        if let Err(e) = self.dns.remove(&dns_name).await {
            warn!(dns_name = %dns_name, error = %e, "DNS delete failed.");
        }

        let local_dir = self.local_dir(&container, server_id);
        self.runtime.remove(&container.id, true).await?;

        if !retain_data {
            self.validate_local_dir(&local_dir)?;
            sandbox::remove_dir_within(&self.config.data_root, &local_dir)?;
        }
        info!(server_id = %server_id, retain_data, "Server deleted.");
        Ok(ServerActionResponse::new(server_id, "deleted"))
    }

    /// Log output so far, decoded lossily.
    pub async fn logs_text(&self, server_id: &str, tail: Option<u64>) -> ServiceResult<String> {
        let container = self.find_container(server_id).await?;
        let mut stream = self.runtime.logs(&container.id, tail, false).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Live log stream that follows new output.
    pub async fn follow_logs(&self, server_id: &str, tail: Option<u64>) -> ServiceResult<LogStream> {
        let container = self.find_container(server_id).await?;
        Ok(self.runtime.logs(&container.id, tail, true).await?)
    }

    /// Copies the branding icon into every managed server directory that
    /// passes the data root check; returns how many were written.
    pub async fn apply_branding_to_all(&self) -> ServiceResult<usize> {
        if self.branding.available_source().await.is_none() {
            return Ok(0);
        }
        let containers = self
            .runtime
            .list(&labels::managed_filter(&self.config))
            .await?;

        let mut updated = 0;
        for container in containers {
            let Some(server_id) = container.label(labels::SERVER_ID).filter(|id| !id.is_empty())
            else {
                continue;
            };
            let dir = self.local_dir(&container, server_id);
            if self.validate_local_dir(&dir).is_err() {
                continue;
            }
            if self.branding.apply(&dir).await {
                updated += 1;
            }
        }
        Ok(updated)
    }
}
