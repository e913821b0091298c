//! Managed server orchestration on top of a [`ContainerRuntime`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::branding::BrandingIcon;
use crate::config::ManagerConfig;
use crate::dns::DnsAutomation;
use crate::error::{ServiceError, ServiceResult};
use crate::labels;
use crate::ports::PortAllocator;
use crate::properties;
use crate::runtime::{ContainerInfo, ContainerRuntime};
use crate::sandbox;

mod console;
mod lifecycle;
mod recreate;
mod settings;

pub use console::{CommandResponse, WhitelistAction, WhitelistResponse};
pub use settings::SettingsResponse;

/// Path of the server directory inside the container.
pub const CONTAINER_DATA_PATH: &str = "/data";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub server_id: String,
    pub name: String,
    pub status: String,
    pub image: Option<String>,
    pub port: Option<u16>,
    pub container_id: String,
    pub version: Option<String>,
    pub server_type: Option<String>,
    pub modded: Option<bool>,
    pub memory_mb: Option<u32>,
}

impl ServerInfo {
    /// Labels first, container facts as fallback.
    pub fn from_container(container: &ContainerInfo) -> Self {
        let non_empty = |key: &str| {
            container
                .label(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let server_type = non_empty(labels::SERVER_TYPE);
        let modded = match container.label(labels::MODDED) {
            Some(value) => value.eq_ignore_ascii_case("true"),
            None => server_type
                .as_deref()
                .map(labels::is_modded_type)
                .unwrap_or(false),
        };

        ServerInfo {
            server_id: container.label(labels::SERVER_ID).unwrap_or_default().to_string(),
            name: container
                .label(labels::SERVER_NAME)
                .unwrap_or(&container.name)
                .to_string(),
            status: container.state.clone(),
            image: Some(container.image.clone()).filter(|i| !i.is_empty()),
            port: container.host_port(),
            container_id: container.id.clone(),
            version: non_empty(labels::VERSION),
            server_type,
            modded: Some(modded),
            memory_mb: labels::memory_mb_of(container),
        }
    }
}

fn default_eula() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateServerRequest {
    pub name: String,
    /// Always refused; ports are assigned automatically.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub memory_mb: Option<u32>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub server_type: Option<String>,
    #[serde(default = "default_eula")]
    pub eula: bool,
    #[serde(default)]
    pub enable_rcon: Option<bool>,
    #[serde(default)]
    pub rcon_password: Option<String>,
}

impl CreateServerRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            eula: true,
            ..Default::default()
        }
    }

    fn validate(&self) -> ServiceResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ServiceError::invalid("name cannot be blank"));
        }
        if name.chars().count() > 64 {
            return Err(ServiceError::invalid("name must be at most 64 characters"));
        }
        if self.port.is_some() {
            return Err(ServiceError::invalid("Server port is assigned automatically"));
        }
        if let Some(memory) = self.memory_mb {
            if !(256..=65536).contains(&memory) {
                return Err(ServiceError::invalid(
                    "memory_mb must be between 256 and 65536",
                ));
            }
        }
        for (field, value) in [("version", &self.version), ("server_type", &self.server_type)] {
            if value.as_deref().map(|v| v.chars().count() > 32).unwrap_or(false) {
                return Err(ServiceError::invalid(format!(
                    "{field} must be at most 32 characters"
                )));
            }
        }
        if self.rcon_password.as_deref() == Some("") {
            return Err(ServiceError::invalid("rcon_password cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerActionResponse {
    pub server_id: String,
    pub status: String,
}

impl ServerActionResponse {
    fn new(server_id: &str, status: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            status: status.to_string(),
        }
    }
}

/// Server orchestration: lifecycle, recreation, settings and console access.
pub struct ServerManager {
    runtime: Arc<dyn ContainerRuntime>,
    ports: PortAllocator,
    dns: DnsAutomation,
    branding: BrandingIcon,
    config: Arc<ManagerConfig>,
}

impl ServerManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        dns: DnsAutomation,
        branding: BrandingIcon,
        config: Arc<ManagerConfig>,
    ) -> Self {
        let ports = PortAllocator::new(
            runtime.clone(),
            config.port_range_start,
            config.port_range_end,
        );
        Self {
            runtime,
            ports,
            dns,
            branding,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The container labelled with `server_id`.
    ///
    /// Should an interrupted recreation have left a replacement behind, the
    /// container with the regular name is preferred.
    pub(crate) async fn find_container(&self, server_id: &str) -> ServiceResult<ContainerInfo> {
        let mut containers = self
            .runtime
            .list(&labels::server_filter(&self.config, server_id))
            .await?;
        containers.sort_by_key(|c| recreate::is_replacement_name(&c.name));
        containers
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::not_found("Server not found"))
    }

    pub(crate) fn host_dir(&self, server_id: &str) -> PathBuf {
        self.config.host_data_root.join(server_id)
    }

    /// Local directory of a server: `<data_root>/<server_id>` when present,
    /// else the directory recorded in the labels if it lies inside the root.
    pub(crate) fn local_dir(&self, container: &ContainerInfo, server_id: &str) -> PathBuf {
        let expected = self.config.data_root.join(server_id);
        if expected.is_dir() {
            return expected;
        }
        if let Some(recorded) = container.label(labels::SERVER_DIR_LOCAL) {
            let recorded = Path::new(recorded);
            if sandbox::is_within(&self.config.data_root, recorded) && recorded.is_dir() {
                return recorded.to_path_buf();
            }
        }
        expected
    }

    fn validate_local_dir(&self, dir: &Path) -> ServiceResult<()> {
        if sandbox::is_within(&self.config.data_root, dir) {
            Ok(())
        } else {
            Err(ServiceError::invalid("Server data path is invalid"))
        }
    }

    fn require_local_dir_exists(&self, dir: &Path) -> ServiceResult<()> {
        if dir.is_dir() {
            return Ok(());
        }
        Err(ServiceError::internal(format!(
            "Server data directory is missing on this manager: {}. Check DATA_ROOT/HOST_DATA_ROOT and the manager's bind mount.",
            dir.display()
        )))
    }

    /// The container's `/data` bind must be the host directory this manager
    /// expects, or writes here would never reach the server.
    fn assert_data_mount_matches(
        &self,
        container: &ContainerInfo,
        server_id: &str,
    ) -> ServiceResult<()> {
        let Some(source) = container.mount_source(CONTAINER_DATA_PATH) else {
            return Ok(());
        };
        let expected = comparable(&self.host_dir(server_id));
        let actual = comparable(Path::new(source));
        if actual != expected {
            return Err(ServiceError::internal(format!(
                "Server volume mount mismatch. Container has {CONTAINER_DATA_PATH} -> {}, but manager expects {}. Fix HOST_DATA_ROOT, then recreate the server container.",
                actual.display(),
                expected.display()
            )));
        }
        Ok(())
    }

    /// Looks up a server and checks its data directory end to end.
    pub(crate) async fn open_data_dir(
        &self,
        server_id: &str,
    ) -> ServiceResult<(ContainerInfo, PathBuf)> {
        let container = self.find_container(server_id).await?;
        let dir = self.checked_dir(&container, server_id)?;
        Ok((container, dir))
    }

    fn checked_dir(&self, container: &ContainerInfo, server_id: &str) -> ServiceResult<PathBuf> {
        let dir = self.local_dir(container, server_id);
        self.validate_local_dir(&dir)?;
        self.require_local_dir_exists(&dir)?;
        self.assert_data_mount_matches(container, server_id)?;
        Ok(dir)
    }

    fn enforce_open_access(&self, dir: &Path) -> ServiceResult<()> {
        properties::write_properties(dir, &open_access_properties())
            .map_err(|e| ServiceError::io("Failed to enforce open access", e))
    }

    /// Restarts the container when `restart` is set.
    pub(crate) async fn restart_if(&self, container: &ContainerInfo, restart: bool) -> ServiceResult<()> {
        if restart {
            self.runtime.restart(&container.id).await?;
        }
        Ok(())
    }
}

pub(crate) fn open_access_properties() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("white-list".to_string(), "false".to_string()),
        ("enforce-whitelist".to_string(), "false".to_string()),
    ])
}

/// Real path when resolvable, the lexical path otherwise. Host paths need not
/// exist on the manager's filesystem.
fn comparable(path: &Path) -> PathBuf {
    sandbox::real_location(path).unwrap_or_else(|_| path.to_path_buf())
}
