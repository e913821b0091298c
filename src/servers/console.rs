use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use super::ServerManager;
use crate::error::{ServiceError, ServiceResult};
use crate::labels;
use crate::runtime::ContainerInfo;

/// In-container RCON client shipped with the server image.
const RCON_CLIENT: &str = "rcon-cli";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub server_id: String,
    pub exit_code: i64,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitelistAction {
    Add,
    Remove,
}

impl WhitelistAction {
    fn as_str(self) -> &'static str {
        match self {
            WhitelistAction::Add => "add",
            WhitelistAction::Remove => "remove",
        }
    }
}

impl fmt::Display for WhitelistAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WhitelistAction {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(WhitelistAction::Add),
            "remove" => Ok(WhitelistAction::Remove),
            other => Err(ServiceError::invalid(format!(
                "Unknown whitelist action: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WhitelistResponse {
    pub server_id: String,
    pub names: Vec<String>,
}

fn validate_player_name(name: &str) -> ServiceResult<&str> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 32 {
        return Err(ServiceError::invalid(
            "Player name must be between 1 and 32 characters",
        ));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ServiceError::invalid("Player name cannot contain whitespace"));
    }
    Ok(name)
}

impl ServerManager {
    fn require_console(&self, container: &ContainerInfo) -> ServiceResult<()> {
        if !container.is_running() {
            return Err(ServiceError::conflict("Server is not running"));
        }
        if !labels::is_rcon_enabled(container) {
            return Err(ServiceError::RequiresCapability(
                "RCON is not enabled for this server".to_string(),
            ));
        }
        Ok(())
    }

    async fn rcon(&self, container: &ContainerInfo, command: &str) -> ServiceResult<String> {
        let argv = vec![RCON_CLIENT.to_string(), command.to_string()];
        let result = self.runtime.exec(&container.id, &argv).await?;
        let output = result.output_lossy();
        if result.exit_code != 0 {
            warn!(container_id = %container.id, exit_code = result.exit_code, "RCON command failed.");
            return Err(ServiceError::internal(format!(
                "RCON command failed (exit {}): {}",
                result.exit_code,
                output.trim()
            )));
        }
        Ok(output)
    }

    /// Runs a console command over RCON.
    pub async fn send_command(&self, server_id: &str, command: &str) -> ServiceResult<CommandResponse> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ServiceError::invalid("Command cannot be empty"));
        }
        let container = self.find_container(server_id).await?;
        self.require_console(&container)?;

        let output = self.rcon(&container, command).await?;
        info!(server_id = %server_id, "Console command sent.");
        Ok(CommandResponse {
            server_id: server_id.to_string(),
            exit_code: 0,
            output,
        })
    }

    /// Adds or removes a player, reloads the whitelist, and returns the
    /// names now on file.
    pub async fn update_whitelist(
        &self,
        server_id: &str,
        action: WhitelistAction,
        name: &str,
    ) -> ServiceResult<WhitelistResponse> {
        let name = validate_player_name(name)?;
        let container = self.find_container(server_id).await?;
        self.require_console(&container)?;

        self.rcon(&container, &format!("whitelist {action} {name}"))
            .await?;
        self.rcon(&container, "whitelist reload").await?;
        info!(server_id = %server_id, action = %action, player = %name, "Whitelist updated.");

        Ok(WhitelistResponse {
            server_id: server_id.to_string(),
            names: self.get_whitelist(server_id).await?,
        })
    }
}
