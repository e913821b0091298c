use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

use super::{open_access_properties, ServerManager};
use crate::error::{ServiceError, ServiceResult};
use crate::properties::{self, ServerSettings};

pub const WHITELIST_FILE: &str = "whitelist.json";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingsResponse {
    pub server_id: String,
    pub settings: ServerSettings,
}

/// Names in `whitelist.json`, deduplicated and sorted. A missing file or a
/// document that is not a list is empty; entries without a name are skipped.
pub(crate) fn read_whitelist(dir: &Path) -> ServiceResult<Vec<String>> {
    let raw = match fs::read_to_string(dir.join(WHITELIST_FILE)) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ServiceError::io("Failed to read whitelist", e)),
    };
    let document: Value = serde_json::from_str(&raw)
        .map_err(|e| ServiceError::internal(format!("Failed to parse whitelist.json: {e}")))?;
    let Value::Array(entries) = document else {
        return Ok(Vec::new());
    };
    let names: BTreeSet<String> = entries
        .iter()
        .filter_map(|entry| match entry.get("name")? {
            Value::String(name) => Some(name.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|name| !name.is_empty())
        .collect();
    Ok(names.into_iter().collect())
}

impl ServerManager {
    pub async fn get_settings(&self, server_id: &str) -> ServiceResult<SettingsResponse> {
        let (_, dir) = self.open_data_dir(server_id).await?;
        let current = properties::read_properties(&dir)
            .map_err(|e| ServiceError::io("Failed to read server.properties", e))?;
        Ok(SettingsResponse {
            server_id: server_id.to_string(),
            settings: ServerSettings::from_properties(&current),
        })
    }

    /// Writes the given settings into `server.properties`.
    ///
    /// Network fields are owned by the manager and refused. Whitelisting is
    /// switched off again whatever the caller sent.
    pub async fn update_settings(
        &self,
        server_id: &str,
        settings: ServerSettings,
        restart: bool,
    ) -> ServiceResult<SettingsResponse> {
        if settings.server_port.is_some()
            || settings.server_ip.is_some()
            || settings.enable_query.is_some()
            || settings.query_port.is_some()
        {
            return Err(ServiceError::invalid(
                "server_port, server_ip, enable_query and query_port are managed automatically",
            ));
        }

        let mut updates = settings.to_properties();
        if let Some(key) = updates
            .iter()
            .find(|(_, value)| value.contains(['\n', '\r']))
            .map(|(key, _)| key)
        {
            return Err(ServiceError::invalid(format!("{key} must be a single line")));
        }
        updates.extend(open_access_properties());

        let (container, dir) = self.open_data_dir(server_id).await?;
        properties::write_properties(&dir, &updates)
            .map_err(|e| ServiceError::io("Failed to write server.properties", e))?;
        info!(server_id = %server_id, keys = updates.len(), restart, "Server settings updated.");

        self.restart_if(&container, restart).await?;
        self.get_settings(server_id).await
    }

    pub async fn get_whitelist(&self, server_id: &str) -> ServiceResult<Vec<String>> {
        let (_, dir) = self.open_data_dir(server_id).await?;
        read_whitelist(&dir)
    }
}
