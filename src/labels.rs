//! Container labels: the durable record of a managed server.
//!
//! Everything the manager needs to find a server again after a restart or a
//! container recreation lives in these labels, never in the container itself.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::config::ManagerConfig;
use crate::runtime::{ContainerInfo, ListFilter};

pub const SERVER_ID: &str = "mc.server_id";
pub const SERVER_NAME: &str = "mc.server_name";
pub const SERVER_DIR: &str = "mc.server_dir";
pub const SERVER_DIR_LOCAL: &str = "mc.server_dir_local";
pub const RCON_ENABLED: &str = "mc.rcon_enabled";
pub const MEMORY_MB: &str = "mc.memory_mb";
pub const VERSION: &str = "mc.version";
pub const SERVER_TYPE: &str = "mc.server_type";
pub const MODDED: &str = "mc.modded";
pub const DNS_NAME: &str = "mc.dns_name";

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9-]+").unwrap());

/// Reduces a display name to a lowercase DNS label.
///
/// Runs of anything other than ASCII letters, digits and `-` collapse into a
/// single `-`; leading and trailing dashes are dropped. Falls back to
/// `server` when nothing is left.
pub fn sanitize_name(name: &str) -> String {
    let cleaned = UNSAFE_CHARS
        .replace_all(name, "-")
        .trim_matches('-')
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        "server".to_string()
    } else {
        cleaned
    }
}

/// Server types that load mods.
pub fn is_modded_type(server_type: &str) -> bool {
    matches!(
        server_type.trim().to_ascii_uppercase().as_str(),
        "FORGE" | "FABRIC"
    )
}

fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// Labels written on a freshly created server container.
#[derive(Debug, Clone)]
pub struct ServerLabels {
    pub server_id: String,
    pub name: String,
    pub host_dir: String,
    pub local_dir: String,
    pub rcon_enabled: bool,
    pub memory_mb: u32,
    pub version: Option<String>,
    pub server_type: Option<String>,
    pub dns_name: String,
}

impl ServerLabels {
    pub fn to_map(&self, config: &ManagerConfig) -> HashMap<String, String> {
        let modded = self
            .server_type
            .as_deref()
            .map(is_modded_type)
            .unwrap_or(false);
        let mut labels = HashMap::new();
        labels.insert(
            config.managed_label.clone(),
            config.managed_label_value.clone(),
        );
        labels.insert(SERVER_ID.to_string(), self.server_id.clone());
        labels.insert(SERVER_NAME.to_string(), self.name.clone());
        labels.insert(SERVER_DIR.to_string(), self.host_dir.clone());
        labels.insert(SERVER_DIR_LOCAL.to_string(), self.local_dir.clone());
        labels.insert(RCON_ENABLED.to_string(), flag(self.rcon_enabled));
        labels.insert(MEMORY_MB.to_string(), self.memory_mb.to_string());
        labels.insert(
            VERSION.to_string(),
            self.version.clone().unwrap_or_default(),
        );
        labels.insert(
            SERVER_TYPE.to_string(),
            self.server_type.clone().unwrap_or_default(),
        );
        labels.insert(MODDED.to_string(), flag(modded));
        labels.insert(DNS_NAME.to_string(), self.dns_name.clone());
        labels
    }
}

/// Filter matching every container owned by this manager.
pub fn managed_filter(config: &ManagerConfig) -> ListFilter {
    ListFilter::default().label(&config.managed_label, &config.managed_label_value)
}

/// Filter matching the container of one server.
pub fn server_filter(config: &ManagerConfig, server_id: &str) -> ListFilter {
    managed_filter(config).label(SERVER_ID, server_id)
}

/// DNS label of a container: the stored name, else its sanitized display name.
pub fn dns_name_of(container: &ContainerInfo) -> String {
    match container.label(DNS_NAME).filter(|v| !v.trim().is_empty()) {
        Some(name) => name.to_string(),
        None => sanitize_name(container.label(SERVER_NAME).unwrap_or(&container.name)),
    }
}

pub fn memory_mb_of(container: &ContainerInfo) -> Option<u32> {
    container.label(MEMORY_MB).and_then(|v| v.parse().ok())
}

/// Whether mods may be installed: the `mc.modded` label when it says so, else
/// the `TYPE` the image was started with.
pub fn is_modded(container: &ContainerInfo) -> bool {
    if container
        .label(MODDED)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return true;
    }
    container
        .env_map()
        .get("TYPE")
        .map(|t| is_modded_type(t))
        .unwrap_or(false)
}

/// RCON state: the label wins when present, the `ENABLE_RCON` variable otherwise.
pub fn is_rcon_enabled(container: &ContainerInfo) -> bool {
    if let Some(value) = container.label(RCON_ENABLED) {
        return value.eq_ignore_ascii_case("true");
    }
    container
        .env_map()
        .get("ENABLE_RCON")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_produces_dns_labels() {
        assert_eq!(sanitize_name("My Cool Server!"), "my-cool-server");
        assert_eq!(sanitize_name("--Alpha__Beta--"), "alpha-beta");
        assert_eq!(sanitize_name("  ***  "), "server");
        assert_eq!(sanitize_name("Survival-2"), "survival-2");
    }

    #[test]
    fn labels_mark_modded_types() {
        let config = ManagerConfig::with_data_root("/srv/mc");
        let labels = ServerLabels {
            server_id: "abc".into(),
            name: "Test".into(),
            host_dir: "/host/abc".into(),
            local_dir: "/srv/mc/abc".into(),
            rcon_enabled: true,
            memory_mb: 1024,
            version: None,
            server_type: Some("FABRIC".into()),
            dns_name: "test".into(),
        }
        .to_map(&config);

        assert_eq!(labels["mc.manager"], "craftdock");
        assert_eq!(labels[MODDED], "true");
        assert_eq!(labels[RCON_ENABLED], "true");
        assert_eq!(labels[VERSION], "");
        assert_eq!(labels[MEMORY_MB], "1024");
    }

    #[test]
    fn rcon_label_takes_precedence_over_env() {
        let mut container = ContainerInfo {
            env: vec!["ENABLE_RCON=TRUE".to_string()],
            ..Default::default()
        };
        assert!(is_rcon_enabled(&container));

        container
            .labels
            .insert(RCON_ENABLED.to_string(), "false".to_string());
        assert!(!is_rcon_enabled(&container));
    }

    #[test]
    fn modded_falls_back_to_type_env() {
        let mut container = ContainerInfo {
            env: vec!["TYPE=forge".to_string()],
            ..Default::default()
        };
        container
            .labels
            .insert(MODDED.to_string(), "false".to_string());
        assert!(is_modded(&container));

        container.env = vec!["TYPE=PAPER".to_string()];
        assert!(!is_modded(&container));
    }

    #[test]
    fn dns_name_falls_back_to_display_name() {
        let mut container = ContainerInfo {
            name: "mc_fallback_abcdef".into(),
            ..Default::default()
        };
        container
            .labels
            .insert(SERVER_NAME.to_string(), "Hello World".to_string());
        assert_eq!(dns_name_of(&container), "hello-world");

        container
            .labels
            .insert(DNS_NAME.to_string(), "custom".to_string());
        assert_eq!(dns_name_of(&container), "custom");
    }
}
