use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
}

/// Runtime configuration of the manager.
///
/// Values come from an optional TOML file, overridden by environment
/// variables (upper-cased field names), falling back to defaults.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub docker_host: Option<String>,
    pub data_root: PathBuf,
    pub host_data_root: PathBuf,
    pub minecraft_image: String,
    pub modrinth_base_url: String,
    pub port_range_start: i64,
    pub port_range_end: i64,
    pub default_memory_mb: u32,
    pub default_enable_rcon: bool,
    pub default_rcon_password: Option<String>,
    pub managed_label: String,
    pub managed_label_value: String,
    pub autopause_enabled: bool,
    pub autopause_timeout_seconds: u64,
    pub autopause_period_seconds: u64,
    pub auto_dns_enabled: bool,
    pub cf_api_token: Option<String>,
    pub cf_zone_id: Option<String>,
    pub cf_zone_name: Option<String>,
    pub mc_parent_domain: String,
    pub dns_reconcile_interval_seconds: u64,
    pub branding_icon_path: PathBuf,
    pub listen_address: String,
    pub api_token: Option<String>,
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialManagerConfig {
    docker_host: Option<String>,
    data_root: Option<PathBuf>,
    host_data_root: Option<PathBuf>,
    minecraft_image: Option<String>,
    modrinth_base_url: Option<String>,
    port_range_start: Option<i64>,
    port_range_end: Option<i64>,
    default_memory_mb: Option<u32>,
    default_enable_rcon: Option<bool>,
    default_rcon_password: Option<String>,
    managed_label: Option<String>,
    managed_label_value: Option<String>,
    autopause_enabled: Option<bool>,
    autopause_timeout_seconds: Option<u64>,
    autopause_period_seconds: Option<u64>,
    auto_dns_enabled: Option<bool>,
    cf_api_token: Option<String>,
    cf_zone_id: Option<String>,
    cf_zone_name: Option<String>,
    mc_parent_domain: Option<String>,
    dns_reconcile_interval_seconds: Option<u64>,
    branding_icon_path: Option<PathBuf>,
    listen_address: Option<String>,
    api_token: Option<String>,
    log_dir: Option<String>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/data/minecraft")
}

fn default_minecraft_image() -> String {
    "itzg/minecraft-server".to_string()
}

fn default_modrinth_base_url() -> String {
    "https://api.modrinth.com/v2".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:8000".to_string()
}

/// Empty strings in the environment mean "unset".
fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Makes a relative path absolute against the working directory without
/// touching the filesystem.
fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

impl ManagerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialManagerConfig = match config_path {
            Some(path_str) => Self::read_file(Path::new(path_str))?,
            None => PartialManagerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialManagerConfig = envy::from_env::<PartialManagerConfig>()?;

        // 3. Merge: environment overrides file
        Ok(Self::merge(env_config, file_config))
    }

    fn read_file(path: &Path) -> Result<PartialManagerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PartialManagerConfig::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn merge(env: PartialManagerConfig, file: PartialManagerConfig) -> Self {
        let data_root = absolutize(env.data_root.or(file.data_root).unwrap_or_else(default_data_root));
        let host_data_root = env
            .host_data_root
            .or(file.host_data_root)
            .map(absolutize)
            .unwrap_or_else(|| data_root.clone());
        let branding_icon_path = env
            .branding_icon_path
            .or(file.branding_icon_path)
            .unwrap_or_else(|| data_root.join("_branding").join("server-icon.png"));

        ManagerConfig {
            docker_host: non_blank(env.docker_host.or(file.docker_host)),
            host_data_root,
            branding_icon_path,
            minecraft_image: env
                .minecraft_image
                .or(file.minecraft_image)
                .unwrap_or_else(default_minecraft_image),
            modrinth_base_url: env
                .modrinth_base_url
                .or(file.modrinth_base_url)
                .unwrap_or_else(default_modrinth_base_url),
            port_range_start: env.port_range_start.or(file.port_range_start).unwrap_or(25565),
            port_range_end: env.port_range_end.or(file.port_range_end).unwrap_or(25665),
            default_memory_mb: env.default_memory_mb.or(file.default_memory_mb).unwrap_or(2048),
            default_enable_rcon: env
                .default_enable_rcon
                .or(file.default_enable_rcon)
                .unwrap_or(false),
            default_rcon_password: non_blank(
                env.default_rcon_password.or(file.default_rcon_password),
            ),
            managed_label: env
                .managed_label
                .or(file.managed_label)
                .unwrap_or_else(|| "mc.manager".to_string()),
            managed_label_value: env
                .managed_label_value
                .or(file.managed_label_value)
                .unwrap_or_else(|| "craftdock".to_string()),
            autopause_enabled: env.autopause_enabled.or(file.autopause_enabled).unwrap_or(false),
            autopause_timeout_seconds: env
                .autopause_timeout_seconds
                .or(file.autopause_timeout_seconds)
                .unwrap_or(3600),
            autopause_period_seconds: env
                .autopause_period_seconds
                .or(file.autopause_period_seconds)
                .unwrap_or(10),
            auto_dns_enabled: env.auto_dns_enabled.or(file.auto_dns_enabled).unwrap_or(false),
            cf_api_token: non_blank(env.cf_api_token.or(file.cf_api_token)),
            cf_zone_id: non_blank(env.cf_zone_id.or(file.cf_zone_id)),
            cf_zone_name: non_blank(env.cf_zone_name.or(file.cf_zone_name)),
            mc_parent_domain: env
                .mc_parent_domain
                .or(file.mc_parent_domain)
                .unwrap_or_default(),
            dns_reconcile_interval_seconds: env
                .dns_reconcile_interval_seconds
                .or(file.dns_reconcile_interval_seconds)
                .unwrap_or(300)
                .max(1),
            listen_address: env
                .listen_address
                .or(file.listen_address)
                .unwrap_or_else(default_listen_address),
            api_token: non_blank(env.api_token.or(file.api_token)),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(|| "logs".to_string()),
            data_root,
        }
    }

    /// Configuration rooted at `data_root` with every other value defaulted.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        let file = PartialManagerConfig {
            data_root: Some(data_root.into()),
            ..Default::default()
        };
        Self::merge(PartialManagerConfig::default(), file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_file_and_defaults_fill_gaps() {
        let file: PartialManagerConfig = toml::from_str(
            r#"
            data_root = "/srv/mc"
            port_range_start = 30000
            port_range_end = 30010
            managed_label_value = "from-file"
            "#,
        )
        .unwrap();
        let env = PartialManagerConfig {
            managed_label_value: Some("from-env".to_string()),
            cf_api_token: Some("   ".to_string()),
            ..Default::default()
        };

        let config = ManagerConfig::merge(env, file);

        assert_eq!(config.data_root, PathBuf::from("/srv/mc"));
        assert_eq!(config.host_data_root, PathBuf::from("/srv/mc"));
        assert_eq!(config.port_range_start, 30000);
        assert_eq!(config.port_range_end, 30010);
        assert_eq!(config.managed_label_value, "from-env");
        assert_eq!(config.managed_label, "mc.manager");
        assert_eq!(config.minecraft_image, "itzg/minecraft-server");
        assert_eq!(config.cf_api_token, None);
        assert_eq!(
            config.branding_icon_path,
            PathBuf::from("/srv/mc/_branding/server-icon.png")
        );
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let parsed = ManagerConfig::read_file(Path::new("/nonexistent/craftdock.toml")).unwrap();
        assert!(parsed.data_root.is_none());
    }

    #[test]
    fn malformed_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "port_range_start = \"not a number\"").unwrap();

        let result = ManagerConfig::read_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
