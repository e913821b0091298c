//! Mod, modpack and mod-config management for modded servers.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::labels;
use crate::registry::{ContentRegistry, ModVersion, ProjectType, SearchQuery, SearchResults};
use crate::runtime::ContainerInfo;
use crate::servers::ServerManager;

mod config_files;
mod download;
mod modpack;
mod resolve;

pub use config_files::{ConfigFileInfo, ConfigFileResponse, ConfigListResponse, MAX_CONFIG_BYTES};
pub use modpack::{ModpackInstallRequest, ModpackInstallResponse};

pub const MODS_DIR: &str = "mods";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModInstallRequest {
    pub project_id: String,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub loader: Option<String>,
    #[serde(default)]
    pub game_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModInstallResponse {
    pub server_id: String,
    /// File of the requested mod itself.
    pub filename: String,
    /// Files written by this call, dependencies included.
    pub installed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModListResponse {
    pub server_id: String,
    pub mods: Vec<String>,
}

/// Registry search parameters as received from callers.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub loader: Option<String>,
    #[serde(default)]
    pub game_version: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl SearchParams {
    fn into_query(self, project_type: ProjectType) -> ServiceResult<SearchQuery> {
        let limit = self.limit.unwrap_or(10);
        if !(1..=50).contains(&limit) {
            return Err(ServiceError::invalid("limit must be between 1 and 50"));
        }
        let loader = match project_type {
            ProjectType::Mod => Some(self.loader.unwrap_or_else(|| "fabric".to_string())),
            ProjectType::Modpack => self.loader,
        };
        Ok(SearchQuery {
            query: self.query.trim().to_string(),
            project_type,
            loader: loader.filter(|l| !l.trim().is_empty()),
            game_version: self.game_version.filter(|v| !v.trim().is_empty()),
            limit,
        })
    }
}

fn is_jar(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".jar")
}

/// Installer and file access for mods. Every server-scoped operation requires
/// a modded server.
pub struct ModService {
    registry: Arc<dyn ContentRegistry>,
    servers: Arc<ServerManager>,
}

impl ModService {
    pub fn new(registry: Arc<dyn ContentRegistry>, servers: Arc<ServerManager>) -> Self {
        Self { registry, servers }
    }

    async fn open_modded(&self, server_id: &str) -> ServiceResult<(ContainerInfo, PathBuf)> {
        let (container, dir) = self.servers.open_data_dir(server_id).await?;
        if !labels::is_modded(&container) {
            return Err(ServiceError::RequiresCapability(
                "Mods are only supported on Forge or Fabric servers".to_string(),
            ));
        }
        Ok((container, dir))
    }

    pub async fn search(
        &self,
        project_type: ProjectType,
        params: SearchParams,
    ) -> ServiceResult<SearchResults> {
        let query = params.into_query(project_type)?;
        Ok(self.registry.search(&query).await?)
    }

    pub async fn list_versions(
        &self,
        project_id: &str,
        loader: Option<&str>,
        game_version: Option<&str>,
    ) -> ServiceResult<Vec<ModVersion>> {
        Ok(self
            .registry
            .list_versions(project_id, loader, game_version)
            .await?)
    }

    /// `.jar` files in the server's `mods/` folder, sorted.
    pub async fn list_mods(&self, server_id: &str) -> ServiceResult<ModListResponse> {
        let (_, dir) = self.open_modded(server_id).await?;
        let entries = match fs::read_dir(dir.join(MODS_DIR)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ModListResponse {
                    server_id: server_id.to_string(),
                    mods: Vec::new(),
                })
            }
            Err(e) => return Err(ServiceError::io("Failed to list mods", e)),
        };
        let mut mods: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_jar(name))
            .collect();
        mods.sort();
        Ok(ModListResponse {
            server_id: server_id.to_string(),
            mods,
        })
    }

    /// Installs a mod and everything it requires into `mods/`.
    ///
    /// Files already present under the same name are left alone and not
    /// downloaded again.
    pub async fn install_mod(
        &self,
        server_id: &str,
        request: ModInstallRequest,
        restart: bool,
    ) -> ServiceResult<ModInstallResponse> {
        let (container, dir) = self.open_modded(server_id).await?;
        let loader = request.loader.as_deref();
        let game_version = request.game_version.as_deref();

        let root = resolve::resolve_version(
            self.registry.as_ref(),
            &request.project_id,
            request.version_id.as_deref(),
            loader,
            game_version,
        )
        .await?;
        let versions =
            resolve::dependency_closure(self.registry.as_ref(), root, loader, game_version).await?;

        let mods_dir = dir.join(MODS_DIR);
        fs::create_dir_all(&mods_dir)
            .map_err(|e| ServiceError::io("Failed to create mods directory", e))?;

        let mut main_filename = None;
        let mut installed = Vec::new();
        for version in &versions {
            let file = version.primary_file().ok_or_else(|| {
                ServiceError::upstream(format!("Registry version {} has no files", version.id))
            })?;
            let filename = file.filename.trim();
            if filename.is_empty() || file.url.trim().is_empty() {
                return Err(ServiceError::upstream("Registry version is missing a file URL"));
            }
            if !is_jar(filename) {
                return Err(ServiceError::invalid(format!(
                    "Unsupported mod file type: {filename}"
                )));
            }
            main_filename.get_or_insert_with(|| filename.to_string());

            let dest = crate::sandbox::resolve_path(&mods_dir, filename, Some(&["jar"]))?;
            if dest.exists() {
                continue;
            }
            download::download_verified(self.registry.as_ref(), &file.url, &dest, &file.hashes)
                .await?;
            installed.push(filename.to_string());
        }

        let filename = main_filename
            .ok_or_else(|| ServiceError::internal("Unable to determine mod filename"))?;
        info!(server_id = %server_id, mod_file = %filename, installed = installed.len(), "Mod installed.");

        self.servers.restart_if(&container, restart).await?;
        Ok(ModInstallResponse {
            server_id: server_id.to_string(),
            filename,
            installed,
        })
    }

    /// Deletes one `.jar` from `mods/`. Only a bare file name is accepted.
    pub async fn remove_mod(
        &self,
        server_id: &str,
        filename: &str,
        restart: bool,
    ) -> ServiceResult<ModListResponse> {
        let (container, dir) = self.open_modded(server_id).await?;
        let bare = !filename.is_empty()
            && !filename.contains(['/', '\\'])
            && filename != "."
            && filename != "..";
        if !bare || !is_jar(filename) {
            return Err(ServiceError::invalid("Invalid mod filename"));
        }

        let target = dir.join(MODS_DIR).join(filename);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ServiceError::not_found("Mod not found"))
            }
            Err(e) => return Err(ServiceError::io("Failed to remove mod", e)),
        }
        info!(server_id = %server_id, mod_file = %filename, "Mod removed.");

        self.servers.restart_if(&container, restart).await?;
        self.list_mods(server_id).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::servers::test_support::{harness, Harness};
    use crate::testing::FakeRegistry;

    pub struct ModHarness {
        pub service: ModService,
        pub registry: Arc<FakeRegistry>,
        pub server_id: String,
        pub dir: PathBuf,
        pub servers: Harness,
    }

    /// A running Fabric server with an empty registry behind it.
    pub async fn mod_harness() -> ModHarness {
        let servers = harness();
        let info = servers.create_modded("Modded", "FABRIC").await;
        let registry = Arc::new(FakeRegistry::default());
        let service = ModService::new(registry.clone(), servers.manager.clone());
        ModHarness {
            service,
            registry,
            dir: servers.data_dir(&info.server_id),
            server_id: info.server_id,
            servers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::mod_harness;
    use super::*;
    use crate::registry::{DependencyType, VersionDependency, VersionFile};

    fn jar_version(id: &str, project: &str, deps: Vec<VersionDependency>) -> ModVersion {
        ModVersion {
            id: id.into(),
            project_id: project.into(),
            files: vec![VersionFile {
                filename: format!("{project}-{id}.jar"),
                url: format!("https://cdn/{project}-{id}.jar"),
                primary: true,
                ..Default::default()
            }],
            dependencies: deps,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn install_pulls_required_dependencies() {
        let m = mod_harness().await;
        m.registry.add_version(jar_version(
            "s1",
            "sodium",
            vec![VersionDependency {
                project_id: Some("fabric-api".into()),
                dependency_type: DependencyType::Required,
                ..Default::default()
            }],
        ));
        m.registry.add_version(jar_version("f1", "fabric-api", vec![]));
        m.registry.add_file("https://cdn/sodium-s1.jar", &b"sodium"[..]);
        m.registry.add_file("https://cdn/fabric-api-f1.jar", &b"api"[..]);

        let response = m
            .service
            .install_mod(
                &m.server_id,
                ModInstallRequest {
                    project_id: "sodium".into(),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();

        assert_eq!(response.filename, "sodium-s1.jar");
        assert_eq!(response.installed, vec!["sodium-s1.jar", "fabric-api-f1.jar"]);
        let listed = m.service.list_mods(&m.server_id).await.unwrap();
        assert_eq!(listed.mods, vec!["fabric-api-f1.jar", "sodium-s1.jar"]);
    }

    #[tokio::test]
    async fn reinstall_does_not_download_again() {
        let m = mod_harness().await;
        m.registry.add_version(jar_version("s1", "sodium", vec![]));
        m.registry.add_file("https://cdn/sodium-s1.jar", &b"sodium"[..]);
        let request = ModInstallRequest {
            project_id: "sodium".into(),
            ..Default::default()
        };

        m.service
            .install_mod(&m.server_id, request.clone(), false)
            .await
            .unwrap();
        let again = m
            .service
            .install_mod(&m.server_id, request, true)
            .await
            .unwrap();

        assert_eq!(m.registry.downloads(), 1);
        assert!(again.installed.is_empty());
        assert_eq!(again.filename, "sodium-s1.jar");
        assert!(m
            .servers
            .runtime
            .calls()
            .iter()
            .any(|c| c.starts_with("restart:")));
    }

    #[tokio::test]
    async fn non_jar_files_are_rejected() {
        let m = mod_harness().await;
        let mut version = jar_version("z1", "zipped", vec![]);
        version.files[0].filename = "zipped.zip".into();
        m.registry.add_version(version);

        let result = m
            .service
            .install_mod(
                &m.server_id,
                ModInstallRequest {
                    project_id: "zipped".into(),
                    ..Default::default()
                },
                false,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Invalid(_))));
        assert_eq!(m.registry.downloads(), 0);
    }

    #[tokio::test]
    async fn remove_accepts_only_bare_jar_names() {
        let m = mod_harness().await;
        fs::create_dir_all(m.dir.join(MODS_DIR)).unwrap();
        fs::write(m.dir.join("mods/keep.jar"), b"x").unwrap();
        fs::write(m.dir.join("mods/gone.jar"), b"x").unwrap();

        for bad in ["../server.properties", "sub/gone.jar", "notes.txt", ""] {
            assert!(
                matches!(
                    m.service.remove_mod(&m.server_id, bad, false).await,
                    Err(ServiceError::Invalid(_))
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(matches!(
            m.service.remove_mod(&m.server_id, "missing.jar", false).await,
            Err(ServiceError::NotFound(_))
        ));

        let remaining = m
            .service
            .remove_mod(&m.server_id, "gone.jar", false)
            .await
            .unwrap();
        assert_eq!(remaining.mods, vec!["keep.jar"]);
    }

    #[tokio::test]
    async fn vanilla_servers_cannot_take_mods() {
        let m = mod_harness().await;
        let vanilla = m.servers.create("Plain").await;
        assert!(matches!(
            m.service.list_mods(&vanilla.server_id).await,
            Err(ServiceError::RequiresCapability(_))
        ));
    }

    #[test]
    fn search_defaults_and_limits() {
        let query = SearchParams::default()
            .into_query(ProjectType::Mod)
            .unwrap();
        assert_eq!(query.loader.as_deref(), Some("fabric"));
        assert_eq!(query.limit, 10);

        let pack = SearchParams::default()
            .into_query(ProjectType::Modpack)
            .unwrap();
        assert_eq!(pack.loader, None);

        let too_many = SearchParams {
            limit: Some(51),
            ..Default::default()
        };
        assert!(too_many.into_query(ProjectType::Mod).is_err());
    }
}
