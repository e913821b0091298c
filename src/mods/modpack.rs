//! Modrinth modpack (`.mrpack`) installation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;

use super::download::download_verified;
use super::resolve::resolve_version;
use super::ModService;
use crate::error::{ServiceError, ServiceResult};
use crate::labels;
use crate::registry::{FileHashes, ModVersion, VersionFile};
use crate::runtime::ContainerInfo;
use crate::sandbox;

const INDEX_FILE: &str = "modrinth.index.json";
const OVERRIDES_PREFIX: &str = "overrides/";
const PACK_EXTENSION: &str = ".mrpack";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModpackInstallRequest {
    pub project_id: String,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub loader: Option<String>,
    #[serde(default)]
    pub game_version: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModpackInstallResponse {
    pub server_id: String,
    pub project_id: String,
    pub version_id: String,
    pub modpack_name: String,
    pub installed_files: usize,
    pub skipped_files: usize,
    pub overrides_applied: usize,
}

#[derive(Debug, Default, Deserialize)]
struct PackEnv {
    #[serde(default)]
    server: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PackFile {
    #[serde(default)]
    path: String,
    #[serde(default)]
    env: Option<PackEnv>,
    #[serde(default)]
    downloads: Vec<String>,
    #[serde(default)]
    hashes: FileHashes,
}

impl PackFile {
    fn server_unsupported(&self) -> bool {
        self.env
            .as_ref()
            .and_then(|env| env.server.as_deref())
            .map(|s| s.eq_ignore_ascii_case("unsupported"))
            .unwrap_or(false)
    }

    fn download_url(&self) -> Option<&str> {
        self.downloads
            .iter()
            .map(|d| d.trim())
            .find(|d| !d.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackIndex {
    #[serde(default)]
    game: Option<String>,
    #[serde(default)]
    format_version: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dependencies: HashMap<String, Value>,
    #[serde(default)]
    files: Vec<PackFile>,
}

impl PackIndex {
    fn validate(&self) -> ServiceResult<()> {
        if let Some(game) = self.game.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            if !game.eq_ignore_ascii_case("minecraft") {
                return Err(ServiceError::invalid(format!(
                    "Unsupported modpack game: {game}"
                )));
            }
        }
        match &self.format_version {
            None | Some(Value::Null) => Ok(()),
            Some(v) if v.as_i64() == Some(1) => Ok(()),
            Some(other) => Err(ServiceError::invalid(format!(
                "Unsupported modpack formatVersion: {other}"
            ))),
        }
    }

    fn dependency(&self, key: &str) -> Option<&str> {
        self.dependencies
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Loader the pack needs, if any. Quilt, NeoForge and mixed packs are
    /// refused outright.
    fn required_loader(&self) -> ServiceResult<Option<&'static str>> {
        if self.dependencies.contains_key("quilt-loader") {
            return Err(ServiceError::conflict(
                "Quilt modpacks are not supported (Fabric/Forge only)",
            ));
        }
        if self.dependencies.contains_key("neoforge") {
            return Err(ServiceError::conflict(
                "NeoForge modpacks are not supported (Fabric/Forge only)",
            ));
        }
        let fabric = self.dependencies.contains_key("fabric-loader");
        let forge = self.dependencies.contains_key("forge");
        match (fabric, forge) {
            (true, true) => Err(ServiceError::conflict(
                "Modpack requires both Fabric and Forge (unsupported)",
            )),
            (true, false) => Ok(Some("FABRIC")),
            (false, true) => Ok(Some("FORGE")),
            (false, false) => Ok(None),
        }
    }

    /// Loader and Minecraft version must agree with what the server runs.
    /// A server on `latest` or without a declared version accepts any pack.
    fn check_compatible(&self, container: &ContainerInfo) -> ServiceResult<()> {
        let env = container.env_map();
        let declared = |env_key: &str, label: &str| {
            env.get(env_key)
                .map(String::as_str)
                .or_else(|| container.label(label))
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let server_type = declared("TYPE", labels::SERVER_TYPE).to_ascii_uppercase();
        if let Some(loader) = self.required_loader()? {
            if !server_type.is_empty() && server_type != loader {
                return Err(ServiceError::conflict(format!(
                    "Modpack requires {loader} but server is {server_type}"
                )));
            }
        }

        if let Some(required) = self.dependency("minecraft") {
            let version = declared("VERSION", labels::VERSION);
            if !version.is_empty() && !version.eq_ignore_ascii_case("latest") && version != required {
                return Err(ServiceError::conflict(format!(
                    "Modpack requires Minecraft {required} but server is {version}"
                )));
            }
        }
        Ok(())
    }
}

/// Primary file first, then the rest; the first `.mrpack` wins.
fn select_pack_file(version: &ModVersion) -> ServiceResult<&VersionFile> {
    let ordered = version
        .files
        .iter()
        .filter(|f| f.primary)
        .chain(version.files.iter().filter(|f| !f.primary));
    let mut first = None;
    for file in ordered {
        if file.filename.to_ascii_lowercase().ends_with(PACK_EXTENSION) {
            return Ok(file);
        }
        first.get_or_insert(file);
    }
    match first {
        Some(file) => Err(ServiceError::invalid(format!(
            "Unsupported modpack file type: {}",
            file.filename
        ))),
        None => Err(ServiceError::upstream("Registry version has no files")),
    }
}

fn zip_error(err: zip::result::ZipError) -> ServiceError {
    ServiceError::invalid(format!("Modpack archive is invalid: {err}"))
}

fn read_index(archive_path: &Path) -> ServiceResult<PackIndex> {
    let file = File::open(archive_path)
        .map_err(|e| ServiceError::io("Failed to open modpack archive", e))?;
    let mut archive = ZipArchive::new(file).map_err(zip_error)?;
    let entry = match archive.by_name(INDEX_FILE) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ServiceError::invalid(format!(
                "Modpack is missing {INDEX_FILE}"
            )))
        }
        Err(e) => return Err(zip_error(e)),
    };
    let index: PackIndex = serde_json::from_reader(entry)
        .map_err(|e| ServiceError::invalid(format!("Modpack index is invalid: {e}")))?;
    index.validate()?;
    Ok(index)
}

/// Copies every `overrides/` entry into `server_dir`. Existing files are kept
/// unless `overwrite` is set.
fn extract_overrides(archive_path: &Path, server_dir: &Path, overwrite: bool) -> ServiceResult<usize> {
    let file = File::open(archive_path)
        .map_err(|e| ServiceError::io("Failed to open modpack archive", e))?;
    let mut archive = ZipArchive::new(file).map_err(zip_error)?;

    let mut applied = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_error)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.name().strip_prefix(OVERRIDES_PREFIX) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        let relative = relative.to_string();
        let dest = sandbox::resolve_path(server_dir, &relative, None)?;
        if dest.exists() && !overwrite {
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ServiceError::io("Failed to create override directory", e))?;
        }
        let mut out = File::create(&dest)
            .map_err(|e| ServiceError::io(&format!("Failed to write modpack override {relative}"), e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| ServiceError::io(&format!("Failed to write modpack override {relative}"), e))?;
        applied += 1;
    }
    Ok(applied)
}

impl ModService {
    /// Installs a modpack into a modded server.
    ///
    /// The pack archive is downloaded to a scratch directory and verified,
    /// its index checked against the server's loader and version, then every
    /// server-side file is fetched and the overrides are copied in. All target
    /// paths are confined to the server directory.
    pub async fn install_modpack(
        &self,
        server_id: &str,
        request: ModpackInstallRequest,
        restart: bool,
    ) -> ServiceResult<ModpackInstallResponse> {
        let (container, server_dir) = self.open_modded(server_id).await?;

        let version = resolve_version(
            self.registry.as_ref(),
            &request.project_id,
            request.version_id.as_deref(),
            request.loader.as_deref(),
            request.game_version.as_deref(),
        )
        .await?;
        let pack_file = select_pack_file(&version)?;

        let scratch = tempfile::Builder::new()
            .prefix("craftdock-modpack-")
            .tempdir()
            .map_err(|e| ServiceError::io("Failed to create scratch directory", e))?;
        let archive_path = scratch.path().join("pack.mrpack");
        download_verified(
            self.registry.as_ref(),
            &pack_file.url,
            &archive_path,
            &pack_file.hashes,
        )
        .await?;

        let index = {
            let path = archive_path.clone();
            tokio::task::spawn_blocking(move || read_index(&path)).await??
        };
        index.check_compatible(&container)?;

        let (installed_files, skipped_files) = self
            .install_pack_files(&server_dir, &index.files, request.overwrite)
            .await?;

        let overrides_applied = {
            let (path, dir, overwrite) = (archive_path.clone(), server_dir.clone(), request.overwrite);
            tokio::task::spawn_blocking(move || extract_overrides(&path, &dir, overwrite)).await??
        };

        let modpack_name = index
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| request.project_id.clone());
        info!(
            server_id = %server_id,
            modpack = %modpack_name,
            version_id = %version.id,
            installed_files,
            skipped_files,
            overrides_applied,
            "Modpack installed."
        );

        self.servers.restart_if(&container, restart).await?;
        Ok(ModpackInstallResponse {
            server_id: server_id.to_string(),
            project_id: request.project_id,
            version_id: version.id,
            modpack_name,
            installed_files,
            skipped_files,
            overrides_applied,
        })
    }

    async fn install_pack_files(
        &self,
        server_dir: &Path,
        files: &[PackFile],
        overwrite: bool,
    ) -> ServiceResult<(usize, usize)> {
        let mut installed = 0;
        let mut skipped = 0;
        for entry in files {
            if entry.server_unsupported() {
                continue;
            }
            let path = entry.path.trim();
            if path.is_empty() {
                return Err(ServiceError::invalid("Modpack entry is missing a file path"));
            }
            let url = entry.download_url().ok_or_else(|| {
                ServiceError::invalid(format!("Modpack entry is missing downloads for: {path}"))
            })?;
            let dest: PathBuf = sandbox::resolve_path(server_dir, path, None)?;
            if dest.exists() && !overwrite {
                skipped += 1;
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| ServiceError::io("Failed to create modpack directory", e))?;
            }
            if let Err(e) = download_verified(self.registry.as_ref(), url, &dest, &entry.hashes).await {
                warn!(path = %path, error = %e, "Modpack file failed.");
                return Err(e);
            }
            installed += 1;
        }
        Ok((installed, skipped))
    }
}
