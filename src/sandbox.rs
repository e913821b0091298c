//! Resolution of caller-supplied relative paths against a root directory.
//!
//! Every path handed out by this module has been checked against the *real*
//! location of the root, so symlinks planted inside a server directory cannot
//! redirect a write outside of it.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{ServiceError, ServiceResult};

/// Resolves `relative` under `root`.
///
/// Absolute paths, `..` components and empty paths are rejected. When
/// `allowed_extensions` is given, the final component must carry one of them
/// (compared case-insensitively, without the leading dot).
pub fn resolve_path(
    root: &Path,
    relative: &str,
    allowed_extensions: Option<&[&str]>,
) -> ServiceResult<PathBuf> {
    let normalized = normalize_relative(relative)?;

    if let Some(allowed) = allowed_extensions {
        let ext = normalized
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
            return Err(ServiceError::invalid(format!(
                "Unsupported file type: {relative}"
            )));
        }
    }

    let root_real = fs::canonicalize(root)
        .map_err(|e| ServiceError::io(&format!("Failed to resolve {}", root.display()), e))?;
    let candidate = root_real.join(&normalized);
    let real = real_location(&candidate)
        .map_err(|_| ServiceError::invalid(format!("Invalid path: {relative}")))?;

    if real == root_real || !real.starts_with(&root_real) {
        return Err(ServiceError::invalid(format!("Invalid path: {relative}")));
    }
    Ok(real)
}

/// Reports whether the real location of `path` lies strictly inside `root`.
pub fn is_within(root: &Path, path: &Path) -> bool {
    let (Ok(root_real), Ok(target)) = (real_location(root), real_location(path)) else {
        return false;
    };
    target != root_real && target.starts_with(&root_real)
}

/// Recursively deletes `dir` after re-checking that it lies inside `root`.
///
/// A directory that is already gone is not an error. The root itself and
/// anything outside it are refused.
pub fn remove_dir_within(root: &Path, dir: &Path) -> ServiceResult<()> {
    if !is_within(root, dir) {
        return Err(ServiceError::invalid(
            "Refusing to delete path outside data root",
        ));
    }
    let target = real_location(dir)
        .map_err(|e| ServiceError::io("Failed to resolve server data path", e))?;
    if !target.exists() {
        return Ok(());
    }
    fs::remove_dir_all(&target).map_err(|e| ServiceError::io("Failed to delete server data", e))
}

fn normalize_relative(relative: &str) -> ServiceResult<PathBuf> {
    let raw = relative.trim().replace('\\', "/");
    if raw.starts_with('/') || looks_like_drive(&raw) {
        return Err(ServiceError::invalid(format!(
            "Absolute paths are not allowed: {relative}"
        )));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(&raw).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ServiceError::invalid(format!(
                    "Path traversal is not allowed: {relative}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ServiceError::invalid(format!(
                    "Absolute paths are not allowed: {relative}"
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(ServiceError::invalid("Path cannot be empty"));
    }
    Ok(normalized)
}

fn looks_like_drive(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Real location of `path`, even when its tail does not exist yet.
///
/// The deepest existing ancestor is canonicalized and the missing components
/// are appended. A dangling symlink anywhere on the way is an error, since
/// writing through it would land wherever it points.
pub(crate) fn real_location(path: &Path) -> io::Result<PathBuf> {
    let mut missing: Vec<std::ffi::OsString> = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        if fs::symlink_metadata(&current).is_ok() {
            let mut real = fs::canonicalize(&current)?;
            for part in missing.iter().rev() {
                real.push(part);
            }
            return Ok(real);
        }
        match (current.file_name(), current.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                current = parent.to_path_buf();
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no existing ancestor for {}", path.display()),
                ));
            }
        }
    }
}
