//! Streaming downloads with hash verification.

use futures::StreamExt;
use sha1::Sha1;
use sha2::{Digest, Sha512};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::registry::{ContentRegistry, FileHashes};

fn hash_matches(expected: Option<&str>, actual: &str) -> bool {
    match expected.map(str::trim).filter(|e| !e.is_empty()) {
        Some(expected) => expected.eq_ignore_ascii_case(actual),
        None => true,
    }
}

/// Downloads `url` to `dest`.
///
/// The body is streamed into a temporary file next to `dest` and only moved
/// into place once every declared hash matched. On any failure `dest` is left
/// as it was and the temporary file is removed.
pub(crate) async fn download_verified(
    registry: &dyn ContentRegistry,
    url: &str,
    dest: &Path,
    hashes: &FileHashes,
) -> ServiceResult<u64> {
    let parent = dest
        .parent()
        .ok_or_else(|| ServiceError::internal("Download target has no parent directory"))?;
    let temp = tempfile::Builder::new()
        .prefix(".tmp-download-")
        .tempfile_in(parent)
        .map_err(|e| ServiceError::io("Failed to create temporary file", e))?;
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut sha1 = Sha1::new();
    let mut sha512 = Sha512::new();
    let mut written = 0u64;
    let mut body = registry.download(url).await?;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        sha1.update(&chunk);
        sha512.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| ServiceError::io("Failed to write download", e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| ServiceError::io("Failed to write download", e))?;
    drop(file);

    let sha1 = hex::encode(sha1.finalize());
    let sha512 = hex::encode(sha512.finalize());
    if !hash_matches(hashes.sha1.as_deref(), &sha1) {
        warn!(url = %url, actual = %sha1, "sha1 mismatch, discarding download.");
        return Err(ServiceError::upstream(format!(
            "Downloaded file sha1 hash does not match for {url}"
        )));
    }
    if !hash_matches(hashes.sha512.as_deref(), &sha512) {
        warn!(url = %url, "sha512 mismatch, discarding download.");
        return Err(ServiceError::upstream(format!(
            "Downloaded file sha512 hash does not match for {url}"
        )));
    }

    temp_path
        .persist(dest)
        .map_err(|e| ServiceError::io("Failed to move download into place", e.error))?;
    debug!(dest = %dest.display(), bytes = written, "Download stored.");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRegistry;

    const BODY: &[u8] = b"jar bytes";

    fn sha1_of(data: &[u8]) -> String {
        hex::encode(Sha1::digest(data))
    }

    #[tokio::test]
    async fn verified_download_lands_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FakeRegistry::default();
        registry.add_file("https://cdn/a.jar", BODY);
        let dest = dir.path().join("a.jar");

        let hashes = FileHashes {
            sha1: Some(sha1_of(BODY).to_uppercase()),
            sha512: Some(hex::encode(Sha512::digest(BODY))),
        };
        let written = download_verified(&registry, "https://cdn/a.jar", &dest, &hashes)
            .await
            .unwrap();

        assert_eq!(written, BODY.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn sha1_mismatch_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FakeRegistry::default();
        registry.add_file("https://cdn/a.jar", BODY);
        let dest = dir.path().join("a.jar");
        std::fs::write(&dest, b"previous").unwrap();

        let hashes = FileHashes {
            sha1: Some(sha1_of(b"something else")),
            sha512: None,
        };
        let result = download_verified(&registry, "https://cdn/a.jar", &dest, &hashes).await;

        assert!(matches!(result, Err(ServiceError::Upstream(_))));
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn missing_remote_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FakeRegistry::default();
        let result = download_verified(
            &registry,
            "https://cdn/missing.jar",
            &dir.path().join("missing.jar"),
            &FileHashes::default(),
        )
        .await;

        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
