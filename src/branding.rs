//! Server list icon pushed into every server directory.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const SERVER_ICON_FILE: &str = "server-icon.png";

/// Optional icon source. Absent or unreadable sources make every call a no-op.
#[derive(Debug, Clone, Default)]
pub struct BrandingIcon {
    source: Option<PathBuf>,
}

impl BrandingIcon {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Source path, when configured and present on disk.
    pub async fn available_source(&self) -> Option<&Path> {
        let source = self.source.as_deref()?;
        match fs::metadata(source).await {
            Ok(meta) if meta.is_file() => Some(source),
            _ => None,
        }
    }

    /// Copies the icon into `server_dir`. Never fails; returns whether it wrote.
    pub async fn apply(&self, server_dir: &Path) -> bool {
        let Some(source) = self.available_source().await else {
            debug!("No branding icon configured, skipping.");
            return false;
        };
        let dest = server_dir.join(SERVER_ICON_FILE);
        match fs::copy(source, &dest).await {
            Ok(_) => true,
            Err(e) => {
                warn!(dest = %dest.display(), error = %e, "Failed to write server icon.");
                false
            }
        }
    }
}
