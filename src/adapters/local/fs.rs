use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use std::error::Error;
use std::path::{Path, PathBuf};

/// Resolve a `file://` URL or bare path to a local path.
pub fn local_path(locator: &str) -> PathBuf {
    PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator))
}

#[derive(Clone, Copy, Default)]
pub struct FsAdapter;

impl FsAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoragePort for FsAdapter {
    async fn download(
        &self,
        url: &str,
        local_path: &Path,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        // A resource already at the destination needs no copy.
        let source = self::local_path(url);
        if source != local_path {
            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, local_path)
                .await
                .map_err(|e| format!("{}: {}", source.display(), e))?;
        }
        Ok(())
    }
}
