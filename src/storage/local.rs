//! Local-filesystem storage.

use async_trait::async_trait;
use fs_extra::dir::CopyOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::Storage;
use crate::error::{ManagerError, Result};

/// Stores session directories as plain directories on local disk.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Creates a local storage backend.
    pub fn new() -> Self {
        Self
    }
}

/// Copy the contents of `from` into `to`, creating `to` if needed.
async fn copy_tree(from: PathBuf, to: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&to)?;

        let mut options = CopyOptions::new();
        options.overwrite = true;
        options.content_only = true;

        fs_extra::dir::copy(&from, &to, &options).map_err(|e| {
            ManagerError::storage(format!(
                "Failed to copy {} to {}: {e}",
                from.display(),
                to.display()
            ))
        })?;
        Ok(())
    })
    .await
    .map_err(|e| ManagerError::storage(format!("Copy task failed: {e}")))?
}

#[async_trait]
impl Storage for LocalStorage {
    async fn download_folder(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let source = PathBuf::from(remote_path);
        if !source.is_dir() {
            debug!(remote_path, "No stored workspace, starting fresh");
            return Ok(());
        }

        debug!(remote_path, local_path = %local_path.display(), "Restoring workspace");
        copy_tree(source, local_path.to_path_buf()).await
    }

    async fn upload_folder(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        if !local_path.is_dir() {
            return Err(ManagerError::storage(format!(
                "Workspace {} does not exist",
                local_path.display()
            )));
        }

        debug!(local_path = %local_path.display(), remote_path, "Persisting workspace");
        copy_tree(local_path.to_path_buf(), PathBuf::from(remote_path)).await
    }

    fn path_join(&self, parts: &[&str]) -> String {
        parts
            .iter()
            .fold(PathBuf::new(), |path, part| path.join(part))
            .to_string_lossy()
            .into_owned()
    }
}
