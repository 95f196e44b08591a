//! Session working-directory persistence.
//!
//! The manager restores a session's workspace before creating its container
//! and persists it again on release. Both directions are best-effort: the
//! manager logs storage errors and carries on.

mod local;

pub use local::LocalStorage;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Persistence layer for session directories.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Restores `remote_path` into `local_path`. A missing `remote_path` is
    /// a fresh session and not an error.
    async fn download_folder(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Persists `local_path` to `remote_path`.
    async fn upload_folder(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Joins path segments the way this backend addresses objects.
    fn path_join(&self, parts: &[&str]) -> String;
}
